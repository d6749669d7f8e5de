use std::time::Duration;

/// Default packet payload limit in bytes.
pub const DEFAULT_PACKET_SIZE: usize = 217;

/// Tuning knobs for a [`Transfer`](crate::Transfer) engine.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Upper bound on every emitted packet's payload length. Default: 217.
    pub packet_size: usize,
    /// Initial retry interval for both directions of every peer. Default: 60 s.
    pub waittime: Duration,
    /// Minimum interval between rate-limited `.meta` writes. Default: 5 s.
    pub meta_interval: Duration,
    /// DATA packets between chunk-map merges on the receiving side. Default: 32.
    pub merge_interval: u32,
    /// Packet budget for one outgoing pass. Default: 100.
    pub max_packets: usize,
    /// Transmit buffer capacity in packets; a pass stops at 90% of it. Default: 200.
    pub buffer_capacity: usize,
    /// Wall-clock budget for one outgoing pass. Default: 1 s.
    pub time_budget: Duration,
}

impl TransferConfig {
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_waittime(mut self, waittime: Duration) -> Self {
        self.waittime = waittime;
        self
    }

    pub fn with_meta_interval(mut self, interval: Duration) -> Self {
        self.meta_interval = interval;
        self
    }

    pub fn with_merge_interval(mut self, packets: u32) -> Self {
        self.merge_interval = packets.max(1);
        self
    }

    pub fn with_max_packets(mut self, max_packets: usize) -> Self {
        self.max_packets = max_packets;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    /// Queued packet count at which an outgoing pass stops adding more.
    pub fn buffer_headroom(&self) -> usize {
        self.buffer_capacity * 9 / 10
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            waittime: Duration::from_secs(60),
            meta_interval: Duration::from_secs(5),
            merge_interval: 32,
            max_packets: 100,
            buffer_capacity: 200,
            time_budget: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.packet_size, 217);
        assert_eq!(config.waittime, Duration::from_secs(60));
        assert_eq!(config.buffer_headroom(), 180);
    }

    #[test]
    fn merge_interval_is_never_zero() {
        assert_eq!(TransferConfig::default().with_merge_interval(0).merge_interval, 1);
    }
}
