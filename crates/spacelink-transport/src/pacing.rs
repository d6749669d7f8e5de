use std::time::{Duration, Instant};

use crate::udp::UDP_OVERHEAD;

/// Spaces sends so a link never exceeds its configured throughput.
///
/// After every send of `n` bytes the next send is held back by
/// `(UDP_OVERHEAD + n) / throughput` seconds.
#[derive(Debug, Clone)]
pub struct Pacer {
    throughput: u32,
    next_send: Instant,
}

impl Pacer {
    /// Create a pacer for `throughput` bytes per second. Zero disables pacing.
    pub fn new(throughput: u32) -> Self {
        Self {
            throughput,
            next_send: Instant::now(),
        }
    }

    /// Configured throughput in bytes per second.
    pub fn throughput(&self) -> u32 {
        self.throughput
    }

    /// Change the throughput; takes effect after the next send.
    pub fn set_throughput(&mut self, throughput: u32) {
        self.throughput = throughput;
    }

    /// Airtime charged for a packet of `bytes` bytes.
    pub fn delay_for(&self, bytes: usize) -> Duration {
        if self.throughput == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((UDP_OVERHEAD + bytes) as f64 / f64::from(self.throughput))
    }

    /// Time left before the link may be used again.
    pub fn remaining(&self) -> Duration {
        self.next_send.saturating_duration_since(Instant::now())
    }

    /// Block until the link may be used again.
    pub fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }

    /// Record a completed send of `bytes` bytes.
    pub fn record(&mut self, bytes: usize) {
        self.next_send = Instant::now() + self.delay_for(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_counts_datagram_overhead() {
        let pacer = Pacer::new(1000);
        assert_eq!(pacer.delay_for(972), Duration::from_secs(1));
        assert_eq!(pacer.delay_for(0), Duration::from_millis(28));
    }

    #[test]
    fn zero_throughput_never_waits() {
        let mut pacer = Pacer::new(0);
        pacer.record(10_000);
        assert!(pacer.remaining().is_zero());
    }

    #[test]
    fn record_pushes_next_send_forward() {
        let mut pacer = Pacer::new(130);
        assert!(pacer.remaining().is_zero());
        pacer.record(102);
        let remaining = pacer.remaining();
        assert!(remaining > Duration::from_millis(900));
        assert!(remaining <= Duration::from_secs(1));
    }
}
