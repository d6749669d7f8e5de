use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Link statistics shared by the agent threads.
#[derive(Debug, Default)]
pub struct Counters {
    pub packets_in: AtomicU64,
    pub packets_out: AtomicU64,
    /// Datagrams that failed framing or CRC checks.
    pub crc_errors: AtomicU64,
    /// Packets with a valid envelope but an unusable payload.
    pub payload_errors: AtomicU64,
    /// Valid packets of a type or destination this agent does not handle.
    pub ignored: AtomicU64,
    pub send_errors: AtomicU64,
    pub recv_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub packets_in: u64,
    pub packets_out: u64,
    pub crc_errors: u64,
    pub payload_errors: u64,
    pub ignored: u64,
    pub send_errors: u64,
    pub recv_errors: u64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CounterSnapshot {
            packets_in: get(&self.packets_in),
            packets_out: get(&self.packets_out),
            crc_errors: get(&self.crc_errors),
            payload_errors: get(&self.payload_errors),
            ignored: get(&self.ignored),
            send_errors: get(&self.send_errors),
            recv_errors: get(&self.recv_errors),
        }
    }
}

impl CounterSnapshot {
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("packets_in", self.packets_in.to_string()),
            ("packets_out", self.packets_out.to_string()),
            ("crc_errors", self.crc_errors.to_string()),
            ("payload_errors", self.payload_errors.to_string()),
            ("ignored", self.ignored.to_string()),
            ("send_errors", self.send_errors.to_string()),
            ("recv_errors", self.recv_errors.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reads_every_counter() {
        let counters = Counters::default();
        Counters::bump(&counters.packets_in);
        Counters::bump(&counters.packets_in);
        Counters::bump(&counters.crc_errors);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.packets_in, 2);
        assert_eq!(snapshot.crc_errors, 1);
        assert_eq!(snapshot.packets_out, 0);
        assert_eq!(snapshot.fields().len(), 7);
    }
}
