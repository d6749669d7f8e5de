use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::chunks::{self, FileProgress};
use crate::payload::{Metadata, TxBitmap};

/// Side of a peer's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    /// Prefix of staging files for this direction.
    pub fn staging_prefix(self) -> &'static str {
        match self {
            Direction::Incoming => "in_",
            Direction::Outgoing => "out_",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" | "incoming" | "0" => Ok(Direction::Incoming),
            "out" | "outgoing" | "1" => Ok(Direction::Outgoing),
            other => Err(format!("unknown direction {other:?}")),
        }
    }
}

/// State of one transaction.
///
/// Outgoing: `file_info` holds the byte ranges still to be sent.
/// Incoming: `file_info` holds the byte ranges received so far.
#[derive(Debug)]
pub struct TxProgress {
    pub tx_id: u8,
    /// Armed for sending (outgoing only).
    pub enabled: bool,
    /// Outgoing: METADATA sent. Incoming: METADATA received.
    pub sentmeta: bool,
    /// Outgoing: every byte sent once. Incoming: file promoted to its final path.
    pub sentdata: bool,
    /// Outgoing: peer confirmed receipt. Incoming: CRC verified.
    pub complete: bool,
    pub node_name: String,
    pub agent_name: String,
    pub file_name: String,
    /// Final location: spool file (outgoing) or destination (incoming).
    pub filepath: PathBuf,
    /// Staging path without extension; `.file` and `.meta` hang off it.
    pub temppath: PathBuf,
    pub file_size: u64,
    pub file_crc: u16,
    pub total_bytes: u64,
    pub file_info: Vec<FileProgress>,
    pub(crate) file: Option<File>,
    /// Earliest time the next request/response may go out.
    pub next_response: Instant,
    pub(crate) savetime: Option<Instant>,
    pub(crate) data_count: u32,
}

impl TxProgress {
    pub(crate) fn new(tx_id: u8, node_name: &str, temppath: PathBuf) -> Self {
        Self {
            tx_id,
            enabled: false,
            sentmeta: false,
            sentdata: false,
            complete: false,
            node_name: node_name.to_string(),
            agent_name: String::new(),
            file_name: String::new(),
            filepath: PathBuf::new(),
            temppath,
            file_size: 0,
            file_crc: 0,
            total_bytes: 0,
            file_info: Vec::new(),
            file: None,
            next_response: Instant::now(),
            savetime: None,
            data_count: 0,
        }
    }

    pub fn meta_path(&self) -> PathBuf {
        self.temppath.with_extension("meta")
    }

    pub fn staging_file(&self) -> PathBuf {
        self.temppath.with_extension("file")
    }

    /// Metadata record describing this transaction as `node_id` sees it.
    pub fn metadata(&self, node_id: u8) -> Metadata {
        Metadata {
            node_id,
            tx_id: self.tx_id,
            agent_name: self.agent_name.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            file_crc: self.file_crc,
        }
    }

    /// Re-merge the chunk map and refresh `total_bytes`.
    pub fn merge(&mut self) -> u64 {
        self.total_bytes = chunks::merge_chunks_overlap(&mut self.file_info, self.file_size);
        self.data_count = 0;
        self.total_bytes
    }

    /// Bytes still to be sent (outgoing).
    pub fn bytes_togo(&self) -> u64 {
        chunks::total_bytes(&self.file_info)
    }

    /// Whether a rate-limited write is due.
    pub(crate) fn save_due(&self, interval: Duration) -> bool {
        interval.is_zero() || self.savetime.is_none_or(|t| t.elapsed() >= interval)
    }

    pub fn summary(&self, node: &str) -> TxSummary {
        TxSummary {
            node: node.to_string(),
            tx_id: self.tx_id,
            enabled: self.enabled,
            sentmeta: self.sentmeta,
            sentdata: self.sentdata,
            complete: self.complete,
            file_name: self.file_name.clone(),
            agent_name: self.agent_name.clone(),
            file_size: self.file_size,
            total_bytes: self.total_bytes,
        }
    }
}

/// One direction of a peer's queue.
#[derive(Debug)]
pub struct TxEntry {
    pub progress: BTreeMap<u8, TxProgress>,
    /// Transactions awaiting a response-type packet.
    pub respond: BTreeSet<u8>,
    /// Ids to CANCEL on the next outgoing pass.
    pub(crate) cancel: BTreeSet<u8>,
    pub waittime: Duration,
    pub(crate) last_queue: Option<(TxBitmap, Instant)>,
}

impl TxEntry {
    pub(crate) fn new(waittime: Duration) -> Self {
        Self {
            progress: BTreeMap::new(),
            respond: BTreeSet::new(),
            cancel: BTreeSet::new(),
            waittime,
            last_queue: None,
        }
    }

    pub fn len(&self) -> usize {
        self.progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_empty()
    }

    pub fn bitmap(&self) -> TxBitmap {
        TxBitmap::from_ids(self.progress.keys().copied())
    }

    pub fn find_path(&self, path: &std::path::Path) -> Option<&TxProgress> {
        self.progress.values().find(|tx| tx.filepath == path)
    }
}

/// A peer's pair of queues.
#[derive(Debug)]
pub struct TxQueue {
    pub node_id: u8,
    pub node_name: String,
    pub incoming: TxEntry,
    pub outgoing: TxEntry,
}

impl TxQueue {
    pub(crate) fn new(node_id: u8, node_name: &str, waittime: Duration) -> Self {
        Self {
            node_id,
            node_name: node_name.to_string(),
            incoming: TxEntry::new(waittime),
            outgoing: TxEntry::new(waittime),
        }
    }

    pub fn entry(&self, direction: Direction) -> &TxEntry {
        match direction {
            Direction::Incoming => &self.incoming,
            Direction::Outgoing => &self.outgoing,
        }
    }

    pub fn entry_mut(&mut self, direction: Direction) -> &mut TxEntry {
        match direction {
            Direction::Incoming => &mut self.incoming,
            Direction::Outgoing => &mut self.outgoing,
        }
    }
}

/// Snapshot of one transaction as reported by `list_incoming`/`list_outgoing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxSummary {
    pub node: String,
    pub tx_id: u8,
    pub enabled: bool,
    pub sentmeta: bool,
    pub sentdata: bool,
    pub complete: bool,
    pub file_name: String,
    pub agent_name: String,
    pub file_size: u64,
    pub total_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_paths() {
        let tx = TxProgress::new(7, "sat", PathBuf::from("/tmp/x/temp/file/in_7"));
        assert_eq!(tx.meta_path(), PathBuf::from("/tmp/x/temp/file/in_7.meta"));
        assert_eq!(tx.staging_file(), PathBuf::from("/tmp/x/temp/file/in_7.file"));
    }

    #[test]
    fn save_is_rate_limited() {
        let mut tx = TxProgress::new(1, "sat", PathBuf::from("out_1"));
        assert!(tx.save_due(Duration::from_secs(5)));
        tx.savetime = Some(Instant::now());
        assert!(!tx.save_due(Duration::from_secs(5)));
        assert!(tx.save_due(Duration::ZERO));
    }

    #[test]
    fn direction_parses() {
        assert_eq!("in".parse::<Direction>().unwrap(), Direction::Incoming);
        assert_eq!("outgoing".parse::<Direction>().unwrap(), Direction::Outgoing);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn summary_serializes_expected_fields() {
        let mut tx = TxProgress::new(3, "sat", PathBuf::from("out_3"));
        tx.file_name = "a.bin".into();
        tx.file_size = 10;
        let json = serde_json::to_value(tx.summary("sat")).unwrap();
        for key in [
            "node",
            "tx_id",
            "enabled",
            "sentmeta",
            "sentdata",
            "complete",
            "file_name",
            "agent_name",
            "file_size",
            "total_bytes",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
