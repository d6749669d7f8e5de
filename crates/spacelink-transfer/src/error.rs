use std::path::PathBuf;

use spacelink_frame::FrameError;

/// Errors produced by the file-transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The node table names fewer than two nodes.
    #[error("node table needs at least two nodes, found {0}")]
    TooFewNodes(usize),

    /// A node name or id is not in the node table.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A node table line could not be parsed.
    #[error("node table line {line}: {message}")]
    NodeTable { line: usize, message: String },

    /// No transaction with this id exists for the peer.
    #[error("no transaction {tx_id} for node {node}")]
    UnknownTx { node: String, tx_id: u8 },

    /// All transaction ids for the peer are in use.
    #[error("transfer queue for node {0} is full")]
    QueueFull(String),

    /// The file is already queued under another transaction.
    #[error("{path} is already queued as transaction {tx_id}")]
    DuplicateTx { path: PathBuf, tx_id: u8 },

    /// A queued file changed size underneath its transaction.
    #[error("{path} changed size from {expected} to {actual} bytes")]
    FileSizeChanged {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Empty files are never queued.
    #[error("{0} is empty")]
    ZeroSizeFile(PathBuf),

    /// Files larger than the wire offsets can address.
    #[error("{path} is {size} bytes, limit is {max}")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    /// A file, agent or node name exceeds its wire limit or is not a plain name.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Requested packet size cannot hold every packet type.
    #[error("packet size {size} out of range ({min}..={max})")]
    PacketSize { size: usize, min: usize, max: usize },

    /// A persisted `.meta` file failed validation and was removed.
    #[error("corrupt meta file {path}: {reason}")]
    MetaCorrupt { path: PathBuf, reason: &'static str },

    /// The received file does not match the CRC announced in its metadata.
    #[error("file CRC mismatch for {path}: expected {expected:#06x}, got {actual:#06x}")]
    FileCrcMismatch {
        path: PathBuf,
        expected: u16,
        actual: u16,
    },

    /// A file-transfer payload was malformed.
    #[error("malformed {kind} payload: {reason}")]
    Payload {
        kind: &'static str,
        reason: &'static str,
    },

    /// Packet-level decoding failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A queue snapshot could not be serialized.
    #[error("serialize queue: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while reading or writing transfer state.
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;
