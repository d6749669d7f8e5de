use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors that can occur in link transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to open a capture file.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The sender was used before `init` succeeded.
    #[error("sender not initialized")]
    NotInitialized,

    /// A datagram was only partially written.
    #[error("short send ({sent} of {len} bytes)")]
    ShortSend { sent: usize, len: usize },

    /// An I/O error occurred on the underlying socket or file.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
