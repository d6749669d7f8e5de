//! Datagram and file senders for spacelink packet links.
//!
//! This is the lowest layer of spacelink. It moves opaque byte buffers and
//! makes no promises about ordering or delivery:
//! - UDP datagrams with millisecond receive timeouts and throughput pacing
//! - Append-only packet capture files
//!
//! Everything above talks to a link through the [`Sender`] capability.

pub mod error;
pub mod file;
pub mod pacing;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use file::FileSender;
pub use pacing::Pacer;
pub use traits::Sender;
pub use udp::{UdpConfig, UdpLink, UdpSender, DEFAULT_PORT, MAX_DATAGRAM, UDP_OVERHEAD};
