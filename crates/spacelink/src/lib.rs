//! Spacecraft packet framing and reliable file transfer over lossy links.
//!
//! spacelink moves files between ground stations and spacecraft over links
//! that drop, corrupt and reorder packets, and survives either end restarting
//! mid-transfer.
//!
//! # Crate Structure
//!
//! - [`transport`]: UDP and capture-file senders with throughput pacing
//! - [`frame`]: CRC-16, PacketComm envelopes, SLIP/HDLC/AX.25/sync-marker framing
//! - [`transfer`]: the resumable file-transfer engine (behind `transfer` feature)

/// Re-export transport types.
pub mod transport {
    pub use spacelink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use spacelink_frame::*;
}

/// Re-export transfer types (requires `transfer` feature).
#[cfg(feature = "transfer")]
pub mod transfer {
    pub use spacelink_transfer::*;
}
