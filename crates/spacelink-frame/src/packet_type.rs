//! PacketComm type codes.
//!
//! Types are grouped by subsystem in 0x100 ranges:
//! - 0x000-0x0FF basic link traffic
//! - 0x100-0x1FF commands
//! - 0x200-0x2FF telemetry
//! - 0x300-0x3FF radio control
//! - 0x400-0x4FF file transfer
//!
//! Only types 0x0-0xF can travel in a Minimal-style header.

/// Link beacon.
pub const BEACON: u16 = 0x0000;
/// Echo request.
pub const PING: u16 = 0x0001;
/// Echo reply.
pub const PONG: u16 = 0x0002;
/// Opaque command blob.
pub const COMMAND: u16 = 0x0100;
/// Command acknowledgement.
pub const COMMAND_ACK: u16 = 0x0101;
/// Opaque telemetry blob.
pub const TELEMETRY: u16 = 0x0200;
/// Radio configuration change.
pub const RADIO_CONFIG: u16 = 0x0300;

/// Start of the file-transfer range.
pub const FILE_TRANSFER_BASE: u16 = 0x0400;
pub const FILE_METADATA: u16 = 0x0400;
pub const FILE_DATA: u16 = 0x0401;
pub const FILE_REQDATA: u16 = 0x0402;
pub const FILE_REQMETA: u16 = 0x0403;
pub const FILE_REQCOMPLETE: u16 = 0x0404;
pub const FILE_COMPLETE: u16 = 0x0405;
pub const FILE_CANCEL: u16 = 0x0406;
pub const FILE_QUEUE: u16 = 0x0407;
pub const FILE_HEARTBEAT: u16 = 0x0408;
pub const FILE_MESSAGE: u16 = 0x0409;
pub const FILE_COMMAND: u16 = 0x040A;

/// Largest type that fits the 4-bit Minimal header.
pub const MINIMAL_TYPE_MAX: u16 = 0x000F;

/// Returns a human-readable name for a packet type.
pub fn type_name(packet_type: u16) -> &'static str {
    match packet_type {
        BEACON => "BEACON",
        PING => "PING",
        PONG => "PONG",
        COMMAND => "COMMAND",
        COMMAND_ACK => "COMMAND_ACK",
        TELEMETRY => "TELEMETRY",
        RADIO_CONFIG => "RADIO_CONFIG",
        FILE_METADATA => "METADATA",
        FILE_DATA => "DATA",
        FILE_REQDATA => "REQDATA",
        FILE_REQMETA => "REQMETA",
        FILE_REQCOMPLETE => "REQCOMPLETE",
        FILE_COMPLETE => "COMPLETE",
        FILE_CANCEL => "CANCEL",
        FILE_QUEUE => "QUEUE",
        FILE_HEARTBEAT => "HEARTBEAT",
        FILE_MESSAGE => "MESSAGE",
        FILE_COMMAND => "FILE_COMMAND",
        _ => "UNKNOWN",
    }
}

/// Returns true if the type belongs to the file-transfer range.
pub fn is_file_transfer(packet_type: u16) -> bool {
    packet_type & 0xFF00 == FILE_TRANSFER_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_transfer_types() {
        assert_eq!(type_name(FILE_DATA), "DATA");
        assert_eq!(type_name(FILE_QUEUE), "QUEUE");
        assert_eq!(type_name(0x04FF), "UNKNOWN");
    }

    #[test]
    fn transfer_range_is_one_group() {
        assert!(is_file_transfer(FILE_METADATA));
        assert!(is_file_transfer(FILE_COMMAND));
        assert!(!is_file_transfer(TELEMETRY));
        assert!(!is_file_transfer(0x0500));
    }
}
