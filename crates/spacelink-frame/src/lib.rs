//! Packet envelopes and link-layer framing for space links.
//!
//! Every packet carries a type, a length, origin/destination node and
//! channel bytes, and a CRC-16. The same envelope can then be put on
//! different media:
//! - raw datagrams (UDP)
//! - SLIP byte stuffing (serial lines, files)
//! - a 32-bit sync marker with optional scrambling and inversion (radio)
//! - HDLC bit stuffing, optionally inside an AX.25 UI frame (amateur radio)
//!
//! Decoding never mutates a packet unless the input was fully valid.

pub mod ax25;
#[cfg(feature = "async")]
pub mod codec;
pub mod crc;
pub mod endian;
pub mod error;
pub mod lfsr;
pub mod packet;
pub mod packet_type;
pub mod reader;
pub mod slip;
pub mod writer;

pub use ax25::{Ax25Frame, Ax25Handle, Ax25Header};
#[cfg(feature = "async")]
pub use codec::SlipCodec;
pub use crc::{Crc16, CrcParams, CrcPreset, FileReadBuffer, CHECK_INPUT};
pub use endian::{local_byte_order, ByteOrder, ByteReader};
pub use error::{FrameError, Result};
pub use packet::{
    AsmOptions, LinkEncoding, PacketComm, PacketHeader, PacketStyle, CRC_SIZE,
    DEFAULT_FLAG_COUNT, HEADER_SIZE, MAX_PAYLOAD,
};
pub use reader::SlipReader;
pub use writer::SlipWriter;
