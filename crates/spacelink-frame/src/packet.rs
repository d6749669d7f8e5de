use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::ax25::{self, Ax25Handle};
use crate::crc::{Crc16, CrcPreset};
use crate::endian::{invert_bytes, ByteReader};
use crate::error::{ensure_len, FrameError, Result};
use crate::lfsr;
use crate::packet_type::MINIMAL_TYPE_MAX;
use crate::slip;

/// V2 header: type (2) + data_size (2) + 4 routing bytes = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// V2 CRC trailer size.
pub const CRC_SIZE: usize = 2;

/// Largest payload a V2 header can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Frame-sync marker preceding a payload sent as-is.
pub const SYNC_MARKER: [u8; 4] = [0x1A, 0xCF, 0xFC, 0x1D];

/// Complement of [`SYNC_MARKER`]; the payload that follows is bit-inverted.
pub const SYNC_MARKER_INVERTED: [u8; 4] = [0xE5, 0x30, 0x03, 0xE2];

/// Default number of HDLC flags on each side of a stuffed frame.
pub const DEFAULT_FLAG_COUNT: usize = 2;

static V2_CRC: Crc16 = Crc16::new(CrcPreset::CcittFalse);

/// Header layout used when wrapping a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketStyle {
    /// Payload only; the link carries no header at all.
    None,
    /// One byte: 4-bit checksum + 4-bit type. No length, no CRC.
    Minimal,
    /// Legacy 3-byte header. Not supported.
    V1,
    /// 8-byte header + payload + CRC-16.
    #[default]
    V2,
}

/// PacketComm routing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub packet_type: u16,
    pub data_size: u16,
    pub nodeorig: u8,
    pub nodedest: u8,
    pub chanorig: u8,
    pub chandest: u8,
}

/// Options for frame-sync-marker framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsmOptions {
    /// XOR the frame with the LFSR keystream.
    pub scramble: bool,
    /// Send the payload bit-inverted behind the complemented marker.
    pub invert: bool,
}

/// How a wrapped packet is put on a particular medium.
#[derive(Debug, Clone, Default)]
pub enum LinkEncoding {
    Raw,
    #[default]
    Slip,
    Asm(AsmOptions),
    Hdlc { flag_count: usize },
    Ax25 { handle: Ax25Handle, flag_count: usize },
}

/// A typed payload with routing header.
///
/// `wrap`/`unwrap` handle the header and checksum; the `pack_*`/`unpack_*`
/// pairs add the per-medium framing on top. Every decoding path leaves the
/// packet untouched unless the whole input was valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketComm {
    pub header: PacketHeader,
    pub data: Vec<u8>,
}

impl PacketComm {
    pub fn new(packet_type: u16, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            header: PacketHeader {
                packet_type,
                data_size: data.len().min(MAX_PAYLOAD) as u16,
                ..PacketHeader::default()
            },
            data,
        }
    }

    /// Set origin and destination node ids.
    pub fn with_route(mut self, nodeorig: u8, nodedest: u8) -> Self {
        self.header.nodeorig = nodeorig;
        self.header.nodedest = nodedest;
        self
    }

    /// Set origin and destination channels.
    pub fn with_channels(mut self, chanorig: u8, chandest: u8) -> Self {
        self.header.chanorig = chanorig;
        self.header.chandest = chandest;
        self
    }

    pub fn packet_type(&self) -> u16 {
        self.header.packet_type
    }

    /// Serialize header + payload in `style`.
    ///
    /// Wire layout (V2, little-endian):
    /// ```text
    /// ┌──────────┬───────────┬──────┬──────┬──────┬──────┬─────────┬──────────┐
    /// │ type (2) │ size (2)  │ norig│ ndest│ corig│ cdest│ payload │ crc (2)  │
    /// └──────────┴───────────┴──────┴──────┴──────┴──────┴─────────┴──────────┘
    /// ```
    /// The CRC (CCITT-FALSE) covers header and payload; with
    /// `calc_checksum == false` it is written as zero. Minimal style packs
    /// `(sum(payload) & 0xF) << 4 | type` into a single leading byte.
    pub fn wrap(&mut self, style: PacketStyle, calc_checksum: bool) -> Result<Vec<u8>> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: self.data.len(),
                max: MAX_PAYLOAD,
            });
        }
        self.header.data_size = self.data.len() as u16;

        match style {
            PacketStyle::None => Ok(self.data.clone()),
            PacketStyle::Minimal => {
                if self.header.packet_type > MINIMAL_TYPE_MAX {
                    return Err(FrameError::TypeOutOfRange(self.header.packet_type));
                }
                let nibble = if calc_checksum {
                    minimal_checksum(&self.data)
                } else {
                    0
                };
                let mut out = Vec::with_capacity(1 + self.data.len());
                out.push((nibble << 4) | self.header.packet_type as u8);
                out.extend_from_slice(&self.data);
                Ok(out)
            }
            PacketStyle::V1 => Err(FrameError::UnsupportedStyle("V1")),
            PacketStyle::V2 => {
                let mut out = BytesMut::with_capacity(HEADER_SIZE + self.data.len() + CRC_SIZE);
                out.put_u16_le(self.header.packet_type);
                out.put_u16_le(self.header.data_size);
                out.put_u8(self.header.nodeorig);
                out.put_u8(self.header.nodedest);
                out.put_u8(self.header.chanorig);
                out.put_u8(self.header.chandest);
                out.put_slice(&self.data);
                let crc = if calc_checksum {
                    V2_CRC.calculate(&out)
                } else {
                    0
                };
                out.put_u16_le(crc);
                Ok(out.to_vec())
            }
        }
    }

    /// Parse `wire` in `style`, returning the payload size.
    ///
    /// V2 needs a full header, enough bytes for the declared payload and the
    /// CRC; trailing bytes beyond that are ignored. Minimal treats the whole
    /// buffer after the first byte as payload, so one datagram carries
    /// exactly one Minimal packet.
    pub fn unwrap(&mut self, wire: &[u8], style: PacketStyle, checkcrc: bool) -> Result<usize> {
        match style {
            PacketStyle::None => {
                self.header = PacketHeader {
                    data_size: wire.len().min(MAX_PAYLOAD) as u16,
                    ..PacketHeader::default()
                };
                self.data = wire.to_vec();
                Ok(self.data.len())
            }
            PacketStyle::Minimal => {
                ensure_len(wire, 1)?;
                let payload = &wire[1..];
                let expected = wire[0] >> 4;
                if checkcrc {
                    let actual = minimal_checksum(payload);
                    if actual != expected {
                        return Err(FrameError::ChecksumMismatch { expected, actual });
                    }
                }
                self.header = PacketHeader {
                    packet_type: u16::from(wire[0] & 0x0F),
                    data_size: payload.len().min(MAX_PAYLOAD) as u16,
                    ..PacketHeader::default()
                };
                self.data = payload.to_vec();
                Ok(self.data.len())
            }
            PacketStyle::V1 => Err(FrameError::UnsupportedStyle("V1")),
            PacketStyle::V2 => {
                ensure_len(wire, HEADER_SIZE + CRC_SIZE)?;
                let mut reader = ByteReader::new(wire);
                let header = PacketHeader {
                    packet_type: reader.u16()?,
                    data_size: reader.u16()?,
                    nodeorig: reader.u8()?,
                    nodedest: reader.u8()?,
                    chanorig: reader.u8()?,
                    chandest: reader.u8()?,
                };
                let body_len = HEADER_SIZE + usize::from(header.data_size);
                if wire.len() < body_len + CRC_SIZE {
                    return Err(FrameError::LengthMismatch {
                        declared: usize::from(header.data_size),
                        actual: wire.len().saturating_sub(HEADER_SIZE + CRC_SIZE),
                    });
                }
                if checkcrc {
                    let expected = u16::from_le_bytes([wire[body_len], wire[body_len + 1]]);
                    let actual = V2_CRC.calculate(&wire[..body_len]);
                    if expected != actual {
                        return Err(FrameError::CrcMismatch { expected, actual });
                    }
                }
                self.header = header;
                self.data = wire[HEADER_SIZE..body_len].to_vec();
                Ok(self.data.len())
            }
        }
    }

    /// V2 with CRC, no link framing.
    pub fn pack_raw(&mut self) -> Result<Vec<u8>> {
        self.wrap(PacketStyle::V2, true)
    }

    pub fn unpack_raw(&mut self, wire: &[u8], checkcrc: bool) -> Result<usize> {
        self.unwrap(wire, PacketStyle::V2, checkcrc)
    }

    /// V2 with CRC inside one SLIP frame.
    pub fn pack_slip(&mut self) -> Result<Vec<u8>> {
        Ok(slip::encode(&self.wrap(PacketStyle::V2, true)?))
    }

    pub fn unpack_slip(&mut self, wire: &[u8], checkcrc: bool) -> Result<usize> {
        let body = slip::decode(wire)?;
        self.unwrap(&body, PacketStyle::V2, checkcrc)
    }

    /// Sync marker followed by the V2 frame, optionally scrambled and/or
    /// inverted. Scrambling is applied before inversion.
    pub fn pack_asm(&mut self, options: AsmOptions) -> Result<Vec<u8>> {
        let mut body = self.wrap(PacketStyle::V2, true)?;
        if options.scramble {
            body = lfsr::scramble(&body);
        }
        let (marker, body) = if options.invert {
            (SYNC_MARKER_INVERTED, invert_bytes(&body))
        } else {
            (SYNC_MARKER, body)
        };
        let mut out = Vec::with_capacity(marker.len() + body.len());
        out.extend_from_slice(&marker);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Reverse of [`pack_asm`](Self::pack_asm). The marker tells whether
    /// the body is inverted; `descramble` must match the sender's setting.
    pub fn unpack_asm(&mut self, wire: &[u8], descramble: bool, checkcrc: bool) -> Result<usize> {
        ensure_len(wire, SYNC_MARKER.len())?;
        let mut marker = [0u8; 4];
        marker.copy_from_slice(&wire[..4]);
        let mut body = match marker {
            SYNC_MARKER => wire[4..].to_vec(),
            SYNC_MARKER_INVERTED => {
                trace!("inverted sync marker");
                invert_bytes(&wire[4..])
            }
            other => return Err(FrameError::MarkerMismatch(other)),
        };
        if descramble {
            body = lfsr::scramble(&body);
        }
        self.unwrap(&body, PacketStyle::V2, checkcrc)
    }

    /// V2 frame bit-stuffed between HDLC flags.
    pub fn pack_hdlc(&mut self, flag_count: usize) -> Result<Vec<u8>> {
        Ok(ax25::stuff(
            &self.wrap(PacketStyle::V2, true)?,
            flag_count,
            ax25::FLAG,
        ))
    }

    pub fn unpack_hdlc(&mut self, wire: &[u8], checkcrc: bool) -> Result<usize> {
        let body = ax25::unstuff(wire, ax25::FLAG);
        self.unwrap(&body, PacketStyle::V2, checkcrc)
    }

    /// V2 frame as the information field of an AX.25 UI frame, stuffed.
    pub fn pack_ax25(&mut self, handle: &Ax25Handle, flag_count: usize) -> Result<Vec<u8>> {
        let frame = handle.load(&self.wrap(PacketStyle::V2, true)?);
        Ok(handle.stuff(&frame, flag_count))
    }

    pub fn unpack_ax25(&mut self, handle: &Ax25Handle, wire: &[u8], checkcrc: bool) -> Result<usize> {
        let frame = handle.unload(&handle.unstuff(wire))?;
        if checkcrc && !frame.crc_ok() {
            return Err(FrameError::CrcMismatch {
                expected: frame.crc_received,
                actual: frame.crc_calculated,
            });
        }
        self.unwrap(&frame.payload, PacketStyle::V2, checkcrc)
    }

    /// Encode for `link`.
    pub fn pack(&mut self, link: &LinkEncoding) -> Result<Vec<u8>> {
        match link {
            LinkEncoding::Raw => self.pack_raw(),
            LinkEncoding::Slip => self.pack_slip(),
            LinkEncoding::Asm(options) => self.pack_asm(*options),
            LinkEncoding::Hdlc { flag_count } => self.pack_hdlc(*flag_count),
            LinkEncoding::Ax25 { handle, flag_count } => self.pack_ax25(handle, *flag_count),
        }
    }

    /// Decode from `link`, always checking CRCs.
    pub fn unpack(&mut self, link: &LinkEncoding, wire: &[u8]) -> Result<usize> {
        match link {
            LinkEncoding::Raw => self.unpack_raw(wire, true),
            LinkEncoding::Slip => self.unpack_slip(wire, true),
            LinkEncoding::Asm(options) => self.unpack_asm(wire, options.scramble, true),
            LinkEncoding::Hdlc { .. } => self.unpack_hdlc(wire, true),
            LinkEncoding::Ax25 { handle, .. } => self.unpack_ax25(handle, wire, true),
        }
    }
}

fn minimal_checksum(payload: &[u8]) -> u8 {
    (payload.iter().fold(0u32, |acc, &b| acc + u32::from(b)) & 0x0F) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_type::{FILE_DATA, PING};

    fn sample(size: usize) -> PacketComm {
        let data: Vec<u8> = (0..size).map(|i| (i * 31 % 256) as u8).collect();
        PacketComm::new(FILE_DATA, data)
            .with_route(1, 2)
            .with_channels(3, 4)
    }

    #[test]
    fn v2_roundtrip_for_various_sizes() {
        for size in [0usize, 1, 216, 217, 1400] {
            let mut sent = sample(size);
            let wire = sent.wrap(PacketStyle::V2, true).unwrap();
            assert_eq!(wire.len(), HEADER_SIZE + size + CRC_SIZE);

            let mut received = PacketComm::default();
            assert_eq!(received.unwrap(&wire, PacketStyle::V2, true).unwrap(), size);
            assert_eq!(received, sent);
        }
    }

    #[test]
    fn v2_header_is_little_endian() {
        let mut packet = sample(3);
        let wire = packet.wrap(PacketStyle::V2, true).unwrap();
        assert_eq!(&wire[..8], &[0x01, 0x04, 0x03, 0x00, 1, 2, 3, 4]);
        let crc = V2_CRC.calculate(&wire[..11]);
        assert_eq!(&wire[11..], &crc.to_le_bytes());
    }

    #[test]
    fn wrap_updates_data_size() {
        let mut packet = sample(4);
        packet.data.extend_from_slice(&[9, 9]);
        packet.wrap(PacketStyle::V2, true).unwrap();
        assert_eq!(packet.header.data_size, 6);
    }

    #[test]
    fn minimal_roundtrip_and_checksum() {
        for size in [0usize, 1, 100] {
            let mut sent = PacketComm::new(PING, vec![0x11; size]);
            let wire = sent.wrap(PacketStyle::Minimal, true).unwrap();
            assert_eq!(wire.len(), size + 1);
            assert_eq!(wire[0] & 0x0F, PING as u8);
            assert_eq!(wire[0] >> 4, ((0x11 * size) & 0x0F) as u8);

            let mut received = PacketComm::default();
            received.unwrap(&wire, PacketStyle::Minimal, true).unwrap();
            assert_eq!(received.data, sent.data);
            assert_eq!(received.header.packet_type, PING);
        }
    }

    #[test]
    fn minimal_rejects_wide_types() {
        let mut packet = PacketComm::new(FILE_DATA, vec![1]);
        assert!(matches!(
            packet.wrap(PacketStyle::Minimal, true),
            Err(FrameError::TypeOutOfRange(FILE_DATA))
        ));
    }

    #[test]
    fn minimal_checksum_mismatch_is_detected() {
        let mut packet = PacketComm::new(PING, vec![1, 2, 3]);
        let mut wire = packet.wrap(PacketStyle::Minimal, true).unwrap();
        wire[2] ^= 0x01;
        let mut received = PacketComm::default();
        assert!(matches!(
            received.unwrap(&wire, PacketStyle::Minimal, true),
            Err(FrameError::ChecksumMismatch { .. })
        ));
        assert!(received.unwrap(&wire, PacketStyle::Minimal, false).is_ok());
    }

    #[test]
    fn v1_is_unsupported() {
        let mut packet = sample(1);
        assert!(matches!(
            packet.wrap(PacketStyle::V1, true),
            Err(FrameError::UnsupportedStyle(_))
        ));
        assert!(packet.unwrap(&[0; 16], PacketStyle::V1, true).is_err());
    }

    #[test]
    fn corrupted_payload_fails_crc_and_leaves_packet_alone() {
        let mut sent = sample(20);
        let mut wire = sent.wrap(PacketStyle::V2, true).unwrap();
        wire[HEADER_SIZE + 5] ^= 0x40;

        let mut received = sample(2);
        let before = received.clone();
        let err = received.unwrap(&wire, PacketStyle::V2, true).unwrap_err();
        assert!(matches!(err, FrameError::CrcMismatch { .. }));
        assert_eq!(received, before);
    }

    #[test]
    fn truncated_v2_is_rejected() {
        let mut sent = sample(20);
        let wire = sent.wrap(PacketStyle::V2, true).unwrap();
        let mut received = PacketComm::default();
        assert!(matches!(
            received.unwrap(&wire[..5], PacketStyle::V2, true),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            received.unwrap(&wire[..wire.len() - 1], PacketStyle::V2, true),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut sent = sample(5);
        let mut wire = sent.wrap(PacketStyle::V2, true).unwrap();
        wire.extend_from_slice(&[0xAA, 0xBB]);
        let mut received = PacketComm::default();
        assert_eq!(received.unwrap(&wire, PacketStyle::V2, true).unwrap(), 5);
    }

    #[test]
    fn every_link_encoding_roundtrips() {
        let links = vec![
            LinkEncoding::Raw,
            LinkEncoding::Slip,
            LinkEncoding::Asm(AsmOptions::default()),
            LinkEncoding::Asm(AsmOptions {
                scramble: true,
                invert: false,
            }),
            LinkEncoding::Asm(AsmOptions {
                scramble: true,
                invert: true,
            }),
            LinkEncoding::Hdlc {
                flag_count: DEFAULT_FLAG_COUNT,
            },
            LinkEncoding::Ax25 {
                handle: Ax25Handle::new("NODE2", "NODE1").unwrap(),
                flag_count: DEFAULT_FLAG_COUNT,
            },
        ];
        for link in links {
            let mut sent = sample(300);
            let wire = sent.pack(&link).unwrap();
            let mut received = PacketComm::default();
            received.unpack(&link, &wire).unwrap();
            assert_eq!(received, sent, "link {link:?}");
        }
    }

    #[test]
    fn asm_marker_reflects_inversion() {
        let mut packet = sample(8);
        let plain = packet.pack_asm(AsmOptions::default()).unwrap();
        assert_eq!(&plain[..4], &SYNC_MARKER);
        let inverted = packet
            .pack_asm(AsmOptions {
                scramble: false,
                invert: true,
            })
            .unwrap();
        assert_eq!(&inverted[..4], &SYNC_MARKER_INVERTED);
        assert_eq!(inverted[4], !plain[4]);
    }

    #[test]
    fn asm_rejects_unknown_marker() {
        let mut packet = PacketComm::default();
        assert!(matches!(
            packet.unpack_asm(&[0, 1, 2, 3, 4, 5], false, true),
            Err(FrameError::MarkerMismatch(_))
        ));
        assert!(matches!(
            packet.unpack_asm(&[0x1A, 0xCF], false, true),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn slip_garbage_is_rejected() {
        let mut packet = PacketComm::default();
        assert!(packet.unpack_slip(&[slip::FEND, 1, 2, 3], true).is_err());
    }

    #[test]
    fn ax25_crc_failure_is_reported() {
        let handle = Ax25Handle::new("B", "A").unwrap();
        let mut packet = sample(10);
        let frame = handle.load(&packet.wrap(PacketStyle::V2, true).unwrap());
        let mut corrupted = frame.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        let wire = handle.stuff(&corrupted, 1);
        let mut received = PacketComm::default();
        assert!(matches!(
            received.unpack_ax25(&handle, &wire, true),
            Err(FrameError::CrcMismatch { .. })
        ));
    }
}
