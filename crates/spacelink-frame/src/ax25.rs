//! AX.25 UI framing and HDLC bit stuffing.
//!
//! Address header layout (16 bytes):
//! ```text
//! ┌────────────────┬──────┬────────────────┬──────┬─────────┬─────────┐
//! │ Dest call (6B) │ SSID │ Src call (6B)  │ SSID │ Control │ PID     │
//! │ ASCII << 1     │ (1B) │ ASCII << 1     │ (1B) │ (1B)    │ (1B)    │
//! └────────────────┴──────┴────────────────┴──────┴─────────┴─────────┘
//! ```
//! followed by the information field and a CRC-16/HDLC trailer (low byte
//! first). On the air the whole frame is bit-stuffed between `0x7E` flags.

use crate::crc::{Crc16, CrcPreset};
use crate::error::{ensure_len, FrameError, Result};

/// HDLC flag byte.
pub const FLAG: u8 = 0x7E;

/// Length of the callsign field.
pub const CALLSIGN_LEN: usize = 6;

/// Length of the address + control + PID header.
pub const HEADER_LEN: usize = 2 * (CALLSIGN_LEN + 1) + 2;

/// Length of the CRC trailer.
pub const CRC_LEN: usize = 2;

/// Decoded AX.25 address and control fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Header {
    pub dest_callsign: String,
    pub dest_stationid: u8,
    pub source_callsign: String,
    pub source_stationid: u8,
    pub control: u8,
    pub protocol_id: u8,
}

impl Default for Ax25Header {
    fn default() -> Self {
        Self {
            dest_callsign: String::new(),
            dest_stationid: 0x60,
            source_callsign: String::new(),
            source_stationid: 0x61,
            control: 0x03,
            protocol_id: 0xF0,
        }
    }
}

/// A frame parsed by [`Ax25Handle::unload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub header: Ax25Header,
    pub payload: Vec<u8>,
    /// CRC carried in the frame trailer.
    pub crc_received: u16,
    /// CRC recomputed over header and payload.
    pub crc_calculated: u16,
}

impl Ax25Frame {
    pub fn crc_ok(&self) -> bool {
        self.crc_received == self.crc_calculated
    }
}

/// Builds and parses AX.25 frames for one pair of stations.
#[derive(Debug, Clone)]
pub struct Ax25Handle {
    header: Ax25Header,
    flag: u8,
    crc: Crc16,
}

impl Ax25Handle {
    /// Handle for frames from `source` to `dest` with default SSIDs,
    /// control 0x03 (UI) and PID 0xF0 (no layer 3).
    pub fn new(dest: &str, source: &str) -> Result<Self> {
        let mut handle = Self::default();
        handle.set_destination(dest, 0x60)?;
        handle.set_source(source, 0x61)?;
        Ok(handle)
    }

    pub fn set_destination(&mut self, callsign: &str, stationid: u8) -> Result<()> {
        self.header.dest_callsign = normalize_callsign(callsign)?;
        self.header.dest_stationid = stationid;
        Ok(())
    }

    pub fn set_source(&mut self, callsign: &str, stationid: u8) -> Result<()> {
        self.header.source_callsign = normalize_callsign(callsign)?;
        self.header.source_stationid = stationid;
        Ok(())
    }

    pub fn with_control(mut self, control: u8) -> Self {
        self.header.control = control;
        self
    }

    pub fn with_protocol_id(mut self, protocol_id: u8) -> Self {
        self.header.protocol_id = protocol_id;
        self
    }

    pub fn with_flag(mut self, flag: u8) -> Self {
        self.flag = flag;
        self
    }

    pub fn header(&self) -> &Ax25Header {
        &self.header
    }

    pub fn flag(&self) -> u8 {
        self.flag
    }

    /// Header + payload + CRC-16/HDLC.
    pub fn load(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
        push_callsign(&mut frame, &self.header.dest_callsign);
        frame.push(self.header.dest_stationid);
        push_callsign(&mut frame, &self.header.source_callsign);
        frame.push(self.header.source_stationid);
        frame.push(self.header.control);
        frame.push(self.header.protocol_id);
        frame.extend_from_slice(payload);
        let crc = self.crc.calculate(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Parse a frame produced by [`load`](Self::load).
    ///
    /// The CRC is recomputed but not enforced; check
    /// [`Ax25Frame::crc_ok`].
    pub fn unload(&self, frame: &[u8]) -> Result<Ax25Frame> {
        ensure_len(frame, HEADER_LEN + CRC_LEN)?;
        let body_len = frame.len() - CRC_LEN;
        let header = Ax25Header {
            dest_callsign: read_callsign(&frame[0..CALLSIGN_LEN])?,
            dest_stationid: frame[CALLSIGN_LEN],
            source_callsign: read_callsign(&frame[CALLSIGN_LEN + 1..2 * CALLSIGN_LEN + 1])?,
            source_stationid: frame[2 * CALLSIGN_LEN + 1],
            control: frame[2 * CALLSIGN_LEN + 2],
            protocol_id: frame[2 * CALLSIGN_LEN + 3],
        };
        Ok(Ax25Frame {
            header,
            payload: frame[HEADER_LEN..body_len].to_vec(),
            crc_received: u16::from_le_bytes([frame[body_len], frame[body_len + 1]]),
            crc_calculated: self.crc.calculate(&frame[..body_len]),
        })
    }

    /// Bit-stuff `frame` between `flag_count` flags on each side.
    pub fn stuff(&self, frame: &[u8], flag_count: usize) -> Vec<u8> {
        stuff(frame, flag_count, self.flag)
    }

    pub fn unstuff(&self, stream: &[u8]) -> Vec<u8> {
        unstuff(stream, self.flag)
    }
}

impl Default for Ax25Handle {
    fn default() -> Self {
        Self {
            header: Ax25Header::default(),
            flag: FLAG,
            crc: Crc16::new(CrcPreset::Hdlc),
        }
    }
}

fn normalize_callsign(callsign: &str) -> Result<String> {
    if callsign.len() > CALLSIGN_LEN {
        return Err(FrameError::Ax25("callsign longer than 6 characters"));
    }
    if !callsign.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(FrameError::Ax25("callsign must be ascii alphanumeric"));
    }
    Ok(callsign.to_ascii_uppercase())
}

fn push_callsign(frame: &mut Vec<u8>, callsign: &str) {
    let bytes = callsign.as_bytes();
    for i in 0..CALLSIGN_LEN {
        let ch = bytes.get(i).copied().unwrap_or(b' ');
        frame.push(ch << 1);
    }
}

fn read_callsign(field: &[u8]) -> Result<String> {
    let mut callsign = String::with_capacity(CALLSIGN_LEN);
    for &byte in field {
        if byte & 1 != 0 {
            return Err(FrameError::Ax25("address extension bit set inside callsign"));
        }
        callsign.push(char::from(byte >> 1));
    }
    Ok(callsign.trim_end().to_string())
}

struct BitWriter {
    out: Vec<u8>,
    current: u8,
    count: u8,
}

impl BitWriter {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            out: Vec::with_capacity(bytes),
            current: 0,
            count: 0,
        }
    }

    fn push(&mut self, bit: u8) {
        self.current = (self.current << 1) | (bit & 1);
        self.count += 1;
        if self.count == 8 {
            self.out.push(self.current);
            self.current = 0;
            self.count = 0;
        }
    }

    fn push_byte_msb(&mut self, byte: u8) {
        for i in (0..8).rev() {
            self.push((byte >> i) & 1);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            self.out.push(self.current << (8 - self.count));
        }
        self.out
    }
}

/// HDLC bit stuffing.
///
/// Emits `flag_count` flags, then the bits of `data` (each byte LSB
/// first) with a 0 inserted after every run of five 1s, then
/// `flag_count` flags again. Output bits are packed MSB first; the last
/// byte is zero padded.
pub fn stuff(data: &[u8], flag_count: usize, flag: u8) -> Vec<u8> {
    let mut writer = BitWriter::with_capacity(data.len() + data.len() / 5 + 2 * flag_count + 1);
    for _ in 0..flag_count {
        writer.push_byte_msb(flag);
    }
    let mut ones = 0;
    for &byte in data {
        for i in 0..8 {
            let bit = (byte >> i) & 1;
            writer.push(bit);
            if bit == 1 {
                ones += 1;
                if ones == 5 {
                    writer.push(0);
                    ones = 0;
                }
            } else {
                ones = 0;
            }
        }
    }
    for _ in 0..flag_count {
        writer.push_byte_msb(flag);
    }
    writer.finish()
}

/// Reverse of [`stuff`].
///
/// Leading whole `flag` bytes are skipped. Bits are read MSB first; a 0
/// after five 1s is dropped, and six 1s in a row mark the closing flag,
/// which ends the frame. Decoded bytes equal to the flag value are kept
/// as data. Trailing bits that do not fill a byte are discarded.
pub fn unstuff(stream: &[u8], flag: u8) -> Vec<u8> {
    let start = stream.iter().position(|&b| b != flag).unwrap_or(stream.len());
    let mut bits: Vec<u8> = Vec::with_capacity((stream.len() - start) * 8);
    let mut ones = 0;
    'outer: for &byte in &stream[start..] {
        for i in (0..8).rev() {
            let bit = (byte >> i) & 1;
            if bit == 1 {
                ones += 1;
                if ones == 6 {
                    // Closing flag: drop its leading 0 and the five 1s
                    // already taken as data.
                    bits.truncate(bits.len().saturating_sub(6));
                    break 'outer;
                }
                bits.push(1);
            } else {
                if ones != 5 {
                    bits.push(0);
                }
                ones = 0;
            }
        }
    }

    bits.chunks_exact(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | (bit << i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_builds_shifted_header_and_crc() {
        let handle = Ax25Handle::new("CQ", "kh6hsf").unwrap();
        let frame = handle.load(b"hi");

        assert_eq!(frame.len(), HEADER_LEN + 2 + CRC_LEN);
        assert_eq!(&frame[0..6], &[b'C' << 1, b'Q' << 1, 0x40, 0x40, 0x40, 0x40]);
        assert_eq!(frame[6], 0x60);
        assert_eq!(frame[7], b'K' << 1);
        assert_eq!(frame[13], 0x61);
        assert_eq!(frame[14], 0x03);
        assert_eq!(frame[15], 0xF0);
        assert_eq!(&frame[16..18], b"hi");

        let crc = Crc16::new(CrcPreset::Hdlc).calculate(&frame[..18]);
        assert_eq!(frame[18], (crc & 0xFF) as u8);
        assert_eq!(frame[19], (crc >> 8) as u8);
    }

    #[test]
    fn unload_inverts_load() {
        let handle = Ax25Handle::new("GROUND", "SAT1")
            .unwrap()
            .with_control(0x13)
            .with_protocol_id(0xCC);
        let frame = handle.load(&[0, 1, 2, 0x7E, 0xFF]);
        let parsed = handle.unload(&frame).unwrap();

        assert_eq!(parsed.header.dest_callsign, "GROUND");
        assert_eq!(parsed.header.source_callsign, "SAT1");
        assert_eq!(parsed.header.control, 0x13);
        assert_eq!(parsed.header.protocol_id, 0xCC);
        assert_eq!(parsed.payload, vec![0, 1, 2, 0x7E, 0xFF]);
        assert!(parsed.crc_ok());
    }

    #[test]
    fn unload_reports_corruption() {
        let handle = Ax25Handle::new("A", "B").unwrap();
        let mut frame = handle.load(b"payload");
        frame[17] ^= 0x01;
        let parsed = handle.unload(&frame).unwrap();
        assert!(!parsed.crc_ok());
    }

    #[test]
    fn unload_rejects_short_frames() {
        let handle = Ax25Handle::default();
        assert!(matches!(
            handle.unload(&[0u8; HEADER_LEN]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn long_callsign_is_rejected() {
        assert!(Ax25Handle::new("TOOLONG", "B").is_err());
        assert!(Ax25Handle::new("A-1", "B").is_err());
    }

    #[test]
    fn stuffing_inserts_zero_after_five_ones() {
        // 0x1F LSB first is 11111000: one stuffed zero after the run.
        let out = stuff(&[0x1F], 0, FLAG);
        assert_eq!(out, vec![0b1111_1000, 0b0000_0000]);
    }

    #[test]
    fn stuffing_carries_runs_across_bytes() {
        // 0xC0 ends with two ones, 0x07 starts with three: five in a row.
        let out = stuff(&[0xC0, 0x07], 0, FLAG);
        // bits: 00000011 | 111 (0) 00000
        assert_eq!(out, vec![0b0000_0011, 0b1110_0000, 0b0000_0000]);
        assert_eq!(unstuff(&out, FLAG), vec![0xC0, 0x07]);
    }

    #[test]
    fn flags_frame_the_stuffed_data() {
        let out = stuff(&[0x00], 2, FLAG);
        assert_eq!(&out[..2], &[FLAG, FLAG]);
        assert_eq!(out[2], 0x00);
        assert_eq!(&out[3..5], &[FLAG, FLAG]);
    }

    #[test]
    fn unstuff_inverts_stuff_for_long_runs() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x1F],
            vec![0x3F],
            vec![0xFF, 0x03],
            vec![0xFF; 16],
            vec![FLAG, 0x00, FLAG, FLAG],
            (0..=255u8).collect(),
        ];
        for data in cases {
            for flags in [1, 3] {
                let stuffed = stuff(&data, flags, FLAG);
                assert_eq!(unstuff(&stuffed, FLAG), data, "flags={flags} data={data:02x?}");
            }
        }
    }

    #[test]
    fn stuffed_stream_never_contains_six_ones() {
        let data = vec![0xFF; 32];
        let stuffed = stuff(&data, 0, FLAG);
        let mut ones = 0;
        for byte in stuffed {
            for i in (0..8).rev() {
                if (byte >> i) & 1 == 1 {
                    ones += 1;
                    assert!(ones < 6);
                } else {
                    ones = 0;
                }
            }
        }
    }

    #[test]
    fn unstuff_without_closing_flag_keeps_whole_bytes() {
        let stuffed = stuff(&[0xA5, 0x5A, 0xFF], 0, FLAG);
        assert_eq!(unstuff(&stuffed, FLAG), vec![0xA5, 0x5A, 0xFF]);
    }

    #[test]
    fn full_ax25_roundtrip_through_hdlc() {
        let handle = Ax25Handle::new("NODE2", "NODE1").unwrap();
        let frame = handle.load(b"\x7e\x7e telemetry \xff\xff");
        let air = handle.stuff(&frame, 4);
        let back = handle.unstuff(&air);
        assert_eq!(back, frame);
        assert!(handle.unload(&back).unwrap().crc_ok());
    }
}
