//! Field-by-field codecs for file-transfer packet payloads.
//!
//! All multi-byte fields are little-endian. Names are length-prefixed with
//! one byte.
//!
//! ```text
//! METADATA     node_id | tx_id | len | agent | len | file | file_size:u32 | file_crc:u16
//! DATA         node_id | tx_id | byte_count:u16 | chunk_start:i32 | chunk
//! REQDATA      node_id | tx_id | hole_start:i32 | hole_end:i32
//! QUEUE        node_id | len | node_name | bitmap:16×u16
//! REQMETA      node_id | len | node_name | bitmap:16×u16
//! REQCOMPLETE  node_id | tx_id
//! COMPLETE     node_id | tx_id
//! CANCEL       node_id | tx_id
//! ```
//!
//! `node_id` is always the id of the node that sent the packet.

use bytes::{BufMut, BytesMut};
use spacelink_frame::packet_type::{
    self, FILE_CANCEL, FILE_COMPLETE, FILE_DATA, FILE_METADATA, FILE_QUEUE, FILE_REQCOMPLETE,
    FILE_REQDATA, FILE_REQMETA,
};
use spacelink_frame::{ByteReader, PacketComm};

use crate::chunks::FileProgress;
use crate::error::{Result, TransferError};

/// Longest node or agent name.
pub const MAX_NAME: usize = 40;

/// Longest file name.
pub const MAX_FILE_NAME: usize = 128;

/// Largest file the signed 32-bit wire offsets can address.
pub const MAX_FILE_SIZE: u64 = i32::MAX as u64;

/// Number of 16-bit words in a tx_id bitmap.
pub const BITMAP_WORDS: usize = 16;

/// Fixed part of a DATA payload.
pub const DATA_HEADER_SIZE: usize = 1 + 1 + 2 + 4;

/// Largest METADATA payload.
pub const METADATA_MAX_SIZE: usize = 1 + 1 + 1 + MAX_NAME + 1 + MAX_FILE_NAME + 4 + 2;

/// Largest QUEUE/REQMETA payload.
pub const QUEUE_MAX_SIZE: usize = 1 + 1 + MAX_NAME + 2 * BITMAP_WORDS;

/// Smallest packet size that still fits every payload type.
pub const MIN_PACKET_SIZE: usize = METADATA_MAX_SIZE;

/// Set of tx_ids, one bit per id (word `id / 16`, bit `id % 16`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxBitmap([u16; BITMAP_WORDS]);

impl TxBitmap {
    pub fn from_ids(ids: impl IntoIterator<Item = u8>) -> Self {
        let mut bitmap = Self::default();
        for id in ids {
            bitmap.insert(id);
        }
        bitmap
    }

    pub fn insert(&mut self, tx_id: u8) {
        self.0[usize::from(tx_id / 16)] |= 1 << (tx_id % 16);
    }

    pub fn contains(&self, tx_id: u8) -> bool {
        self.0[usize::from(tx_id / 16)] & (1 << (tx_id % 16)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&word| word == 0)
    }

    /// Set ids in ascending order. The reserved id 0 is never reported.
    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        (1..=u8::MAX).filter(move |&id| self.contains(id))
    }

    pub fn words(&self) -> &[u16; BITMAP_WORDS] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub node_id: u8,
    pub tx_id: u8,
    pub agent_name: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_crc: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub node_id: u8,
    pub tx_id: u8,
    pub chunk_start: u64,
    pub chunk: Vec<u8>,
}

impl Data {
    /// Byte range this packet carries. `chunk` must be non-empty.
    pub fn range(&self) -> FileProgress {
        FileProgress::new(
            self.chunk_start,
            self.chunk_start + self.chunk.len() as u64 - 1,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqData {
    pub node_id: u8,
    pub tx_id: u8,
    pub hole: FileProgress,
}

/// Payload shared by QUEUE and REQMETA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxList {
    pub node_id: u8,
    pub node_name: String,
    pub tx_ids: TxBitmap,
}

/// Payload shared by REQCOMPLETE, COMPLETE and CANCEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRef {
    pub node_id: u8,
    pub tx_id: u8,
}

/// A decoded file-transfer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePacket {
    Metadata(Metadata),
    Data(Data),
    ReqData(ReqData),
    ReqMeta(TxList),
    ReqComplete(TxRef),
    Complete(TxRef),
    Cancel(TxRef),
    Queue(TxList),
}

impl FilePacket {
    pub fn packet_type(&self) -> u16 {
        match self {
            FilePacket::Metadata(_) => FILE_METADATA,
            FilePacket::Data(_) => FILE_DATA,
            FilePacket::ReqData(_) => FILE_REQDATA,
            FilePacket::ReqMeta(_) => FILE_REQMETA,
            FilePacket::ReqComplete(_) => FILE_REQCOMPLETE,
            FilePacket::Complete(_) => FILE_COMPLETE,
            FilePacket::Cancel(_) => FILE_CANCEL,
            FilePacket::Queue(_) => FILE_QUEUE,
        }
    }

    pub fn kind(&self) -> &'static str {
        packet_type::type_name(self.packet_type())
    }

    /// Id of the node that sent this payload.
    pub fn node_id(&self) -> u8 {
        match self {
            FilePacket::Metadata(m) => m.node_id,
            FilePacket::Data(d) => d.node_id,
            FilePacket::ReqData(r) => r.node_id,
            FilePacket::ReqMeta(l) | FilePacket::Queue(l) => l.node_id,
            FilePacket::ReqComplete(r) | FilePacket::Complete(r) | FilePacket::Cancel(r) => {
                r.node_id
            }
        }
    }

    /// Transaction the payload refers to, if it names exactly one.
    pub fn tx_id(&self) -> Option<u8> {
        match self {
            FilePacket::Metadata(m) => Some(m.tx_id),
            FilePacket::Data(d) => Some(d.tx_id),
            FilePacket::ReqData(r) => Some(r.tx_id),
            FilePacket::ReqMeta(_) | FilePacket::Queue(_) => None,
            FilePacket::ReqComplete(r) | FilePacket::Complete(r) | FilePacket::Cancel(r) => {
                Some(r.tx_id)
            }
        }
    }

    /// Serialize the payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = self.kind();
        let mut out = BytesMut::with_capacity(METADATA_MAX_SIZE);
        match self {
            FilePacket::Metadata(m) => {
                if m.file_size > MAX_FILE_SIZE {
                    return Err(malformed(kind, "file size exceeds 32-bit offsets"));
                }
                out.put_u8(m.node_id);
                out.put_u8(m.tx_id);
                put_name(&mut out, &m.agent_name, MAX_NAME)?;
                put_name(&mut out, &m.file_name, MAX_FILE_NAME)?;
                out.put_u32_le(m.file_size as u32);
                out.put_u16_le(m.file_crc);
            }
            FilePacket::Data(d) => {
                if d.chunk.is_empty() || d.chunk.len() > usize::from(u16::MAX) {
                    return Err(malformed(kind, "chunk length out of range"));
                }
                out.put_u8(d.node_id);
                out.put_u8(d.tx_id);
                out.put_u16_le(d.chunk.len() as u16);
                out.put_i32_le(wire_offset(kind, d.chunk_start)?);
                out.put_slice(&d.chunk);
            }
            FilePacket::ReqData(r) => {
                out.put_u8(r.node_id);
                out.put_u8(r.tx_id);
                out.put_i32_le(wire_offset(kind, r.hole.chunk_start)?);
                out.put_i32_le(wire_offset(kind, r.hole.chunk_end)?);
            }
            FilePacket::ReqMeta(l) | FilePacket::Queue(l) => {
                out.put_u8(l.node_id);
                put_name(&mut out, &l.node_name, MAX_NAME)?;
                for word in l.tx_ids.words() {
                    out.put_u16_le(*word);
                }
            }
            FilePacket::ReqComplete(r) | FilePacket::Complete(r) | FilePacket::Cancel(r) => {
                out.put_u8(r.node_id);
                out.put_u8(r.tx_id);
            }
        }
        Ok(out.to_vec())
    }

    /// Parse the payload of a packet of `packet_type`.
    ///
    /// Returns `Ok(None)` for packet types that carry no transfer payload.
    pub fn decode(packet_type: u16, data: &[u8]) -> Result<Option<Self>> {
        let kind = packet_type::type_name(packet_type);
        let mut reader = ByteReader::new(data);
        let packet = match packet_type {
            FILE_METADATA => FilePacket::Metadata(Metadata {
                node_id: reader.u8()?,
                tx_id: reader.u8()?,
                agent_name: read_name(&mut reader, kind, MAX_NAME)?,
                file_name: read_name(&mut reader, kind, MAX_FILE_NAME)?,
                file_size: u64::from(reader.u32()?),
                file_crc: reader.u16()?,
            }),
            FILE_DATA => {
                let node_id = reader.u8()?;
                let tx_id = reader.u8()?;
                let byte_count = usize::from(reader.u16()?);
                let chunk_start = read_offset(&mut reader, kind)?;
                if byte_count == 0 {
                    return Err(malformed(kind, "empty chunk"));
                }
                FilePacket::Data(Data {
                    node_id,
                    tx_id,
                    chunk_start,
                    chunk: reader.bytes(byte_count)?.to_vec(),
                })
            }
            FILE_REQDATA => {
                let node_id = reader.u8()?;
                let tx_id = reader.u8()?;
                let start = read_offset(&mut reader, kind)?;
                let end = read_offset(&mut reader, kind)?;
                if end < start {
                    return Err(malformed(kind, "hole end before start"));
                }
                FilePacket::ReqData(ReqData {
                    node_id,
                    tx_id,
                    hole: FileProgress::new(start, end),
                })
            }
            FILE_REQMETA | FILE_QUEUE => {
                let node_id = reader.u8()?;
                let node_name = read_name(&mut reader, kind, MAX_NAME)?;
                let mut words = [0u16; BITMAP_WORDS];
                for word in &mut words {
                    *word = reader.u16()?;
                }
                let list = TxList {
                    node_id,
                    node_name,
                    tx_ids: TxBitmap(words),
                };
                if packet_type == FILE_QUEUE {
                    FilePacket::Queue(list)
                } else {
                    FilePacket::ReqMeta(list)
                }
            }
            FILE_REQCOMPLETE | FILE_COMPLETE | FILE_CANCEL => {
                let tx = TxRef {
                    node_id: reader.u8()?,
                    tx_id: reader.u8()?,
                };
                match packet_type {
                    FILE_REQCOMPLETE => FilePacket::ReqComplete(tx),
                    FILE_COMPLETE => FilePacket::Complete(tx),
                    _ => FilePacket::Cancel(tx),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }

    /// Parse the payload carried by `packet`.
    pub fn from_packet(packet: &PacketComm) -> Result<Option<Self>> {
        Self::decode(packet.packet_type(), &packet.data)
    }

    /// Build a routed packet carrying this payload.
    pub fn to_packet(&self, nodeorig: u8, nodedest: u8) -> Result<PacketComm> {
        Ok(PacketComm::new(self.packet_type(), self.encode()?).with_route(nodeorig, nodedest))
    }
}

/// Reject names that are empty, too long, or could escape their directory.
pub fn validate_name(name: &str, max: usize) -> Result<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.len() > max {
        "too long"
    } else if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        "not a plain name"
    } else {
        return Ok(());
    };
    Err(TransferError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn malformed(kind: &'static str, reason: &'static str) -> TransferError {
    TransferError::Payload { kind, reason }
}

fn put_name(out: &mut BytesMut, name: &str, max: usize) -> Result<()> {
    validate_name(name, max)?;
    out.put_u8(name.len() as u8);
    out.put_slice(name.as_bytes());
    Ok(())
}

fn read_name(reader: &mut ByteReader<'_>, kind: &'static str, max: usize) -> Result<String> {
    let len = usize::from(reader.u8()?);
    let bytes = reader.bytes(len)?;
    let name = std::str::from_utf8(bytes).map_err(|_| malformed(kind, "name is not UTF-8"))?;
    if validate_name(name, max).is_err() {
        return Err(malformed(kind, "invalid name"));
    }
    Ok(name.to_string())
}

fn wire_offset(kind: &'static str, offset: u64) -> Result<i32> {
    i32::try_from(offset).map_err(|_| malformed(kind, "offset exceeds 32 bits"))
}

fn read_offset(reader: &mut ByteReader<'_>, kind: &'static str) -> Result<u64> {
    u64::try_from(reader.i32()?).map_err(|_| malformed(kind, "negative offset"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacelink_frame::packet_type::FILE_HEARTBEAT;

    fn roundtrip(packet: FilePacket) {
        let bytes = packet.encode().unwrap();
        let decoded = FilePacket::decode(packet.packet_type(), &bytes).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn every_payload_roundtrips() {
        roundtrip(FilePacket::Metadata(Metadata {
            node_id: 1,
            tx_id: 200,
            agent_name: "camera".into(),
            file_name: "img_0001.jpg".into(),
            file_size: 50_000,
            file_crc: 0xBEEF,
        }));
        roundtrip(FilePacket::Data(Data {
            node_id: 1,
            tx_id: 200,
            chunk_start: 4180,
            chunk: vec![7; 209],
        }));
        roundtrip(FilePacket::ReqData(ReqData {
            node_id: 2,
            tx_id: 200,
            hole: FileProgress::new(100, 999),
        }));
        roundtrip(FilePacket::Queue(TxList {
            node_id: 1,
            node_name: "sat".into(),
            tx_ids: TxBitmap::from_ids([1, 17, 255]),
        }));
        roundtrip(FilePacket::ReqMeta(TxList {
            node_id: 2,
            node_name: "ground".into(),
            tx_ids: TxBitmap::from_ids([3]),
        }));
        for packet in [
            FilePacket::ReqComplete(TxRef { node_id: 1, tx_id: 9 }),
            FilePacket::Complete(TxRef { node_id: 2, tx_id: 9 }),
            FilePacket::Cancel(TxRef { node_id: 1, tx_id: 9 }),
        ] {
            roundtrip(packet);
        }
    }

    #[test]
    fn data_layout_is_little_endian() {
        let bytes = FilePacket::Data(Data {
            node_id: 5,
            tx_id: 6,
            chunk_start: 0x0102_0304,
            chunk: vec![0xAA, 0xBB],
        })
        .encode()
        .unwrap();
        assert_eq!(bytes, vec![5, 6, 2, 0, 0x04, 0x03, 0x02, 0x01, 0xAA, 0xBB]);
    }

    #[test]
    fn bitmap_layout() {
        let bitmap = TxBitmap::from_ids([1, 16, 255]);
        assert_eq!(bitmap.words()[0], 0b10);
        assert_eq!(bitmap.words()[1], 0b1);
        assert_eq!(bitmap.words()[15], 0x8000);
        assert_eq!(bitmap.ids().collect::<Vec<_>>(), vec![1, 16, 255]);
        assert!(TxBitmap::default().is_empty());
    }

    #[test]
    fn largest_payloads_fit_default_packet() {
        let meta = FilePacket::Metadata(Metadata {
            node_id: 1,
            tx_id: 1,
            agent_name: "a".repeat(MAX_NAME),
            file_name: "f".repeat(MAX_FILE_NAME),
            file_size: MAX_FILE_SIZE,
            file_crc: 0,
        });
        assert_eq!(meta.encode().unwrap().len(), METADATA_MAX_SIZE);
        assert!(METADATA_MAX_SIZE <= crate::config::DEFAULT_PACKET_SIZE);
        assert!(QUEUE_MAX_SIZE <= MIN_PACKET_SIZE);
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        let bytes = FilePacket::ReqData(ReqData {
            node_id: 2,
            tx_id: 3,
            hole: FileProgress::new(0, 10),
        })
        .encode()
        .unwrap();
        for len in 0..bytes.len() {
            assert!(FilePacket::decode(FILE_REQDATA, &bytes[..len]).is_err());
        }
    }

    #[test]
    fn data_byte_count_must_be_backed() {
        let mut bytes = FilePacket::Data(Data {
            node_id: 1,
            tx_id: 1,
            chunk_start: 0,
            chunk: vec![1, 2, 3],
        })
        .encode()
        .unwrap();
        bytes.pop();
        assert!(FilePacket::decode(FILE_DATA, &bytes).is_err());
    }

    #[test]
    fn negative_offsets_are_rejected() {
        let mut bytes = vec![1, 1, 1, 0];
        bytes.extend_from_slice(&(-5i32).to_le_bytes());
        bytes.push(0);
        assert!(matches!(
            FilePacket::decode(FILE_DATA, &bytes),
            Err(TransferError::Payload { .. })
        ));
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(validate_name(name, MAX_FILE_NAME).is_err(), "{name:?}");
        }
        assert!(validate_name("x".repeat(129).as_str(), MAX_FILE_NAME).is_err());
        assert!(validate_name("report.txt", MAX_FILE_NAME).is_ok());
    }

    #[test]
    fn non_transfer_types_decode_to_none() {
        assert!(FilePacket::decode(FILE_HEARTBEAT, &[1, 2, 3]).unwrap().is_none());
        assert!(FilePacket::decode(0x0001, &[]).unwrap().is_none());
    }
}
