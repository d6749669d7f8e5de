//! `.meta` persistence for in-flight transactions.
//!
//! ```text
//! ┌─────────────┬───────────────┬──────────────┬────────────────┬──────────────────────────────┐
//! │ version (1) │ rec_len (u64) │ rec_crc (u16)│ record         │ (start u64 | end u64 | crc)* │
//! └─────────────┴───────────────┴──────────────┴────────────────┴──────────────────────────────┘
//! ```
//! The record is `name_len | node_name | METADATA payload`. Every chunk
//! entry carries its own CRC-16 so a torn write at the tail is detected.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use bytes::{BufMut, BytesMut};
use spacelink_frame::packet_type::FILE_METADATA;
use spacelink_frame::{ByteReader, Crc16};
use tracing::warn;

use crate::chunks::FileProgress;
use crate::error::{Result, TransferError};
use crate::payload::{FilePacket, Metadata};

pub const META_VERSION: u8 = 1;

const PREAMBLE_SIZE: usize = 1 + 8 + 2;
const PROGRESS_ENTRY_SIZE: usize = 8 + 8 + 2;

/// Identity of a persisted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub node_name: String,
    pub metadata: Metadata,
}

/// Serialize `record` and `chunks` to `path`, replacing it atomically.
pub fn write_meta(path: &Path, record: &MetaRecord, chunks: &[FileProgress]) -> Result<()> {
    let crc = Crc16::default();

    let mut body = BytesMut::new();
    body.put_u8(record.node_name.len() as u8);
    body.put_slice(record.node_name.as_bytes());
    body.put_slice(&FilePacket::Metadata(record.metadata.clone()).encode()?);

    let mut out = BytesMut::with_capacity(PREAMBLE_SIZE + body.len() + chunks.len() * PROGRESS_ENTRY_SIZE);
    out.put_u8(META_VERSION);
    out.put_u64_le(body.len() as u64);
    out.put_u16_le(crc.calculate(&body));
    out.put_slice(&body);

    let mut entry = [0u8; 16];
    for chunk in chunks {
        entry[..8].copy_from_slice(&chunk.chunk_start.to_le_bytes());
        entry[8..].copy_from_slice(&chunk.chunk_end.to_le_bytes());
        out.put_slice(&entry);
        out.put_u16_le(crc.calculate(&entry));
    }

    let partial = path.with_extension("meta.tmp");
    fs::write(&partial, &out)?;
    fs::rename(&partial, path)?;
    Ok(())
}

/// Load a `.meta` file.
///
/// Any version, length or CRC problem removes the `.meta` and the staging
/// `.file` beside it and fails with [`TransferError::MetaCorrupt`].
pub fn read_meta(path: &Path) -> Result<(MetaRecord, Vec<FileProgress>)> {
    let bytes = fs::read(path)?;
    parse(&bytes).map_err(|reason| {
        warn!(path = %path.display(), reason, "discarding corrupt meta file");
        remove_if_exists(path);
        remove_if_exists(&path.with_extension("file"));
        TransferError::MetaCorrupt {
            path: path.to_path_buf(),
            reason,
        }
    })
}

fn parse(bytes: &[u8]) -> std::result::Result<(MetaRecord, Vec<FileProgress>), &'static str> {
    let crc = Crc16::default();
    let mut reader = ByteReader::new(bytes);

    let version = reader.u8().map_err(|_| "empty file")?;
    if version != META_VERSION {
        return Err("unsupported version");
    }
    let record_len = reader.u64().map_err(|_| "truncated header")?;
    let record_crc = reader.u16().map_err(|_| "truncated header")?;
    let record_len = usize::try_from(record_len).map_err(|_| "record length out of range")?;
    let body = reader.bytes(record_len).map_err(|_| "truncated record")?;
    if crc.calculate(body) != record_crc {
        return Err("record CRC mismatch");
    }

    let mut record_reader = ByteReader::new(body);
    let name_len = usize::from(record_reader.u8().map_err(|_| "truncated record")?);
    let node_name = record_reader
        .bytes(name_len)
        .ok()
        .and_then(|b| std::str::from_utf8(b).ok())
        .ok_or("invalid node name")?
        .to_string();
    let metadata = match FilePacket::decode(FILE_METADATA, record_reader.rest()) {
        Ok(Some(FilePacket::Metadata(metadata))) => metadata,
        _ => return Err("invalid metadata record"),
    };

    let tail = reader.rest();
    if tail.len() % PROGRESS_ENTRY_SIZE != 0 {
        return Err("truncated progress entry");
    }
    let mut chunks = Vec::with_capacity(tail.len() / PROGRESS_ENTRY_SIZE);
    for entry in tail.chunks_exact(PROGRESS_ENTRY_SIZE) {
        let (data, stored) = entry.split_at(16);
        if crc.calculate(data) != u16::from_le_bytes([stored[0], stored[1]]) {
            return Err("progress CRC mismatch");
        }
        let mut fields = ByteReader::new(data);
        let start = fields.u64().map_err(|_| "truncated progress entry")?;
        let end = fields.u64().map_err(|_| "truncated progress entry")?;
        chunks.push(FileProgress::new(start, end));
    }

    Ok((MetaRecord { node_name, metadata }, chunks))
}

/// Remove a file, ignoring "not found".
pub(crate) fn remove_if_exists(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "spacelink-meta-{label}-{}-{nanos}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn record() -> MetaRecord {
        MetaRecord {
            node_name: "cubesat".into(),
            metadata: Metadata {
                node_id: 2,
                tx_id: 42,
                agent_name: "camera".into(),
                file_name: "img.jpg".into(),
                file_size: 5000,
                file_crc: 0x1234,
            },
        }
    }

    #[test]
    fn write_then_read() {
        let dir = temp_dir("roundtrip");
        let path = dir.join("in_42.meta");
        let chunks = vec![FileProgress::new(0, 999), FileProgress::new(2000, 2999)];
        write_meta(&path, &record(), &chunks).unwrap();

        let (loaded, loaded_chunks) = read_meta(&path).unwrap();
        assert_eq!(loaded, record());
        assert_eq!(loaded_chunks, chunks);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn corrupt_meta_is_deleted_with_its_staging_file() {
        let dir = temp_dir("corrupt");
        let path = dir.join("in_42.meta");
        let staging = dir.join("in_42.file");
        write_meta(&path, &record(), &[FileProgress::new(0, 9)]).unwrap();
        fs::write(&staging, b"0123456789").unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_meta(&path),
            Err(TransferError::MetaCorrupt {
                reason: "progress CRC mismatch",
                ..
            })
        ));
        assert!(!path.exists());
        assert!(!staging.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn truncated_and_foreign_files_are_rejected() {
        let dir = temp_dir("truncated");
        let path = dir.join("out_1.meta");
        write_meta(&path, &record(), &[FileProgress::new(0, 9)]).unwrap();
        let bytes = fs::read(&path).unwrap();

        for (data, reason) in [
            (&bytes[..bytes.len() - 3], "truncated progress entry"),
            (&bytes[..20], "truncated record"),
            (&[9u8, 0, 0][..], "unsupported version"),
        ] {
            fs::write(&path, data).unwrap();
            match read_meta(&path) {
                Err(TransferError::MetaCorrupt { reason: r, .. }) => assert_eq!(r, reason),
                other => panic!("expected corrupt meta, got {other:?}"),
            }
        }
        fs::remove_dir_all(&dir).unwrap();
    }
}
