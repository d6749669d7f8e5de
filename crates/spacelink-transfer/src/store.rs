use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use spacelink_frame::{Crc16, FileReadBuffer};
use tracing::{debug, warn};

use crate::error::Result;
use crate::meta::{self, remove_if_exists, MetaRecord};
use crate::progress::{Direction, TxProgress};

/// Suffix appended to files abandoned after a failed or cancelled transfer.
pub const ERROR_SUFFIX: &str = "error";

/// On-disk layout plus the CRC engine and its read buffer.
///
/// ```text
/// <root>/<peer>/outgoing/<agent>/<file>   spool of files to send to <peer>
/// <root>/<peer>/incoming/<agent>/<file>   files received from <peer>
/// <root>/<peer>/temp/file/in_<tx>.{file,meta}
/// <root>/<peer>/temp/file/out_<tx>.meta
/// ```
#[derive(Debug)]
pub(crate) struct Store {
    root: PathBuf,
    crc: Crc16,
    buffer: FileReadBuffer,
}

impl Store {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            root,
            crc: Crc16::default(),
            buffer: FileReadBuffer::new(),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn outgoing_dir(&self, node: &str) -> PathBuf {
        self.root.join(node).join("outgoing")
    }

    pub(crate) fn incoming_dir(&self, node: &str) -> PathBuf {
        self.root.join(node).join("incoming")
    }

    pub(crate) fn staging_dir(&self, node: &str) -> PathBuf {
        self.root.join(node).join("temp").join("file")
    }

    pub(crate) fn temppath(&self, node: &str, direction: Direction, tx_id: u8) -> PathBuf {
        self.staging_dir(node)
            .join(format!("{}{tx_id}", direction.staging_prefix()))
    }

    /// Whole-file CRC-16.
    pub(crate) fn file_crc(&mut self, path: &Path) -> Result<u16> {
        self.buffer.invalidate();
        Ok(self.crc.calculate_file(path, &mut self.buffer)?)
    }

    /// Persist `tx` unless the last write was less than `interval` ago.
    pub(crate) fn save(
        &self,
        tx: &mut TxProgress,
        node_id: u8,
        interval: std::time::Duration,
    ) -> Result<()> {
        if !tx.save_due(interval) {
            return Ok(());
        }
        if let Some(dir) = tx.temppath.parent() {
            fs::create_dir_all(dir)?;
        }
        let record = MetaRecord {
            node_name: tx.node_name.clone(),
            metadata: tx.metadata(node_id),
        };
        meta::write_meta(&tx.meta_path(), &record, &tx.file_info)?;
        tx.savetime = Some(Instant::now());
        Ok(())
    }

    /// Write `chunk` at `offset` into the staging file, opening it on demand.
    pub(crate) fn write_chunk(&self, tx: &mut TxProgress, offset: u64, chunk: &[u8]) -> Result<()> {
        let path = tx.staging_file();
        let file = match tx.file.take() {
            Some(file) => file,
            None => {
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .read(true)
                    .write(true)
                    .open(&path)?
            }
        };
        let file = tx.file.insert(file);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(chunk)?;
        Ok(())
    }

    /// Read `len` bytes at `offset` from the spool file, opening it on demand.
    pub(crate) fn read_chunk(&self, tx: &mut TxProgress, offset: u64, len: usize) -> Result<Vec<u8>> {
        let file = match tx.file.take() {
            Some(file) => file,
            None => File::open(&tx.filepath)?,
        };
        let file = tx.file.insert(file);
        let mut chunk = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut chunk)?;
        Ok(chunk)
    }

    /// Start a fresh staging file, discarding leftovers from an old transaction.
    pub(crate) fn reset_staging(&self, tx: &mut TxProgress) -> Result<()> {
        tx.file = None;
        let path = tx.staging_file();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        File::create(&path)?;
        Ok(())
    }

    /// Verify the staged file and move it to its final path.
    ///
    /// Returns `Ok(false)` and abandons the transaction on CRC mismatch.
    pub(crate) fn promote(&mut self, tx: &mut TxProgress) -> Result<bool> {
        if let Some(file) = tx.file.take() {
            file.set_len(tx.file_size)?;
            file.sync_all()?;
        } else {
            OpenOptions::new()
                .write(true)
                .open(tx.staging_file())?
                .set_len(tx.file_size)?;
        }

        let staged = tx.staging_file();
        let actual = self.file_crc(&staged)?;
        if actual != tx.file_crc {
            warn!(
                node = %tx.node_name,
                tx_id = tx.tx_id,
                file = %tx.file_name,
                expected = tx.file_crc,
                actual,
                "received file failed CRC check"
            );
            self.abandon(tx, true);
            return Ok(false);
        }

        if let Some(dir) = tx.filepath.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::rename(&staged, &tx.filepath)?;
        remove_if_exists(&tx.meta_path());
        tx.complete = true;
        tx.sentdata = true;
        debug!(
            node = %tx.node_name,
            tx_id = tx.tx_id,
            path = %tx.filepath.display(),
            "incoming file complete"
        );
        Ok(true)
    }

    /// Drop an incoming transaction's staging state.
    ///
    /// With `keep`, received bytes are moved next to the final path with an
    /// error suffix instead of being deleted.
    pub(crate) fn abandon(&self, tx: &mut TxProgress, keep: bool) {
        tx.file = None;
        let staged = tx.staging_file();
        let keep = keep
            && tx.sentmeta
            && !tx.complete
            && fs::metadata(&staged).is_ok_and(|m| m.len() > 0);
        if keep {
            let target = error_path(&tx.filepath);
            let moved = target
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::rename(&staged, &target));
            match moved {
                Ok(()) => warn!(
                    node = %tx.node_name,
                    tx_id = tx.tx_id,
                    path = %target.display(),
                    "kept partial file"
                ),
                Err(err) => {
                    warn!(path = %staged.display(), error = %err, "failed to keep partial file");
                    remove_if_exists(&staged);
                }
            }
        } else {
            remove_if_exists(&staged);
        }
        remove_if_exists(&tx.meta_path());
    }
}

/// `path` with [`ERROR_SUFFIX`] appended to its file name.
pub fn error_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ERROR_SUFFIX);
    path.with_file_name(name)
}
