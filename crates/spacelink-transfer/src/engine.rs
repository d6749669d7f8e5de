use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use spacelink_frame::{PacketComm, MAX_PAYLOAD};
use tracing::{debug, info, warn};

use crate::chunks;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::meta::{self, remove_if_exists};
use crate::node::NodeTable;
use crate::payload::{FilePacket, MIN_PACKET_SIZE};
use crate::progress::{Direction, TxProgress, TxQueue, TxSummary};
use crate::store::{error_path, Store};

/// What the caller should do after [`Transfer::receive_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Not a file-transfer packet, or not addressed to this node.
    Ignored,
    /// Applied; nothing to answer yet.
    Handled,
    /// Run [`Transfer::get_outgoing_rpackets`] for the sending node.
    ResponseRequired,
}

/// Per-peer file-transfer queues for one node.
///
/// The engine owns all transaction state and open files. Callers feed it
/// received packets and pull packets to send; nothing blocks on the network
/// and every retry is a deadline check against the wall clock.
#[derive(Debug)]
pub struct Transfer {
    pub(crate) config: TransferConfig,
    pub(crate) nodes: NodeTable,
    pub(crate) self_id: u8,
    pub(crate) self_name: String,
    pub(crate) queues: BTreeMap<u8, TxQueue>,
    pub(crate) store: Store,
}

impl Transfer {
    /// Create the engine for `self_name` and replay any persisted
    /// transactions found under `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        nodes: NodeTable,
        self_name: &str,
        config: TransferConfig,
    ) -> Result<Self> {
        if nodes.len() < 2 {
            return Err(TransferError::TooFewNodes(nodes.len()));
        }
        let self_id = nodes
            .id(self_name)
            .ok_or_else(|| TransferError::UnknownNode(self_name.to_string()))?;
        validate_packet_size(config.packet_size)?;

        let queues = nodes
            .iter()
            .filter(|(id, _)| *id != self_id)
            .map(|(id, name)| (id, TxQueue::new(id, name, config.waittime)))
            .collect();

        let mut transfer = Self {
            config,
            nodes,
            self_id,
            self_name: self_name.to_string(),
            queues,
            store: Store::new(root.into()),
        };
        let peers: Vec<u8> = transfer.queues.keys().copied().collect();
        for node_id in peers {
            transfer.replay(node_id)?;
        }
        info!(
            node = %transfer.self_name,
            id = transfer.self_id,
            peers = transfer.queues.len(),
            root = %transfer.store.root().display(),
            "transfer engine ready"
        );
        Ok(transfer)
    }

    pub fn self_id(&self) -> u8 {
        self.self_id
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    /// Ids of every peer this engine keeps queues for.
    pub fn peers(&self) -> impl Iterator<Item = u8> + '_ {
        self.queues.keys().copied()
    }

    /// Resolve a peer given by name or id.
    pub fn node_id(&self, node: &str) -> Result<u8> {
        let id = self.nodes.resolve(node)?;
        self.queue(id)?;
        Ok(id)
    }

    pub fn queue(&self, node_id: u8) -> Result<&TxQueue> {
        self.queues
            .get(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))
    }

    pub(crate) fn queue_mut(&mut self, node_id: u8) -> Result<&mut TxQueue> {
        self.queues
            .get_mut(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))
    }

    /// Spool directory for files destined to `node_id`.
    pub fn outgoing_dir(&self, node_id: u8) -> Result<PathBuf> {
        Ok(self.store.outgoing_dir(&self.queue(node_id)?.node_name))
    }

    /// Directory files received from `node_id` are promoted into.
    pub fn incoming_dir(&self, node_id: u8) -> Result<PathBuf> {
        Ok(self.store.incoming_dir(&self.queue(node_id)?.node_name))
    }

    pub fn packet_size(&self) -> usize {
        self.config.packet_size
    }

    /// Change the payload limit for every packet generated from now on.
    pub fn set_packet_size(&mut self, size: usize) -> Result<()> {
        validate_packet_size(size)?;
        self.config.packet_size = size;
        Ok(())
    }

    pub fn set_waittime(&mut self, node_id: u8, direction: Direction, waittime: Duration) -> Result<()> {
        self.queue_mut(node_id)?.entry_mut(direction).waittime = waittime;
        Ok(())
    }

    /// Arm or disarm one outgoing transaction.
    pub fn set_enabled(&mut self, node_id: u8, tx_id: u8, enabled: bool) -> Result<()> {
        let queue = self.queue_mut(node_id)?;
        let tx = queue
            .outgoing
            .progress
            .get_mut(&tx_id)
            .ok_or_else(|| TransferError::UnknownTx {
                node: queue.node_name.clone(),
                tx_id,
            })?;
        tx.enabled = enabled;
        debug!(node = %queue.node_name, tx_id, enabled, "outgoing transaction armed state changed");
        Ok(())
    }

    /// Arm every outgoing transaction for `node_id`.
    pub fn enable_all(&mut self, node_id: u8) -> Result<usize> {
        let queue = self.queue_mut(node_id)?;
        for tx in queue.outgoing.progress.values_mut() {
            tx.enabled = true;
        }
        Ok(queue.outgoing.len())
    }

    /// Arm only the outgoing transaction carrying `file_name`.
    pub fn enable_single(&mut self, node_id: u8, file_name: &str) -> Result<u8> {
        let queue = self.queue_mut(node_id)?;
        let tx_id = queue
            .outgoing
            .progress
            .values()
            .find(|tx| tx.file_name == file_name)
            .map(|tx| tx.tx_id)
            .ok_or_else(|| TransferError::UnknownTx {
                node: queue.node_name.clone(),
                tx_id: 0,
            })?;
        for tx in queue.outgoing.progress.values_mut() {
            tx.enabled = tx.tx_id == tx_id;
        }
        Ok(tx_id)
    }

    /// Drop every transaction in one direction for `node_id`.
    ///
    /// Incoming staging files are deleted; outgoing spool files stay and are
    /// picked up again by the next [`outgoing_tx_load`](Self::outgoing_tx_load).
    pub fn reset_queue(&mut self, node_id: u8, direction: Direction) -> Result<()> {
        let queue = self
            .queues
            .get_mut(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))?;
        let entry = queue.entry_mut(direction);
        for (_, mut tx) in std::mem::take(&mut entry.progress) {
            match direction {
                Direction::Incoming => self.store.abandon(&mut tx, false),
                Direction::Outgoing => remove_if_exists(&tx.meta_path()),
            }
        }
        entry.respond.clear();
        entry.cancel.clear();
        entry.last_queue = None;
        info!(node = %queue.node_name, %direction, "queue reset");
        Ok(())
    }

    /// Delete an outgoing file from the spool and tell the peer to forget it.
    pub fn remove_file(&mut self, node_id: u8, tx_id: u8) -> Result<()> {
        let queue = self.queue_mut(node_id)?;
        let tx = queue
            .outgoing
            .progress
            .remove(&tx_id)
            .ok_or_else(|| TransferError::UnknownTx {
                node: queue.node_name.clone(),
                tx_id,
            })?;
        remove_if_exists(&tx.meta_path());
        remove_if_exists(&tx.filepath);
        queue.outgoing.cancel.insert(tx_id);
        info!(node = %queue.node_name, tx_id, file = %tx.file_name, "outgoing file removed");
        Ok(())
    }

    /// Refresh bytes-to-go of every outgoing transaction; returns the count.
    pub fn outgoing_tx_recount(&mut self, node_id: u8) -> Result<usize> {
        let queue = self.queue_mut(node_id)?;
        for tx in queue.outgoing.progress.values_mut() {
            chunks::merge_chunks_overlap(&mut tx.file_info, tx.file_size);
            tx.total_bytes = tx.file_size.saturating_sub(tx.bytes_togo());
        }
        Ok(queue.outgoing.len())
    }

    /// Re-merge every incoming chunk map; returns the count.
    pub fn incoming_tx_recount(&mut self, node_id: u8) -> Result<usize> {
        let queue = self.queue_mut(node_id)?;
        for tx in queue.incoming.progress.values_mut() {
            if !tx.complete {
                tx.merge();
            }
        }
        Ok(queue.incoming.len())
    }

    pub fn outgoing_snapshot(&self) -> Vec<TxSummary> {
        self.snapshot(Direction::Outgoing)
    }

    pub fn incoming_snapshot(&self) -> Vec<TxSummary> {
        self.snapshot(Direction::Incoming)
    }

    /// JSON array of every outgoing transaction.
    pub fn list_outgoing(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.outgoing_snapshot())?)
    }

    /// JSON array of every incoming transaction.
    pub fn list_incoming(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.incoming_snapshot())?)
    }

    fn snapshot(&self, direction: Direction) -> Vec<TxSummary> {
        self.queues
            .values()
            .flat_map(|queue| {
                queue
                    .entry(direction)
                    .progress
                    .values()
                    .map(|tx| tx.summary(&queue.node_name))
            })
            .collect()
    }

    /// Re-register transactions persisted in a peer's staging directory.
    fn replay(&mut self, node_id: u8) -> Result<()> {
        let Some(queue) = self.queues.get_mut(&node_id) else {
            return Ok(());
        };
        let staging = self.store.staging_dir(&queue.node_name);
        let entries = match fs::read_dir(&staging) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut metas: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "meta"))
            .collect();
        metas.sort();

        for path in metas {
            let Some((direction, tx_id)) = parse_staging_name(&path) else {
                continue;
            };
            let (record, file_info) = match meta::read_meta(&path) {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(node = %queue.node_name, path = %path.display(), error = %err, "skipping persisted transaction");
                    continue;
                }
            };
            let metadata = record.metadata;
            let mut tx = TxProgress::new(
                tx_id,
                &queue.node_name,
                self.store.temppath(&queue.node_name, direction, tx_id),
            );
            tx.agent_name = metadata.agent_name;
            tx.file_name = metadata.file_name;
            tx.file_size = metadata.file_size;
            tx.file_crc = metadata.file_crc;
            tx.file_info = file_info;

            match direction {
                Direction::Incoming => {
                    tx.filepath = self
                        .store
                        .incoming_dir(&queue.node_name)
                        .join(&tx.agent_name)
                        .join(&tx.file_name);
                    tx.sentmeta = true;
                    if !tx.staging_file().exists() {
                        tx.file_info.clear();
                    }
                    tx.merge();
                    debug!(node = %queue.node_name, tx_id, file = %tx.file_name, total = tx.total_bytes, size = tx.file_size, "replayed incoming transaction");
                    queue.incoming.progress.insert(tx_id, tx);
                }
                Direction::Outgoing => {
                    tx.filepath = self
                        .store
                        .outgoing_dir(&queue.node_name)
                        .join(&tx.agent_name)
                        .join(&tx.file_name);
                    let valid = fs::metadata(&tx.filepath)
                        .map_err(TransferError::from)
                        .and_then(|m| {
                            if m.len() != tx.file_size {
                                return Err(TransferError::FileSizeChanged {
                                    path: tx.filepath.clone(),
                                    expected: tx.file_size,
                                    actual: m.len(),
                                });
                            }
                            let actual = self.store.file_crc(&tx.filepath)?;
                            if actual != tx.file_crc {
                                return Err(TransferError::FileCrcMismatch {
                                    path: tx.filepath.clone(),
                                    expected: tx.file_crc,
                                    actual,
                                });
                            }
                            Ok(())
                        });
                    if let Err(err) = valid {
                        warn!(node = %queue.node_name, tx_id, error = %err, "dropping persisted outgoing transaction");
                        let meta_path = tx.meta_path();
                        if let Err(err) = fs::rename(&meta_path, error_path(&meta_path)) {
                            warn!(path = %meta_path.display(), error = %err, "failed to set meta file aside");
                            remove_if_exists(&meta_path);
                        }
                        continue;
                    }
                    chunks::merge_chunks_overlap(&mut tx.file_info, tx.file_size);
                    tx.total_bytes = tx.file_size.saturating_sub(tx.bytes_togo());
                    tx.enabled = true;
                    tx.sentdata = tx.file_info.is_empty();
                    debug!(node = %queue.node_name, tx_id, file = %tx.file_name, togo = tx.bytes_togo(), "replayed outgoing transaction");
                    queue.outgoing.progress.insert(tx_id, tx);
                }
            }
        }
        Ok(())
    }

    /// Encode `payload`, log it, and append it to `packets`.
    pub(crate) fn emit(
        self_id: u8,
        queue: &TxQueue,
        payload: FilePacket,
        packets: &mut Vec<PacketComm>,
    ) -> Result<()> {
        log_packet("SEND", &queue.node_name, &payload);
        packets.push(payload.to_packet(self_id, queue.node_id)?);
        Ok(())
    }
}

/// Record a packet's direction, peer, type and type-specific fields.
pub(crate) fn log_packet(direction: &'static str, node: &str, packet: &FilePacket) {
    match packet {
        FilePacket::Metadata(m) => debug!(
            direction, node, kind = packet.kind(), tx_id = m.tx_id,
            agent = %m.agent_name, file = %m.file_name, size = m.file_size, "file packet"
        ),
        FilePacket::Data(d) => debug!(
            direction, node, kind = packet.kind(), tx_id = d.tx_id,
            chunk_start = d.chunk_start, byte_count = d.chunk.len(), "file packet"
        ),
        FilePacket::ReqData(r) => debug!(
            direction, node, kind = packet.kind(), tx_id = r.tx_id,
            hole_start = r.hole.chunk_start, hole_end = r.hole.chunk_end, "file packet"
        ),
        FilePacket::Queue(l) | FilePacket::ReqMeta(l) => debug!(
            direction, node, kind = packet.kind(), from = %l.node_name,
            tx_ids = ?l.tx_ids.ids().collect::<Vec<_>>(), "file packet"
        ),
        FilePacket::ReqComplete(r) | FilePacket::Complete(r) | FilePacket::Cancel(r) => debug!(
            direction, node, kind = packet.kind(), tx_id = r.tx_id, "file packet"
        ),
    }
}

fn validate_packet_size(size: usize) -> Result<()> {
    if !(MIN_PACKET_SIZE..=MAX_PAYLOAD).contains(&size) {
        return Err(TransferError::PacketSize {
            size,
            min: MIN_PACKET_SIZE,
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

/// `in_<id>.meta` / `out_<id>.meta` -> direction and tx_id.
fn parse_staging_name(path: &Path) -> Option<(Direction, u8)> {
    let stem = path.file_stem()?.to_str()?;
    let (direction, id) = if let Some(id) = stem.strip_prefix(Direction::Incoming.staging_prefix()) {
        (Direction::Incoming, id)
    } else {
        (Direction::Outgoing, stem.strip_prefix(Direction::Outgoing.staging_prefix())?)
    };
    let tx_id: u8 = id.parse().ok()?;
    (tx_id != 0).then_some((direction, tx_id))
}
