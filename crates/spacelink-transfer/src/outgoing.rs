use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use spacelink_frame::PacketComm;
use tracing::{debug, info, warn};

use crate::chunks::{self, FileProgress};
use crate::engine::Transfer;
use crate::error::{Result, TransferError};
use crate::meta::remove_if_exists;
use crate::payload::{
    validate_name, Data, FilePacket, TxList, TxRef, DATA_HEADER_SIZE, MAX_FILE_NAME,
    MAX_FILE_SIZE, MAX_NAME,
};
use crate::progress::{Direction, TxProgress, TxQueue};
use crate::store::Store;
use crate::txid::{choose_tx_id, TX_ID_MAX};

/// A file found in an outgoing spool.
struct SpoolFile {
    agent_name: String,
    file_name: String,
    path: PathBuf,
    size: u64,
}

impl Transfer {
    /// Sync the outgoing queue for `node_id` with its spool directory.
    ///
    /// Entries whose file vanished are dropped; new files are queued smallest
    /// first until the queue is full. Empty files are left in the spool.
    /// Returns the number of queued transactions.
    pub fn outgoing_tx_load(&mut self, node_id: u8) -> Result<usize> {
        let Self { queues, store, .. } = self;
        let queue = queues
            .get_mut(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))?;

        let vanished: Vec<u8> = queue
            .outgoing
            .progress
            .values()
            .filter(|tx| !tx.filepath.exists())
            .map(|tx| tx.tx_id)
            .collect();
        for tx_id in vanished {
            if let Some(tx) = queue.outgoing.progress.remove(&tx_id) {
                debug!(node = %queue.node_name, tx_id, file = %tx.file_name, "spool file vanished");
                remove_if_exists(&tx.meta_path());
                queue.outgoing.cancel.insert(tx_id);
            }
        }

        let spool = store.outgoing_dir(&queue.node_name);
        fs::create_dir_all(&spool)?;
        let mut files = scan_spool(&spool)?;
        files.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)));

        for file in files {
            if file.size == 0 {
                debug!(path = %file.path.display(), "leaving empty file in spool");
                continue;
            }
            if let Some(existing) = queue.outgoing.find_path(&file.path) {
                if existing.file_size == file.size {
                    continue;
                }
                let tx_id = existing.tx_id;
                warn!(
                    node = %queue.node_name,
                    tx_id,
                    path = %file.path.display(),
                    expected = existing.file_size,
                    actual = file.size,
                    "spool file changed size, requeueing"
                );
                if let Some(stale) = queue.outgoing.progress.remove(&tx_id) {
                    remove_if_exists(&stale.meta_path());
                }
                queue.outgoing.cancel.insert(tx_id);
            }
            if queue.outgoing.len() >= usize::from(TX_ID_MAX) {
                warn!(node = %queue.node_name, "outgoing queue full");
                break;
            }
            if let Err(err) = add_outgoing(queue, store, file) {
                warn!(node = %queue.node_name, error = %err, "failed to queue file");
            }
        }
        Ok(queue.outgoing.len())
    }

    /// Queue `<spool>/<agent_name>/<file_name>` for `node_id`, returning its tx_id.
    pub fn outgoing_tx_add(&mut self, node_id: u8, agent_name: &str, file_name: &str) -> Result<u8> {
        let Self { queues, store, .. } = self;
        let queue = queues
            .get_mut(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))?;
        validate_name(agent_name, MAX_NAME)?;
        validate_name(file_name, MAX_FILE_NAME)?;
        let path = store
            .outgoing_dir(&queue.node_name)
            .join(agent_name)
            .join(file_name);
        if let Some(existing) = queue.outgoing.find_path(&path) {
            return Err(TransferError::DuplicateTx {
                path,
                tx_id: existing.tx_id,
            });
        }
        let size = fs::metadata(&path)?.len();
        add_outgoing(
            queue,
            store,
            SpoolFile {
                agent_name: agent_name.to_string(),
                file_name: file_name.to_string(),
                path,
                size,
            },
        )
    }

    /// Build the next batch of packets for `node_id`.
    ///
    /// `queued` is the number of packets already waiting in the caller's
    /// transmit buffer; the pass stops once that plus the new packets reach
    /// 90% of the configured buffer capacity, or when the time budget runs
    /// out. Each armed transaction gets an equal share of `max_packets`,
    /// with unused share rolling over to later transactions.
    ///
    /// A transaction that hits a storage error is cancelled on its own; its
    /// packets from this pass are withdrawn and the rest of the batch stands.
    pub fn get_outgoing_lpackets(&mut self, node_id: u8, queued: usize) -> Result<Vec<PacketComm>> {
        let Self {
            queues,
            store,
            config,
            self_id,
            self_name,
            ..
        } = self;
        let self_id = *self_id;
        let queue = queues
            .get_mut(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))?;

        let pass = Pass {
            self_id,
            now: Instant::now(),
            queued,
            headroom: config.buffer_headroom(),
            time_budget: config.time_budget,
            chunk_len: (config.packet_size - DATA_HEADER_SIZE) as u64,
            meta_interval: config.meta_interval,
        };
        let mut packets = Vec::new();
        if queued >= pass.headroom {
            return Ok(packets);
        }

        for tx_id in std::mem::take(&mut queue.outgoing.cancel) {
            emit_or_log(self_id, queue, FilePacket::Cancel(TxRef { node_id: self_id, tx_id }), &mut packets);
        }

        let done: Vec<u8> = queue
            .outgoing
            .progress
            .values()
            .filter(|tx| tx.complete)
            .map(|tx| tx.tx_id)
            .collect();
        for tx_id in done {
            emit_or_log(self_id, queue, FilePacket::Cancel(TxRef { node_id: self_id, tx_id }), &mut packets);
            if let Some(tx) = queue.outgoing.progress.remove(&tx_id) {
                remove_if_exists(&tx.meta_path());
                remove_if_exists(&tx.filepath);
                info!(node = %queue.node_name, tx_id, file = %tx.file_name, "outgoing file delivered");
            }
        }

        let active: Vec<u8> = queue
            .outgoing
            .progress
            .values()
            .filter(|tx| tx.enabled && (!tx.sentmeta || !tx.sentdata || tx.next_response <= pass.now))
            .map(|tx| tx.tx_id)
            .collect();

        if !active.is_empty() {
            let share = (config.max_packets / active.len()).max(1);
            let mut carry = 0usize;
            let mut failed = Vec::new();
            for tx_id in active {
                if pass.full(&packets) {
                    break;
                }
                let budget = share + carry;
                let Some(mut tx) = queue.outgoing.progress.remove(&tx_id) else {
                    continue;
                };
                let mark = packets.len();
                carry = match service_outgoing(&mut tx, queue, store, &pass, budget, &mut packets) {
                    Ok(left) => left,
                    Err(err) => {
                        warn!(node = %queue.node_name, tx_id, path = %tx.filepath.display(), error = %err, "outgoing transaction failed, cancelling");
                        packets.truncate(mark);
                        failed.push(tx_id);
                        budget
                    }
                };
                queue.outgoing.progress.insert(tx_id, tx);
            }

            for tx_id in failed {
                if let Some(tx) = queue.outgoing.progress.remove(&tx_id) {
                    remove_if_exists(&tx.meta_path());
                }
                emit_or_log(self_id, queue, FilePacket::Cancel(TxRef { node_id: self_id, tx_id }), &mut packets);
            }
        }

        let bitmap = queue.outgoing.bitmap();
        let send_queue = match queue.outgoing.last_queue {
            None => !bitmap.is_empty(),
            Some((last, at)) => {
                last != bitmap || (!bitmap.is_empty() && at.elapsed() >= queue.outgoing.waittime)
            }
        };
        if send_queue {
            let list = FilePacket::Queue(TxList {
                node_id: self_id,
                node_name: self_name.clone(),
                tx_ids: bitmap,
            });
            if emit_or_log(self_id, queue, list, &mut packets) {
                queue.outgoing.last_queue = Some((bitmap, Instant::now()));
            }
        }

        Ok(packets)
    }
}

/// Fixed inputs of one outgoing pass.
struct Pass {
    self_id: u8,
    now: Instant,
    queued: usize,
    headroom: usize,
    time_budget: Duration,
    chunk_len: u64,
    meta_interval: Duration,
}

impl Pass {
    fn full(&self, packets: &[PacketComm]) -> bool {
        self.queued + packets.len() >= self.headroom || self.now.elapsed() > self.time_budget
    }
}

/// Emit METADATA, DATA and REQCOMPLETE for one transaction as its share
/// allows. Returns the unused share.
fn service_outgoing(
    tx: &mut TxProgress,
    queue: &TxQueue,
    store: &Store,
    pass: &Pass,
    mut budget: usize,
    packets: &mut Vec<PacketComm>,
) -> Result<usize> {
    let self_id = pass.self_id;
    let tx_id = tx.tx_id;

    if !tx.sentmeta {
        Transfer::emit(self_id, queue, FilePacket::Metadata(tx.metadata(self_id)), packets)?;
        tx.sentmeta = true;
        budget = budget.saturating_sub(1);
    }

    if !tx.sentdata {
        while budget > 0 && !pass.full(packets) {
            let Some(range) = chunks::take_chunk(&mut tx.file_info, pass.chunk_len) else {
                break;
            };
            let chunk = store.read_chunk(tx, range.chunk_start, range.byte_count() as usize)?;
            Transfer::emit(
                self_id,
                queue,
                FilePacket::Data(Data {
                    node_id: self_id,
                    tx_id,
                    chunk_start: range.chunk_start,
                    chunk,
                }),
                packets,
            )?;
            tx.total_bytes = tx.file_size.saturating_sub(tx.bytes_togo());
            budget -= 1;
        }
        if tx.file_info.is_empty() {
            tx.sentdata = true;
            tx.next_response = pass.now;
        }
        store.save(tx, queue.node_id, pass.meta_interval)?;
    }

    if tx.sentdata && tx.next_response <= pass.now && budget > 0 && !pass.full(packets) {
        Transfer::emit(self_id, queue, FilePacket::ReqComplete(TxRef { node_id: self_id, tx_id }), packets)?;
        tx.next_response = pass.now + queue.outgoing.waittime;
        budget -= 1;
    }
    Ok(budget)
}

/// [`Transfer::emit`] for packets whose loss must not cost the rest of the
/// batch. Returns whether the packet was queued.
fn emit_or_log(self_id: u8, queue: &TxQueue, payload: FilePacket, packets: &mut Vec<PacketComm>) -> bool {
    let kind = payload.kind();
    match Transfer::emit(self_id, queue, payload, packets) {
        Ok(()) => true,
        Err(err) => {
            warn!(node = %queue.node_name, kind, error = %err, "failed to encode packet");
            false
        }
    }
}

fn scan_spool(spool: &Path) -> Result<Vec<SpoolFile>> {
    let mut files = Vec::new();
    for agent in fs::read_dir(spool)? {
        let agent = agent?;
        if !agent.file_type()?.is_dir() {
            continue;
        }
        let Some(agent_name) = agent.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if validate_name(&agent_name, MAX_NAME).is_err() {
            warn!(agent = %agent_name, "skipping spool directory with unusable name");
            continue;
        }
        for entry in fs::read_dir(agent.path())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_name(&file_name, MAX_FILE_NAME).is_err() {
                warn!(file = %file_name, "skipping spool file with unusable name");
                continue;
            }
            files.push(SpoolFile {
                agent_name: agent_name.clone(),
                file_name,
                path: entry.path(),
                size: entry.metadata()?.len(),
            });
        }
    }
    Ok(files)
}

fn add_outgoing(queue: &mut TxQueue, store: &mut Store, file: SpoolFile) -> Result<u8> {
    if file.size == 0 {
        return Err(TransferError::ZeroSizeFile(file.path));
    }
    if file.size > MAX_FILE_SIZE {
        return Err(TransferError::FileTooLarge {
            path: file.path,
            size: file.size,
            max: MAX_FILE_SIZE,
        });
    }
    let tx_id = choose_tx_id(file.size, |id| queue.outgoing.progress.contains_key(&id))
        .ok_or_else(|| TransferError::QueueFull(queue.node_name.clone()))?;

    let mut tx = TxProgress::new(
        tx_id,
        &queue.node_name,
        store.temppath(&queue.node_name, Direction::Outgoing, tx_id),
    );
    tx.enabled = true;
    tx.file_crc = store.file_crc(&file.path)?;
    tx.agent_name = file.agent_name;
    tx.file_name = file.file_name;
    tx.filepath = file.path;
    tx.file_size = file.size;
    tx.file_info = vec![FileProgress::whole(file.size)];
    store.save(&mut tx, queue.node_id, Duration::ZERO)?;

    info!(
        node = %queue.node_name,
        tx_id,
        agent = %tx.agent_name,
        file = %tx.file_name,
        size = tx.file_size,
        crc = tx.file_crc,
        "outgoing file queued"
    );
    queue.outgoing.progress.insert(tx_id, tx);
    Ok(tx_id)
}
