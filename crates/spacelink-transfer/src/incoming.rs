use std::time::Instant;

use spacelink_frame::PacketComm;
use tracing::{debug, info, warn};

use crate::chunks::{self, FileProgress};
use crate::engine::{log_packet, ReceiveStatus, Transfer};
use crate::error::{Result, TransferError};
use crate::payload::{
    Data, FilePacket, Metadata, ReqData, TxBitmap, TxList, TxRef, MAX_FILE_SIZE,
};
use crate::progress::{Direction, TxProgress, TxQueue};
use crate::store::Store;

/// Extra waittimes a delivered transaction is kept after its last COMPLETE,
/// in case the sender asks again.
const COMPLETE_LINGER: u32 = 2;

impl Transfer {
    /// Apply one received packet.
    ///
    /// Packets not addressed to this node, and non-transfer packet types,
    /// are ignored. Malformed payloads are returned as errors and leave all
    /// state untouched.
    pub fn receive_packet(&mut self, packet: &PacketComm) -> Result<ReceiveStatus> {
        if packet.header.nodedest != self.self_id {
            return Ok(ReceiveStatus::Ignored);
        }
        let Some(payload) = FilePacket::from_packet(packet)? else {
            return Ok(ReceiveStatus::Ignored);
        };
        let node_id = payload.node_id();
        if node_id == self.self_id {
            return Ok(ReceiveStatus::Ignored);
        }

        let Self {
            queues,
            store,
            config,
            ..
        } = self;
        let queue = queues
            .get_mut(&node_id)
            .ok_or_else(|| TransferError::UnknownNode(node_id.to_string()))?;
        log_packet("RECV", &queue.node_name, &payload);

        let waittime = queue.incoming.waittime;
        match payload {
            FilePacket::Queue(list) => reconcile_queue(queue, store, &list),
            FilePacket::ReqMeta(list) => {
                for tx_id in list.tx_ids.ids() {
                    match queue.outgoing.progress.get_mut(&tx_id) {
                        Some(tx) => tx.sentmeta = false,
                        None => {
                            queue.outgoing.cancel.insert(tx_id);
                        }
                    }
                }
            }
            FilePacket::Metadata(meta) => incoming_metadata(queue, store, meta)?,
            FilePacket::Data(data) => {
                incoming_data(queue, store, data, config.merge_interval, config.meta_interval)?;
            }
            FilePacket::ReqData(ReqData { tx_id, hole, .. }) => {
                match queue.outgoing.progress.get_mut(&tx_id) {
                    Some(tx) => {
                        if hole.chunk_start < tx.file_size {
                            let hole = FileProgress::new(
                                hole.chunk_start,
                                hole.chunk_end.min(tx.file_size - 1),
                            );
                            chunks::add_chunk(&mut tx.file_info, hole);
                            chunks::merge_chunks_overlap(&mut tx.file_info, tx.file_size);
                            tx.total_bytes = tx.file_size.saturating_sub(tx.bytes_togo());
                            tx.sentdata = false;
                            if let Err(err) = store.save(tx, queue.node_id, config.meta_interval) {
                                warn!(node = %queue.node_name, tx_id, error = %err, "failed to persist outgoing transaction");
                            }
                        }
                    }
                    None => {
                        queue.outgoing.cancel.insert(tx_id);
                    }
                }
            }
            FilePacket::ReqComplete(TxRef { tx_id, .. }) => {
                if !queue.incoming.progress.contains_key(&tx_id) {
                    let tx = pending_tx(queue, store, tx_id, waittime);
                    queue.incoming.progress.insert(tx_id, tx);
                }
                queue.incoming.respond.insert(tx_id);
            }
            FilePacket::Complete(TxRef { tx_id, .. }) => {
                match queue.outgoing.progress.get_mut(&tx_id) {
                    Some(tx) => tx.complete = true,
                    None => {
                        queue.outgoing.cancel.insert(tx_id);
                    }
                }
            }
            FilePacket::Cancel(TxRef { tx_id, .. }) => {
                if let Some(mut tx) = queue.incoming.progress.remove(&tx_id) {
                    if !tx.complete {
                        warn!(node = %queue.node_name, tx_id, file = %tx.file_name, received = tx.total_bytes, size = tx.file_size, "transfer cancelled by sender");
                    }
                    store.abandon(&mut tx, true);
                }
                queue.incoming.respond.remove(&tx_id);
            }
        }

        Ok(if queue.incoming.respond.is_empty() {
            ReceiveStatus::Handled
        } else {
            ReceiveStatus::ResponseRequired
        })
    }

    /// Build response packets (REQMETA, REQDATA, COMPLETE) for `node_id`.
    ///
    /// Covers every transaction flagged by received packets plus incomplete
    /// transactions whose retry time has passed. Clears the respond list.
    /// Delivered transactions the sender has stopped asking about are
    /// forgotten here, so a lost CANCEL cannot pin them in memory.
    pub fn get_outgoing_rpackets(&mut self, node_id: u8) -> Result<Vec<PacketComm>> {
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

        let now = Instant::now();
        let linger = queue.incoming.waittime * COMPLETE_LINGER;
        let expired: Vec<u8> = queue
            .incoming
            .progress
            .values()
            .filter(|tx| {
                tx.complete
                    && !queue.incoming.respond.contains(&tx.tx_id)
                    && tx.next_response + linger <= now
            })
            .map(|tx| tx.tx_id)
            .collect();
        for tx_id in expired {
            if let Some(tx) = queue.incoming.progress.remove(&tx_id) {
                debug!(node = %queue.node_name, tx_id, file = %tx.file_name, "forgetting delivered transaction");
            }
        }

        let overdue: Vec<u8> = queue
            .incoming
            .progress
            .values()
            .filter(|tx| !tx.complete && tx.next_response <= now)
            .map(|tx| tx.tx_id)
            .collect();
        queue.incoming.respond.extend(overdue);

        let mut packets = Vec::new();
        let mut reqmeta = TxBitmap::default();
        let waittime = queue.incoming.waittime;
        for tx_id in std::mem::take(&mut queue.incoming.respond) {
            let Some(mut tx) = queue.incoming.progress.remove(&tx_id) else {
                continue;
            };
            tx.next_response = now + waittime;

            if !tx.sentmeta {
                reqmeta.insert(tx_id);
                queue.incoming.progress.insert(tx_id, tx);
                continue;
            }

            if !tx.complete {
                tx.merge();
                let missing = chunks::find_chunks_missing(&tx.file_info, tx.file_size);
                if !missing.is_empty() {
                    for hole in missing.into_iter().take(config.max_packets.max(1)) {
                        Transfer::emit(
                            self_id,
                            queue,
                            FilePacket::ReqData(ReqData {
                                node_id: self_id,
                                tx_id,
                                hole,
                            }),
                            &mut packets,
                        )?;
                    }
                    queue.incoming.progress.insert(tx_id, tx);
                    continue;
                }
                match store.promote(&mut tx) {
                    Ok(true) => {
                        info!(node = %queue.node_name, tx_id, path = %tx.filepath.display(), size = tx.file_size, "file received");
                    }
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(node = %queue.node_name, tx_id, error = %err, "failed to finalize received file");
                        store.abandon(&mut tx, true);
                        continue;
                    }
                }
            }

            Transfer::emit(
                self_id,
                queue,
                FilePacket::Complete(TxRef {
                    node_id: self_id,
                    tx_id,
                }),
                &mut packets,
            )?;
            queue.incoming.progress.insert(tx_id, tx);
        }

        if !reqmeta.is_empty() {
            Transfer::emit(
                self_id,
                queue,
                FilePacket::ReqMeta(TxList {
                    node_id: self_id,
                    node_name: self_name.clone(),
                    tx_ids: reqmeta,
                }),
                &mut packets,
            )?;
        }
        Ok(packets)
    }
}

/// Register an incoming transaction known only by id.
fn pending_tx(queue: &TxQueue, store: &Store, tx_id: u8, waittime: std::time::Duration) -> TxProgress {
    let mut tx = TxProgress::new(
        tx_id,
        &queue.node_name,
        store.temppath(&queue.node_name, Direction::Incoming, tx_id),
    );
    tx.next_response = Instant::now() + waittime;
    tx
}

/// Bring the incoming queue in line with the sender's active ids.
fn reconcile_queue(queue: &mut TxQueue, store: &Store, list: &TxList) {
    let stale: Vec<u8> = queue
        .incoming
        .progress
        .keys()
        .copied()
        .filter(|&id| !list.tx_ids.contains(id))
        .collect();
    for tx_id in stale {
        if let Some(mut tx) = queue.incoming.progress.remove(&tx_id) {
            debug!(node = %queue.node_name, tx_id, complete = tx.complete, "dropping transaction the sender no longer lists");
            store.abandon(&mut tx, true);
        }
        queue.incoming.respond.remove(&tx_id);
    }

    for tx_id in list.tx_ids.ids() {
        if !queue.incoming.progress.contains_key(&tx_id) {
            let mut tx = pending_tx(queue, store, tx_id, queue.incoming.waittime);
            tx.next_response = Instant::now();
            queue.incoming.progress.insert(tx_id, tx);
            queue.incoming.respond.insert(tx_id);
        }
    }
}

fn incoming_metadata(queue: &mut TxQueue, store: &mut Store, meta: Metadata) -> Result<()> {
    let tx_id = meta.tx_id;
    if meta.file_size == 0 || meta.file_size > MAX_FILE_SIZE {
        return Err(TransferError::Payload {
            kind: "METADATA",
            reason: "file size out of range",
        });
    }

    let existing = queue.incoming.progress.remove(&tx_id);
    let mut tx = match existing {
        Some(tx)
            if tx.sentmeta
                && (tx.file_crc != meta.file_crc
                    || tx.file_size != meta.file_size
                    || tx.file_name != meta.file_name
                    || tx.agent_name != meta.agent_name) =>
        {
            let mut old = tx;
            info!(node = %queue.node_name, tx_id, old = %old.file_name, new = %meta.file_name, "transaction id reused for a different file");
            store.abandon(&mut old, true);
            let mut tx = pending_tx(queue, store, tx_id, queue.incoming.waittime);
            store.reset_staging(&mut tx)?;
            tx
        }
        Some(tx) if tx.sentmeta => {
            queue.incoming.progress.insert(tx_id, tx);
            return Ok(());
        }
        Some(tx) => tx,
        None => {
            let mut tx = pending_tx(queue, store, tx_id, queue.incoming.waittime);
            store.reset_staging(&mut tx)?;
            tx
        }
    };

    tx.agent_name = meta.agent_name;
    tx.file_name = meta.file_name;
    tx.file_size = meta.file_size;
    tx.file_crc = meta.file_crc;
    tx.filepath = store
        .incoming_dir(&queue.node_name)
        .join(&tx.agent_name)
        .join(&tx.file_name);
    tx.sentmeta = true;
    tx.merge();
    checkpoint(queue, store, &mut tx, std::time::Duration::ZERO);
    debug!(node = %queue.node_name, tx_id, file = %tx.file_name, size = tx.file_size, "incoming transaction described");

    if tx.total_bytes == tx.file_size {
        queue.incoming.respond.insert(tx_id);
    }
    queue.incoming.progress.insert(tx_id, tx);
    Ok(())
}

/// Persist `tx`, keeping it in memory if the `.meta` cannot be written.
///
/// The staging file still holds every received byte, so the transfer goes
/// on and the next save retries the checkpoint.
fn checkpoint(queue: &TxQueue, store: &Store, tx: &mut TxProgress, interval: std::time::Duration) {
    if let Err(err) = store.save(tx, queue.node_id, interval) {
        warn!(node = %queue.node_name, tx_id = tx.tx_id, path = %tx.meta_path().display(), error = %err, "failed to persist incoming transaction");
    }
}

fn incoming_data(
    queue: &mut TxQueue,
    store: &mut Store,
    data: Data,
    merge_interval: u32,
    meta_interval: std::time::Duration,
) -> Result<()> {
    let tx_id = data.tx_id;
    let range = data.range();
    let waittime = queue.incoming.waittime;

    let mut tx = match queue.incoming.progress.remove(&tx_id) {
        Some(tx) if tx.complete => {
            queue.incoming.progress.insert(tx_id, tx);
            return Ok(());
        }
        Some(mut tx) if tx.sentmeta && range.chunk_end >= tx.file_size => {
            info!(node = %queue.node_name, tx_id, chunk_end = range.chunk_end, size = tx.file_size, "data beyond announced size, restarting transaction");
            store.abandon(&mut tx, true);
            let mut fresh = pending_tx(queue, store, tx_id, waittime);
            store.reset_staging(&mut fresh)?;
            queue.incoming.respond.insert(tx_id);
            fresh
        }
        Some(tx) => tx,
        None => {
            let mut fresh = pending_tx(queue, store, tx_id, waittime);
            store.reset_staging(&mut fresh)?;
            queue.incoming.respond.insert(tx_id);
            fresh
        }
    };

    if let Err(err) = store.write_chunk(&mut tx, data.chunk_start, &data.chunk) {
        warn!(node = %queue.node_name, tx_id, error = %err, "failed to write chunk, abandoning transaction");
        store.abandon(&mut tx, false);
        queue.incoming.respond.remove(&tx_id);
        return Err(err);
    }
    chunks::add_chunk(&mut tx.file_info, range);
    tx.data_count += 1;
    tx.next_response = Instant::now() + waittime;

    let may_be_complete = tx.sentmeta && chunks::total_bytes(&tx.file_info) >= tx.file_size;
    if tx.data_count >= merge_interval || may_be_complete {
        tx.merge();
    }
    if tx.sentmeta {
        if tx.total_bytes == tx.file_size {
            match store.promote(&mut tx) {
                Ok(true) => {
                    info!(node = %queue.node_name, tx_id, path = %tx.filepath.display(), size = tx.file_size, "file received");
                    queue.incoming.respond.insert(tx_id);
                }
                Ok(false) => {
                    queue.incoming.respond.remove(&tx_id);
                    return Ok(());
                }
                Err(err) => {
                    store.abandon(&mut tx, true);
                    queue.incoming.respond.remove(&tx_id);
                    return Err(err);
                }
            }
        } else {
            checkpoint(queue, store, &mut tx, meta_interval);
        }
    }
    queue.incoming.progress.insert(tx_id, tx);
    Ok(())
}
