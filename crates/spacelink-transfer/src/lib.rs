//! Reliable, resumable file transfer over lossy packet links.
//!
//! A [`Transfer`] engine keeps, for every peer in its [`NodeTable`], one
//! incoming and one outgoing queue of transactions. Each transaction moves
//! one file in chunks sized to the link's packet limit:
//!
//! - the sender announces files (QUEUE, METADATA) and streams DATA
//! - the receiver asks for what it lacks (REQMETA, REQDATA)
//! - the sender asks whether it is done (REQCOMPLETE); the receiver verifies
//!   the whole-file CRC and answers COMPLETE
//! - the sender drops the transaction with CANCEL
//!
//! Progress is persisted in `.meta` files so both sides resume after a
//! restart without resending acknowledged bytes. The engine never blocks on
//! the network: callers pull packets with
//! [`get_outgoing_lpackets`](Transfer::get_outgoing_lpackets) and
//! [`get_outgoing_rpackets`](Transfer::get_outgoing_rpackets) and push
//! received ones through [`receive_packet`](Transfer::receive_packet).

pub mod chunks;
pub mod config;
pub mod engine;
pub mod error;
mod incoming;
pub mod meta;
pub mod node;
mod outgoing;
pub mod payload;
pub mod progress;
mod store;
pub mod txid;

pub use chunks::{find_chunks_missing, merge_chunks_overlap, FileProgress};
pub use config::{TransferConfig, DEFAULT_PACKET_SIZE};
pub use engine::{ReceiveStatus, Transfer};
pub use error::{Result, TransferError};
pub use node::NodeTable;
pub use payload::{FilePacket, TxBitmap};
pub use progress::{Direction, TxEntry, TxProgress, TxQueue, TxSummary};
pub use store::{error_path, ERROR_SUFFIX};
pub use txid::tx_id_range;
