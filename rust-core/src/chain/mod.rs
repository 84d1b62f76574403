//! In-process reference ledger backend.
//!
//! Single writer, block-structured, append-only: accepted records wait in a
//! pending pool until `commit_pending` seals them into a hash-linked block with
//! a merkle root over its record hashes. Committed blocks can be snapshotted
//! to disk and are re-validated on load.

pub mod block;
pub mod ledger;
pub mod store;

pub use block::{block_hash, merkle_root_hashes, Block, BlockHeader};
pub use ledger::{ChainError, ChainLedger};
pub use store::{PersistedSnapshot, SnapshotStore};
