// Reference backend state: pending pool, committed blocks, and the indexes
// that answer history and finality. Commit order is pool (FIFO) order.

use crate::backend::{BackendError, LedgerBackend, RawRecord, TransactionRef, VerificationState};
use crate::chain::block::{block_hash, merkle_root_hashes, tx_hash, Block, BlockHeader};
use crate::chain::store::{PersistedSnapshot, SnapshotStore};
use crate::fingerprint::{Fingerprint, Hash, ZERO_HASH};
use crate::record::{decode_record, encode_record, Record, RecordValidationError};
use crate::verdict::{CategorySet, ContentKind, Verdict};
use hex::FromHex;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot rejected: {0}")]
    Corrupt(String),
}

#[derive(Default)]
struct ChainState {
    height: u64,
    tip_hash: Hash,
    blocks: Vec<Block>,
    pending: VecDeque<(Hash, Vec<u8>)>,
    pending_index: HashSet<Hash>,
    tx_index: HashMap<Hash, (u64, u32)>,
    by_fingerprint: HashMap<Fingerprint, Vec<(u64, u32)>>,
}

impl ChainState {
    /// Decode and check every record of a candidate block. Touches nothing, so a
    /// failure leaves the state exactly as it was.
    fn admit(&self, txs: &[Vec<u8>], categories: &CategorySet) -> Result<Vec<(Hash, Fingerprint)>, String> {
        let mut seen = HashSet::with_capacity(txs.len());
        let mut out = Vec::with_capacity(txs.len());
        for tx in txs {
            let record = decode_record(tx)?;
            check_record(&record, categories)?;
            let th = tx_hash(tx);
            if self.tx_index.contains_key(&th) || !seen.insert(th) {
                return Err("duplicate record hash".into());
            }
            out.push((th, record.fingerprint));
        }
        Ok(out)
    }

    /// Append a block admitted by [`ChainState::admit`] and index its records.
    fn apply_block(&mut self, block: Block, admitted: Vec<(Hash, Fingerprint)>) {
        let height = block.header.height;
        for (pos, (th, fp)) in admitted.into_iter().enumerate() {
            self.tx_index.insert(th, (height, pos as u32));
            self.by_fingerprint.entry(fp).or_default().push((height, pos as u32));
        }
        self.height = height;
        self.tip_hash = block_hash(&block.header);
        self.blocks.push(block);
    }

    fn block_at(&self, height: u64) -> Option<&Block> {
        // Heights start at 1 and are contiguous.
        height
            .checked_sub(1)
            .and_then(|i| self.blocks.get(i as usize))
    }

    fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            height: self.height,
            tip_hash: self.tip_hash,
            blocks: self.blocks.clone(),
        }
    }
}

pub struct ChainLedger {
    state: RwLock<ChainState>,
    categories: CategorySet,
    max_block_records: usize,
    store: Option<SnapshotStore>,
}

impl ChainLedger {
    /// Memory-only ledger.
    pub fn new(categories: CategorySet, max_block_records: usize) -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            categories,
            max_block_records: max_block_records.max(1),
            store: None,
        }
    }

    /// Ledger persisted under `data_dir`; an existing snapshot is re-validated and replayed.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        categories: CategorySet,
        max_block_records: usize,
    ) -> Result<Self, ChainError> {
        let store = SnapshotStore::new(data_dir)?;
        let mut state = ChainState::default();
        if let Some(persisted) = store.load()? {
            state = restore(persisted, &categories)?;
            info!(height = state.height, tip = %hex::encode(state.tip_hash), "ledger snapshot restored");
        }
        Ok(Self {
            state: RwLock::new(state),
            categories,
            max_block_records: max_block_records.max(1),
            store: Some(store),
        })
    }

    pub fn tip(&self) -> (u64, Hash) {
        let st = self.state.read();
        (st.height, st.tip_hash)
    }

    pub fn pending_len(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Merkle root over every committed record hash, in commit order.
    pub fn audit_root(&self) -> Hash {
        let st = self.state.read();
        let hashes: Vec<Hash> = st.blocks.iter().flat_map(|b| b.tx_hashes()).collect();
        merkle_root_hashes(&hashes)
    }

    pub fn block(&self, height: u64) -> Option<Block> {
        self.state.read().block_at(height).cloned()
    }

    /// Seal up to `max_block_records` pending records into the next block.
    /// Returns the new header, or `None` when nothing is pending.
    pub fn commit_pending(&self, now_ms: u64) -> Option<BlockHeader> {
        let mut st = self.state.write();
        if st.pending.is_empty() {
            return None;
        }

        let take = st.pending.len().min(self.max_block_records);
        let txs: Vec<Vec<u8>> = st.pending.iter().take(take).map(|(_, tx)| tx.clone()).collect();
        let admitted = match st.admit(&txs, &self.categories) {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, pending = st.pending.len(), "commit aborted; pending pool kept");
                return None;
            }
        };

        let tx_hashes: Vec<Hash> = admitted.iter().map(|(h, _)| *h).collect();
        let header = BlockHeader {
            height: st.height + 1,
            prev_block_hash: st.tip_hash,
            tx_root: merkle_root_hashes(&tx_hashes),
            timestamp_ms: now_ms,
        };
        st.pending.drain(..take);
        for h in &tx_hashes {
            st.pending_index.remove(h);
        }
        st.apply_block(
            Block {
                header: header.clone(),
                txs,
            },
            admitted,
        );
        info!(height = header.height, records = tx_hashes.len(), "block committed");

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&st.snapshot()) {
                warn!(error = %e, path = %store.path().display(), "snapshot save failed");
            }
        }
        Some(header)
    }
}

impl LedgerBackend for ChainLedger {
    fn submit_record(&self, record: &Record) -> Result<TransactionRef, BackendError> {
        check_record(record, &self.categories).map_err(BackendError::Rejected)?;
        let tx = encode_record(record);
        let th = tx_hash(&tx);
        let tx_ref = TransactionRef::new(hex::encode(th));

        let mut st = self.state.write();
        // Byte-identical resubmission: same reference, no second write.
        if st.tx_index.contains_key(&th) || st.pending_index.contains(&th) {
            return Ok(tx_ref);
        }
        st.pending_index.insert(th);
        st.pending.push_back((th, tx));
        Ok(tx_ref)
    }

    fn get_history(&self, fingerprint: &Fingerprint) -> Result<Vec<RawRecord>, BackendError> {
        self.get_history_page(fingerprint, 0, usize::MAX)
    }

    fn get_history_page(
        &self,
        fingerprint: &Fingerprint,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, BackendError> {
        let st = self.state.read();
        let Some(positions) = st.by_fingerprint.get(fingerprint) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for &(height, pos) in positions.iter().skip(offset).take(limit) {
            let tx = st
                .block_at(height)
                .and_then(|b| b.txs.get(pos as usize))
                .ok_or_else(|| BackendError::Unreachable("index points past chain".into()))?;
            out.push(RawRecord {
                tx_ref: TransactionRef::new(hex::encode(tx_hash(tx))),
                height,
                position: pos,
                bytes: tx.clone(),
            });
        }
        Ok(out)
    }

    fn get_finality(&self, tx_ref: &TransactionRef) -> Result<VerificationState, BackendError> {
        let Ok(th) = <[u8; 32]>::from_hex(tx_ref.as_str()) else {
            return Ok(VerificationState::Unknown);
        };
        let st = self.state.read();
        if st.tx_index.contains_key(&th) {
            Ok(VerificationState::Finalized)
        } else if st.pending_index.contains(&th) {
            Ok(VerificationState::Pending)
        } else {
            Ok(VerificationState::Unknown)
        }
    }
}

/// Record-level admission rules shared by submission, commit and restore.
fn check_record(record: &Record, categories: &CategorySet) -> Result<(), String> {
    record.validate().map_err(|e| match e {
        RecordValidationError::InvalidVersion => "unsupported record version".to_string(),
        RecordValidationError::InvalidSubmitter => "malformed submitter address".to_string(),
        RecordValidationError::InvalidSignature => "signature does not verify".to_string(),
    })?;
    check_verdict(&record.verdict, categories)?;
    match record.verdict.nested() {
        None => Ok(()),
        Some(_) if record.verdict.content_kind != ContentKind::Image => {
            Err("only image verdicts carry a nested verdict".into())
        }
        Some(n) if n.content_kind != ContentKind::Text || n.nested_verdict.is_some() => {
            Err("nested verdict must be a plain text verdict".into())
        }
        Some(n) => check_verdict(n, categories),
    }
}

fn check_verdict(v: &Verdict, categories: &CategorySet) -> Result<(), String> {
    if !categories.contains(&v.category) {
        return Err(format!("unknown category {:?}", v.category));
    }
    if !v.confidence.is_finite() || !(0.0..=1.0).contains(&v.confidence) {
        return Err(format!("confidence {} outside [0, 1]", v.confidence));
    }
    Ok(())
}

fn restore(persisted: PersistedSnapshot, categories: &CategorySet) -> Result<ChainState, ChainError> {
    let mut blocks = persisted.blocks;
    blocks.sort_by_key(|b| b.header.height);
    if blocks.is_empty() && persisted.height > 0 {
        return Err(ChainError::Corrupt("snapshot has height but no blocks".into()));
    }

    let mut state = ChainState::default();
    let mut expected_prev = ZERO_HASH;
    let mut expected_height = 1u64;
    for block in blocks {
        if block.header.height != expected_height {
            return Err(ChainError::Corrupt("block height mismatch".into()));
        }
        if block.header.prev_block_hash != expected_prev {
            return Err(ChainError::Corrupt("block linkage mismatch".into()));
        }
        if merkle_root_hashes(&block.tx_hashes()) != block.header.tx_root {
            return Err(ChainError::Corrupt(format!(
                "tx root mismatch at height {}",
                block.header.height
            )));
        }
        let admitted = state
            .admit(&block.txs, categories)
            .map_err(|e| ChainError::Corrupt(format!("block {}: {}", block.header.height, e)))?;
        expected_prev = block_hash(&block.header);
        expected_height += 1;
        state.apply_block(block, admitted);
    }

    if state.height != persisted.height || state.tip_hash != persisted.tip_hash {
        return Err(ChainError::Corrupt("tip does not match blocks".into()));
    }
    Ok(state)
}
