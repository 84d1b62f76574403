//! The append-only store the ledger client writes to.
//!
//! Any store that accepts writes synchronously, finalizes them asynchronously
//! and never removes a finalized write satisfies this contract: a chain, a
//! WORM log, a transparency log. [`crate::chain::ChainLedger`] is the in-process
//! reference implementation.

use crate::fingerprint::Fingerprint;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque handle issued by the backend when it accepts a record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRef(String);

impl TransactionRef {
    pub fn new(s: impl Into<String>) -> Self {
        TransactionRef(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finality of a transaction reference. Finalized is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    /// Accepted, still propagating.
    Pending,
    /// Irreversibly committed; the record is part of history.
    Finalized,
    /// Not recognized: not yet propagated or dropped. Assume neither.
    Unknown,
}

impl VerificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationState::Pending => "pending",
            VerificationState::Finalized => "finalized",
            VerificationState::Unknown => "unknown",
        }
    }
}

/// A committed record as the backend stores it, with its commit position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub tx_ref: TransactionRef,
    pub height: u64,
    pub position: u32,
    pub bytes: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    #[error("backend rejected write: {0}")]
    Rejected(String),
}

pub trait LedgerBackend: Send + Sync {
    /// Accept `record` into the pending set. Finalization happens later.
    fn submit_record(&self, record: &Record) -> Result<TransactionRef, BackendError>;

    /// All committed records for `fingerprint`, in commit order.
    fn get_history(&self, fingerprint: &Fingerprint) -> Result<Vec<RawRecord>, BackendError>;

    /// One page of [`LedgerBackend::get_history`]. Stores with native paging should override.
    fn get_history_page(
        &self,
        fingerprint: &Fingerprint,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, BackendError> {
        Ok(self
            .get_history(fingerprint)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    fn get_finality(&self, tx_ref: &TransactionRef) -> Result<VerificationState, BackendError>;
}
