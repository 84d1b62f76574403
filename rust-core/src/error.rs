//! Error taxonomy. Each variant carries its own recovery contract:
//!
//! - [`ClassificationError`]: surfaced as-is, never retried automatically.
//! - [`LedgerError::Unavailable`]: transient; retry with backoff.
//! - [`LedgerError::Rejected`]: permanent; never retry unmodified.
//! - [`LedgerError::Timeout`]: ambiguous; re-query finality first. A retry with
//!   the same inputs inside the dedup window returns the original reference.

use crate::dedup::DedupKey;
use crate::fingerprint::Fingerprint;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassificationError {
    #[error("classifier unreachable: {0}")]
    Unreachable(String),

    #[error("malformed classifier result: {0}")]
    Malformed(String),

    #[error("classifier returned unknown category: {0}")]
    UnknownCategory(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected record: {0}")]
    Rejected(String),

    #[error("ledger did not answer in time; acceptance unknown (dedup key {dedup_key})")]
    Timeout { dedup_key: DedupKey },

    #[error("ledger returned malformed record {tx_ref}: {reason}")]
    Malformed { tx_ref: String, reason: String },
}

impl LedgerError {
    /// Whether an unmodified retry may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Timeout { .. })
    }
}

/// Per-item failure of a moderation request. Carries what a caller needs to
/// reconcile later through `verify`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModerationError {
    #[error("classification of {fingerprint} failed: {source}")]
    Classification {
        fingerprint: Fingerprint,
        #[source]
        source: ClassificationError,
    },

    #[error("ledger submission of {fingerprint} failed: {source}")]
    Ledger {
        fingerprint: Fingerprint,
        dedup_key: Option<DedupKey>,
        #[source]
        source: LedgerError,
    },
}

impl ModerationError {
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            ModerationError::Classification { fingerprint, .. } => *fingerprint,
            ModerationError::Ledger { fingerprint, .. } => *fingerprint,
        }
    }

    pub fn dedup_key(&self) -> Option<DedupKey> {
        match self {
            ModerationError::Classification { .. } => None,
            ModerationError::Ledger { dedup_key, .. } => *dedup_key,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
