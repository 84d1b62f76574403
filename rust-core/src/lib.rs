// Content-addressed moderation audit ledger.
// Fingerprint content, classify it, append signed verdict records to an
// append-only backend, then read history and finality back.

pub mod backend;
pub mod chain;
pub mod classifier;
pub mod client;
pub mod clock;
pub mod config;
pub mod deadline;
pub mod dedup;
pub mod error;
pub mod fingerprint;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod history;
pub mod lexicon;
pub mod record;
pub mod service;
pub mod verdict;
pub mod verify;

pub use backend::{BackendError, LedgerBackend, RawRecord, TransactionRef, VerificationState};
pub use classifier::{Classifier, ClassifierAdapter, RawClassification};
pub use client::{LedgerClient, Submitter};
pub use config::ModerationConfig;
pub use error::{ClassificationError, ConfigError, LedgerError, ModerationError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use history::{History, HistoryEntry, HistoryResolver};
pub use record::Record;
pub use service::{BatchItem, ModerationOutcome, ModerationService};
pub use verdict::{CategorySet, ContentKind, Verdict};
pub use verify::Verifier;

// Record encoding version; bumped on any change to the canonical layout.
pub const RECORD_VERSION: u8 = 1;

/*
Ledger state lives behind `LedgerBackend` only:
- the client keeps a bounded dedup cache, nothing authoritative
- `chain` is one backend among many, not a dependency of the client
- time is injected through `clock::Clock`
*/
