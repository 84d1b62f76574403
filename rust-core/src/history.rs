// History reads: every committed verdict for one fingerprint, in backend commit order.
// Reads are paged and lazy; re-reading is always safe and never mutates anything.

use crate::backend::{LedgerBackend, RawRecord, TransactionRef};
use crate::client::map_backend_error;
use crate::deadline::{call_with_timeout, CallError};
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::record::{decode_record, Record};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub tx_ref: TransactionRef,
    pub height: u64,
    pub position: u32,
    /// Whether the submitter signature verified on read.
    pub authentic: bool,
    pub record: Record,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct History {
    pub fingerprint: Fingerprint,
    pub records: Vec<HistoryEntry>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn contains(&self, tx_ref: &TransactionRef) -> bool {
        self.records.iter().any(|e| &e.tx_ref == tx_ref)
    }
}

impl IntoIterator for History {
    type Item = HistoryEntry;
    type IntoIter = std::vec::IntoIter<HistoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

pub struct HistoryResolver {
    backend: Arc<dyn LedgerBackend>,
    page_size: usize,
    timeout: Duration,
}

impl HistoryResolver {
    pub fn new(backend: Arc<dyn LedgerBackend>, page_size: usize, timeout: Duration) -> Self {
        Self {
            backend,
            page_size: page_size.max(1),
            timeout,
        }
    }

    /// Full history. An unknown fingerprint yields an empty history, not an error.
    pub fn history(&self, fingerprint: &Fingerprint) -> Result<History, LedgerError> {
        let records = self.iter(fingerprint).collect::<Result<Vec<_>, _>>()?;
        Ok(History {
            fingerprint: *fingerprint,
            records,
        })
    }

    /// Lazy cursor over the history; pages are fetched as the cursor advances.
    pub fn iter(&self, fingerprint: &Fingerprint) -> HistoryIter<'_> {
        HistoryIter {
            resolver: self,
            fingerprint: *fingerprint,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&self, fingerprint: &Fingerprint, offset: usize) -> Result<Vec<RawRecord>, LedgerError> {
        let backend = Arc::clone(&self.backend);
        let fp = *fingerprint;
        let limit = self.page_size;
        match call_with_timeout(self.timeout, move || backend.get_history_page(&fp, offset, limit)) {
            Ok(res) => res.map_err(map_backend_error),
            Err(CallError::TimedOut) => Err(LedgerError::Unavailable(format!(
                "history read timed out after {} ms",
                self.timeout.as_millis()
            ))),
            Err(CallError::NotStarted(msg)) => Err(LedgerError::Unavailable(msg)),
        }
    }
}

pub struct HistoryIter<'a> {
    resolver: &'a HistoryResolver,
    fingerprint: Fingerprint,
    offset: usize,
    buffer: VecDeque<RawRecord>,
    exhausted: bool,
}

impl Iterator for HistoryIter<'_> {
    type Item = Result<HistoryEntry, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.resolver.fetch_page(&self.fingerprint, self.offset) {
                Ok(page) => {
                    debug!(fingerprint = %self.fingerprint, offset = self.offset, n = page.len(), "history page");
                    self.exhausted = page.len() < self.resolver.page_size;
                    self.offset += page.len();
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let raw = self.buffer.pop_front()?;
        Some(resolve_entry(&self.fingerprint, raw))
    }
}

fn resolve_entry(fingerprint: &Fingerprint, raw: RawRecord) -> Result<HistoryEntry, LedgerError> {
    let record = decode_record(&raw.bytes).map_err(|reason| LedgerError::Malformed {
        tx_ref: raw.tx_ref.to_string(),
        reason,
    })?;
    if &record.fingerprint != fingerprint {
        return Err(LedgerError::Malformed {
            tx_ref: raw.tx_ref.to_string(),
            reason: format!("record belongs to {}", record.fingerprint),
        });
    }
    let authentic = record.validate().is_ok();
    if !authentic {
        warn!(%fingerprint, tx_ref = %raw.tx_ref, "record signature does not verify");
    }
    Ok(HistoryEntry {
        tx_ref: raw.tx_ref,
        height: raw.height,
        position: raw.position,
        authentic,
        record,
    })
}
