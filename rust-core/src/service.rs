// Orchestration: fingerprint -> classify -> submit, plus history and verify passthroughs.
// Holds no ledger state of its own; everything durable lives behind the backend.

use crate::backend::{LedgerBackend, TransactionRef, VerificationState};
use crate::classifier::{Classifier, ClassifierAdapter};
use crate::client::{LedgerClient, Submitter};
use crate::clock::Clock;
use crate::config::ModerationConfig;
use crate::dedup::DedupKey;
use crate::error::{LedgerError, ModerationError};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::history::{History, HistoryResolver};
use crate::verdict::{ContentKind, Verdict};
use crate::verify::Verifier;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModerationOutcome {
    pub fingerprint: Fingerprint,
    pub verdict: Verdict,
    pub tx_ref: TransactionRef,
    pub dedup_key: DedupKey,
}

#[derive(Clone, Debug)]
pub struct BatchItem {
    pub content: Vec<u8>,
    pub kind: ContentKind,
}

impl BatchItem {
    pub fn new(content: impl Into<Vec<u8>>, kind: ContentKind) -> Self {
        Self {
            content: content.into(),
            kind,
        }
    }
}

pub struct ModerationService {
    adapter: ClassifierAdapter,
    client: LedgerClient,
    history: HistoryResolver,
    verifier: Verifier,
    submitter: Submitter,
}

impl ModerationService {
    /// Wire every component from one validated config.
    pub fn new(
        cfg: &ModerationConfig,
        classifier: Arc<dyn Classifier>,
        backend: Arc<dyn LedgerBackend>,
        clock: Arc<dyn Clock>,
        submitter: Submitter,
    ) -> Self {
        let timeout = cfg.ledger_timeout();
        Self {
            adapter: ClassifierAdapter::new(classifier, cfg.confidence_threshold, cfg.categories()),
            client: LedgerClient::new(
                Arc::clone(&backend),
                clock,
                cfg.dedup_window(),
                cfg.dedup_capacity,
                timeout,
            ),
            history: HistoryResolver::new(Arc::clone(&backend), cfg.history_page_size, timeout),
            verifier: Verifier::new(backend, timeout, cfg.verified_cache_capacity),
            submitter,
        }
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn moderate(&self, content: &[u8], kind: ContentKind) -> Result<ModerationOutcome, ModerationError> {
        let fp = fingerprint(content);
        let verdict = self
            .adapter
            .classify(content, kind)
            .map_err(|source| ModerationError::Classification {
                fingerprint: fp,
                source,
            })?;
        debug!(fingerprint = %fp, category = %verdict.category, flagged = verdict.is_flagged, "classified");

        let submission = self.client.submit_tracked(&fp, &verdict, &self.submitter);
        let dedup_key = submission.dedup_key;
        let tx_ref = submission.outcome.map_err(|source| ModerationError::Ledger {
            fingerprint: fp,
            dedup_key: Some(dedup_key),
            source,
        })?;

        Ok(ModerationOutcome {
            fingerprint: fp,
            verdict,
            tx_ref,
            dedup_key,
        })
    }

    /// Independent items, processed in parallel; results keep input order.
    pub fn batch_moderate(&self, items: &[BatchItem]) -> Vec<Result<ModerationOutcome, ModerationError>> {
        items
            .par_iter()
            .map(|item| self.moderate(&item.content, item.kind))
            .collect()
    }

    pub fn history(&self, fingerprint: &Fingerprint) -> Result<History, LedgerError> {
        self.history.history(fingerprint)
    }

    pub fn verify(&self, tx_ref: &TransactionRef) -> Result<VerificationState, LedgerError> {
        self.verifier.verify(tx_ref)
    }
}
