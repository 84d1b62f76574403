#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use verdict_core::chain::ChainLedger;
use verdict_core::{
    BackendError, CategorySet, ContentKind, Fingerprint, LedgerBackend, RawRecord, Record, Submitter,
    TransactionRef, VerificationState, Verdict,
};

pub fn text_verdict(category: &str, confidence: f64) -> Verdict {
    Verdict {
        content_kind: ContentKind::Text,
        category: category.into(),
        confidence,
        is_flagged: confidence > 0.8,
        nested_verdict: None,
    }
}

pub fn submitter(seed: u8) -> Submitter {
    Submitter::from_secret(&[seed; 32]).expect("submitter")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Accept writes and then lose them.
    Forgetful,
    Unreachable,
}

/// Chain ledger with knobs for latency, lost writes, outages and replica lag.
pub struct FlakyBackend {
    pub inner: ChainLedger,
    pub submits: AtomicUsize,
    submit_delay: Mutex<Duration>,
    read_delay: Mutex<Duration>,
    mode: Mutex<Mode>,
    /// Finality answers served before the real one, oldest first.
    scripted_finality: Mutex<Vec<VerificationState>>,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ChainLedger::new(CategorySet::default(), 100),
            submits: AtomicUsize::new(0),
            submit_delay: Mutex::new(Duration::ZERO),
            read_delay: Mutex::new(Duration::ZERO),
            mode: Mutex::new(Mode::Normal),
            scripted_finality: Mutex::new(Vec::new()),
        })
    }

    pub fn set_submit_delay(&self, d: Duration) {
        *self.submit_delay.lock() = d;
    }

    pub fn set_read_delay(&self, d: Duration) {
        *self.read_delay.lock() = d;
    }

    pub fn set_mode(&self, m: Mode) {
        *self.mode.lock() = m;
    }

    pub fn script_finality(&self, states: &[VerificationState]) {
        *self.scripted_finality.lock() = states.to_vec();
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    fn pause(&self, d: &Mutex<Duration>) {
        let d = *d.lock();
        if !d.is_zero() {
            thread::sleep(d);
        }
    }

    fn check_reachable(&self) -> Result<(), BackendError> {
        if *self.mode.lock() == Mode::Unreachable {
            return Err(BackendError::Unreachable("connection refused".into()));
        }
        Ok(())
    }
}

impl LedgerBackend for FlakyBackend {
    fn submit_record(&self, record: &Record) -> Result<TransactionRef, BackendError> {
        self.check_reachable()?;
        self.pause(&self.submit_delay);
        self.submits.fetch_add(1, Ordering::SeqCst);
        if *self.mode.lock() == Mode::Forgetful {
            return Ok(TransactionRef::new(hex::encode(record.hash())));
        }
        self.inner.submit_record(record)
    }

    fn get_history(&self, fingerprint: &Fingerprint) -> Result<Vec<RawRecord>, BackendError> {
        self.check_reachable()?;
        self.pause(&self.read_delay);
        self.inner.get_history(fingerprint)
    }

    fn get_history_page(
        &self,
        fingerprint: &Fingerprint,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RawRecord>, BackendError> {
        self.check_reachable()?;
        self.pause(&self.read_delay);
        self.inner.get_history_page(fingerprint, offset, limit)
    }

    fn get_finality(&self, tx_ref: &TransactionRef) -> Result<VerificationState, BackendError> {
        self.check_reachable()?;
        self.pause(&self.read_delay);
        {
            let mut script = self.scripted_finality.lock();
            if !script.is_empty() {
                return Ok(script.remove(0));
            }
        }
        self.inner.get_finality(tx_ref)
    }
}

/// Serves a fixed history regardless of fingerprint.
pub struct StaticHistory(pub Vec<RawRecord>);

impl LedgerBackend for StaticHistory {
    fn submit_record(&self, _record: &Record) -> Result<TransactionRef, BackendError> {
        Err(BackendError::Rejected("read-only".into()))
    }

    fn get_history(&self, _fingerprint: &Fingerprint) -> Result<Vec<RawRecord>, BackendError> {
        Ok(self.0.clone())
    }

    fn get_finality(&self, _tx_ref: &TransactionRef) -> Result<VerificationState, BackendError> {
        Ok(VerificationState::Unknown)
    }
}
