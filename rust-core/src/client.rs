// Ledger client: signs records, deduplicates retried submissions, bounds every backend call.
// Submission returns once the backend has the record pending; it never waits for finality.

use crate::backend::{BackendError, LedgerBackend, TransactionRef, VerificationState};
use crate::clock::Clock;
use crate::deadline::{call_with_timeout, remaining, CallError};
use crate::dedup::{dedup_key, time_bucket, Claim, DedupCache, DedupKey};
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::record::{keypair_from_secret, PublicKey, Record};
use crate::verdict::Verdict;
use ed25519_dalek::Keypair;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Signing identity of whoever submits records.
#[derive(Clone)]
pub struct Submitter {
    keypair: Arc<Keypair>,
}

impl Submitter {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn from_secret(secret: &[u8; 32]) -> Result<Self, String> {
        Ok(Self::new(keypair_from_secret(secret)?))
    }

    pub fn id(&self) -> PublicKey {
        self.keypair.public.to_bytes()
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }

    fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter").field("id", &self.id_hex()).finish()
    }
}

/// Outcome of one submission attempt together with the dedup key it used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub dedup_key: DedupKey,
    pub outcome: Result<TransactionRef, LedgerError>,
}

pub struct LedgerClient {
    backend: Arc<dyn LedgerBackend>,
    clock: Arc<dyn Clock>,
    cache: Arc<DedupCache>,
    timeout: Duration,
}

impl LedgerClient {
    pub fn new(
        backend: Arc<dyn LedgerBackend>,
        clock: Arc<dyn Clock>,
        dedup_window: Duration,
        dedup_capacity: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            clock,
            cache: Arc::new(DedupCache::new(dedup_window.as_millis() as u64, dedup_capacity)),
            timeout,
        }
    }

    pub fn submit(
        &self,
        fingerprint: &Fingerprint,
        verdict: &Verdict,
        submitter: &Submitter,
    ) -> Result<TransactionRef, LedgerError> {
        self.submit_tracked(fingerprint, verdict, submitter).outcome
    }

    /// Like [`LedgerClient::submit`], and also reports the dedup key the attempt
    /// actually used, so callers can reconcile whatever the outcome.
    pub fn submit_tracked(&self, fingerprint: &Fingerprint, verdict: &Verdict, submitter: &Submitter) -> Submission {
        let now_ms = self.clock.now_ms();
        let bucket = time_bucket(now_ms, self.cache.window_ms());
        let key = dedup_key(fingerprint, verdict, &submitter.id(), bucket);
        let prev = bucket
            .checked_sub(1)
            .map(|b| dedup_key(fingerprint, verdict, &submitter.id(), b));
        // One budget for the whole attempt: waiting, finality checks and the write.
        let deadline = Instant::now() + self.timeout;

        Submission {
            dedup_key: key,
            outcome: self.run(fingerprint, verdict, submitter, key, prev, now_ms, deadline),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        fingerprint: &Fingerprint,
        verdict: &Verdict,
        submitter: &Submitter,
        key: DedupKey,
        prev: Option<DedupKey>,
        now_ms: u64,
        deadline: Instant,
    ) -> Result<TransactionRef, LedgerError> {
        loop {
            match self.cache.claim_or_wait(key, prev, now_ms, deadline) {
                Claim::Busy => return Err(LedgerError::Timeout { dedup_key: key }),
                Claim::Existing(tx_ref) => match self.finality(&tx_ref, key, deadline)? {
                    VerificationState::Pending | VerificationState::Finalized => {
                        debug!(%fingerprint, %tx_ref, dedup_key = %key, "dedup hit; reusing reference");
                        return Ok(tx_ref);
                    }
                    VerificationState::Unknown => {
                        warn!(%tx_ref, dedup_key = %key, "cached reference unknown to backend; resubmitting");
                        self.cache.forget(key, &tx_ref);
                        if let Some(prev) = prev {
                            self.cache.forget(prev, &tx_ref);
                        }
                    }
                },
                Claim::Acquired => {
                    return self.submit_claimed(fingerprint, verdict, submitter, key, now_ms, deadline)
                }
            }
        }
    }

    fn submit_claimed(
        &self,
        fingerprint: &Fingerprint,
        verdict: &Verdict,
        submitter: &Submitter,
        key: DedupKey,
        now_ms: u64,
        deadline: Instant,
    ) -> Result<TransactionRef, LedgerError> {
        let Some(budget) = remaining(deadline) else {
            self.cache.release(key);
            warn!(%fingerprint, dedup_key = %key, "timeout spent before write; nothing submitted");
            return Err(LedgerError::Timeout { dedup_key: key });
        };

        let mut record = Record::new(*fingerprint, verdict.clone(), submitter.id(), now_ms);
        record.sign(submitter.keypair());

        // The worker settles the cache itself so a late answer still lands there.
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let waiting = Arc::new(AtomicBool::new(true));
        let caller = Arc::clone(&waiting);
        let outcome = call_with_timeout(budget, move || {
            let res = backend.submit_record(&record);
            match &res {
                Ok(tx_ref) => {
                    cache.complete(key, tx_ref.clone(), now_ms);
                    if !caller.load(Ordering::SeqCst) {
                        warn!(%tx_ref, dedup_key = %key, "late submission accepted; cached for retries");
                    }
                }
                Err(e) => {
                    warn!(dedup_key = %key, error = %e, "backend refused submission");
                    cache.release(key)
                }
            }
            res
        });
        self.settle(fingerprint, key, outcome, &waiting)
    }

    fn settle(
        &self,
        fingerprint: &Fingerprint,
        key: DedupKey,
        outcome: Result<Result<TransactionRef, BackendError>, CallError>,
        waiting: &AtomicBool,
    ) -> Result<TransactionRef, LedgerError> {
        match outcome {
            Ok(Ok(tx_ref)) => {
                info!(%fingerprint, %tx_ref, dedup_key = %key, "record accepted");
                Ok(tx_ref)
            }
            Ok(Err(e)) => Err(map_backend_error(e)),
            Err(CallError::TimedOut) => {
                waiting.store(false, Ordering::SeqCst);
                warn!(%fingerprint, dedup_key = %key, timeout_ms = self.timeout.as_millis() as u64, "submission timed out");
                Err(LedgerError::Timeout { dedup_key: key })
            }
            // The worker never ran, so the claim is still ours to give back.
            Err(CallError::NotStarted(msg)) => {
                self.cache.release(key);
                warn!(%fingerprint, dedup_key = %key, error = %msg, "submission not started");
                Err(LedgerError::Unavailable(msg))
            }
        }
    }

    fn finality(
        &self,
        tx_ref: &TransactionRef,
        key: DedupKey,
        deadline: Instant,
    ) -> Result<VerificationState, LedgerError> {
        let budget = remaining(deadline).ok_or(LedgerError::Timeout { dedup_key: key })?;
        let backend = Arc::clone(&self.backend);
        let t = tx_ref.clone();
        match call_with_timeout(budget, move || backend.get_finality(&t)) {
            Ok(res) => res.map_err(map_backend_error),
            Err(CallError::TimedOut) => Err(LedgerError::Timeout { dedup_key: key }),
            Err(CallError::NotStarted(msg)) => Err(LedgerError::Unavailable(msg)),
        }
    }
}

pub(crate) fn map_backend_error(e: BackendError) -> LedgerError {
    match e {
        BackendError::Unreachable(msg) => LedgerError::Unavailable(msg),
        BackendError::Rejected(msg) => LedgerError::Rejected(msg),
    }
}
