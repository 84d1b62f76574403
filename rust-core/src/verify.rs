// Finality checks against the backend. Pure reads: nothing here changes ledger state.

use crate::backend::{BackendError, LedgerBackend, TransactionRef, VerificationState};
use crate::deadline::{call_with_timeout, CallError};
use crate::error::LedgerError;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// References already seen Finalized. Finality is terminal, so these are
/// answered locally; a lagging replica can never make one regress.
struct FinalizedMemo {
    set: HashSet<TransactionRef>,
    order: VecDeque<TransactionRef>,
    capacity: usize,
}

impl FinalizedMemo {
    fn insert(&mut self, tx_ref: TransactionRef) {
        if self.capacity == 0 || !self.set.insert(tx_ref.clone()) {
            return;
        }
        self.order.push_back(tx_ref);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
    }
}

pub struct Verifier {
    backend: Arc<dyn LedgerBackend>,
    timeout: Duration,
    finalized: Mutex<FinalizedMemo>,
}

impl Verifier {
    pub fn new(backend: Arc<dyn LedgerBackend>, timeout: Duration, memo_capacity: usize) -> Self {
        Self {
            backend,
            timeout,
            finalized: Mutex::new(FinalizedMemo {
                set: HashSet::new(),
                order: VecDeque::new(),
                capacity: memo_capacity,
            }),
        }
    }

    /// Fails only when the backend cannot be reached. A check that runs past
    /// the timeout reports `Unknown`.
    pub fn verify(&self, tx_ref: &TransactionRef) -> Result<VerificationState, LedgerError> {
        if self.finalized.lock().set.contains(tx_ref) {
            return Ok(VerificationState::Finalized);
        }

        let backend = Arc::clone(&self.backend);
        let t = tx_ref.clone();
        let state = match call_with_timeout(self.timeout, move || backend.get_finality(&t)) {
            Ok(Ok(state)) => state,
            Ok(Err(BackendError::Unreachable(msg))) => return Err(LedgerError::Unavailable(msg)),
            Err(CallError::NotStarted(msg)) => return Err(LedgerError::Unavailable(msg)),
            // A finality query carries no input to reject; treat refusal as "not recognized".
            Ok(Err(BackendError::Rejected(_))) => VerificationState::Unknown,
            Err(CallError::TimedOut) => {
                debug!(%tx_ref, "finality check timed out");
                VerificationState::Unknown
            }
        };

        if state == VerificationState::Finalized {
            self.finalized.lock().insert(tx_ref.clone());
        }
        Ok(state)
    }
}
