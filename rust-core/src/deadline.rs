// Bounded waits on blocking backend calls.
// The call runs on its own thread; the caller stops waiting at the deadline.
// A call that outlives its caller still runs to completion: giving up never
// retracts what the backend already accepted.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The deadline passed; the call keeps running detached.
    #[error("call did not finish in time")]
    TimedOut,

    /// The call never started, so nothing it would have done has happened.
    #[error("could not start backend call: {0}")]
    NotStarted(String),
}

/// Run `f` on a worker thread and wait at most `timeout` for its result.
pub fn call_with_timeout<T, F>(timeout: Duration, f: F) -> Result<T, CallError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("ledger-call".into())
        .spawn(move || {
            let _ = tx.send(f());
        })
        .map_err(|e| CallError::NotStarted(e.to_string()))?;
    rx.recv_timeout(timeout).map_err(|_| CallError::TimedOut)
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining(deadline: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        None
    } else {
        Some(left)
    }
}
