mod common;

use common::{submitter, text_verdict, FlakyBackend, Mode};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use verdict_core::clock::ManualClock;
use verdict_core::{fingerprint, LedgerBackend, LedgerClient, LedgerError, VerificationState};

const WINDOW: Duration = Duration::from_secs(60);

fn client(backend: &Arc<FlakyBackend>, clock: &Arc<ManualClock>, timeout: Duration) -> LedgerClient {
    LedgerClient::new(backend.clone(), clock.clone(), WINDOW, 1_000, timeout)
}

#[test]
fn same_submission_inside_window_reuses_reference() {
    let backend = FlakyBackend::new();
    let clock = Arc::new(ManualClock::new(120_000));
    let c = client(&backend, &clock, Duration::from_secs(2));
    let fp = fingerprint(b"hello");
    let v = text_verdict("safe", 0.1);
    let who = submitter(1);

    let first = c.submit(&fp, &v, &who).expect("submit");
    clock.advance(10_000);
    let second = c.submit(&fp, &v, &who).expect("submit");
    assert_eq!(first, second);
    assert_eq!(backend.submit_count(), 1);

    // Finalization does not change the answer.
    backend.inner.commit_pending(1);
    assert_eq!(c.submit(&fp, &v, &who).expect("submit"), first);
    assert_eq!(backend.submit_count(), 1);
}

#[test]
fn bucket_boundary_inside_window_still_deduplicates() {
    let backend = FlakyBackend::new();
    let clock = Arc::new(ManualClock::new(2 * 60_000 - 5));
    let c = client(&backend, &clock, Duration::from_secs(2));
    let fp = fingerprint(b"edge");
    let v = text_verdict("safe", 0.1);
    let who = submitter(1);

    let first = c.submit(&fp, &v, &who).expect("submit");
    clock.advance(10);
    assert_eq!(c.submit(&fp, &v, &who).expect("submit"), first);
    assert_eq!(backend.submit_count(), 1);
}

#[test]
fn outside_window_is_a_new_write() {
    let backend = FlakyBackend::new();
    let clock = Arc::new(ManualClock::new(0));
    let c = client(&backend, &clock, Duration::from_secs(2));
    let fp = fingerprint(b"again");
    let v = text_verdict("safe", 0.1);
    let who = submitter(1);

    let first = c.submit(&fp, &v, &who).expect("submit");
    clock.advance(2 * 60_000 + 1);
    let second = c.submit(&fp, &v, &who).expect("submit");
    assert_ne!(first, second);
    assert_eq!(backend.submit_count(), 2);
}

#[test]
fn different_verdict_or_submitter_is_not_a_duplicate() {
    let backend = FlakyBackend::new();
    let clock = Arc::new(ManualClock::new(0));
    let c = client(&backend, &clock, Duration::from_secs(2));
    let fp = fingerprint(b"x");

    let a = c.submit(&fp, &text_verdict("safe", 0.1), &submitter(1)).expect("submit");
    let b = c.submit(&fp, &text_verdict("safe", 0.2), &submitter(1)).expect("submit");
    let d = c.submit(&fp, &text_verdict("safe", 0.1), &submitter(2)).expect("submit");
    assert_ne!(a, b);
    assert_ne!(a, d);
    assert_eq!(backend.submit_count(), 3);
}

#[test]
fn timed_out_submission_is_picked_up_by_retry() {
    let backend = FlakyBackend::new();
    backend.set_submit_delay(Duration::from_millis(300));
    let clock = Arc::new(ManualClock::new(0));
    let c = client(&backend, &clock, Duration::from_millis(50));
    let fp = fingerprint(b"slow");
    let v = text_verdict("violence", 0.9);
    let who = submitter(1);

    let attempt = c.submit_tracked(&fp, &v, &who);
    let err = attempt.outcome.expect_err("should time out");
    let LedgerError::Timeout { dedup_key } = err else {
        panic!("expected timeout, got {:?}", err);
    };
    assert!(err.is_retriable());
    assert_eq!(dedup_key, attempt.dedup_key);

    // Let the detached call land, then retry with the same inputs.
    thread::sleep(Duration::from_millis(600));
    backend.set_submit_delay(Duration::ZERO);
    let tx = c.submit(&fp, &v, &who).expect("retry");
    assert_eq!(backend.submit_count(), 1, "retry must not write twice");
    assert_eq!(backend.inner.get_finality(&tx), Ok(VerificationState::Pending));
}

#[test]
fn lost_write_is_resubmitted() {
    let backend = FlakyBackend::new();
    backend.set_mode(Mode::Forgetful);
    let clock = Arc::new(ManualClock::new(0));
    let c = client(&backend, &clock, Duration::from_secs(2));
    let fp = fingerprint(b"lost");
    let v = text_verdict("safe", 0.1);
    let who = submitter(1);

    let first = c.submit(&fp, &v, &who).expect("submit");
    backend.set_mode(Mode::Normal);
    let second = c.submit(&fp, &v, &who).expect("resubmit");
    assert_eq!(backend.submit_count(), 2);
    // Same record bytes, so the backend issues the same reference.
    assert_eq!(first, second);
    assert_eq!(backend.inner.get_finality(&second), Ok(VerificationState::Pending));
}

#[test]
fn resubmission_shares_one_timeout_budget() {
    let backend = FlakyBackend::new();
    backend.set_mode(Mode::Forgetful);
    let clock = Arc::new(ManualClock::new(0));
    let timeout = Duration::from_millis(300);
    let c = client(&backend, &clock, timeout);
    let fp = fingerprint(b"budget");
    let v = text_verdict("safe", 0.1);
    let who = submitter(1);
    c.submit(&fp, &v, &who).expect("first write");

    // Finality check and the rewrite each fit the timeout alone, not together.
    backend.set_read_delay(Duration::from_millis(250));
    backend.set_submit_delay(Duration::from_millis(250));
    let started = Instant::now();
    let res = c.submit(&fp, &v, &who);
    let elapsed = started.elapsed();

    assert!(elapsed <= timeout + Duration::from_millis(100), "took {:?}", elapsed);
    assert!(matches!(res, Err(LedgerError::Timeout { .. })), "got {:?}", res);
}

#[test]
fn concurrent_duplicates_write_once() {
    let backend = FlakyBackend::new();
    backend.set_submit_delay(Duration::from_millis(100));
    let clock = Arc::new(ManualClock::new(0));
    let c = Arc::new(client(&backend, &clock, Duration::from_secs(5)));
    let fp = fingerprint(b"race");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let c = Arc::clone(&c);
            thread::spawn(move || c.submit(&fp, &text_verdict("safe", 0.1), &submitter(1)))
        })
        .collect();
    let refs: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("join").expect("submit"))
        .collect();
    assert!(refs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(backend.submit_count(), 1);
}

#[test]
fn backend_failures_are_classified() {
    let backend = FlakyBackend::new();
    let clock = Arc::new(ManualClock::new(0));
    let c = client(&backend, &clock, Duration::from_secs(2));
    let fp = fingerprint(b"bad");

    let err = c
        .submit(&fp, &text_verdict("spam", 0.5), &submitter(1))
        .expect_err("unknown category rejected");
    assert!(matches!(err, LedgerError::Rejected(_)));
    assert!(!err.is_retriable());

    backend.set_mode(Mode::Unreachable);
    let err = c
        .submit(&fp, &text_verdict("safe", 0.5), &submitter(1))
        .expect_err("outage");
    assert!(matches!(err, LedgerError::Unavailable(_)));

    // A failed attempt leaves no claim behind.
    backend.set_mode(Mode::Normal);
    c.submit(&fp, &text_verdict("safe", 0.5), &submitter(1)).expect("recovered");
}
