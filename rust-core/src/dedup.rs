// Dedup keys and the short-lived cache that makes re-submission idempotent.
// Bounded by size and by the dedup window; safe to share between submitting threads.

use crate::backend::TransactionRef;
use crate::fingerprint::{Fingerprint, Hash};
use crate::record::{verdict_bytes, PublicKey};
use crate::verdict::Verdict;
use parking_lot::{Condvar, Mutex};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey(Hash);

impl DedupKey {
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DedupKey({})", self.to_hex())
    }
}

impl Serialize for DedupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Time bucket of `now_ms` for a window of `window_ms` (clamped to >= 1).
pub fn time_bucket(now_ms: u64, window_ms: u64) -> u64 {
    now_ms / window_ms.max(1)
}

/// sha256(fingerprint ++ verdict ++ submitter ++ bucket)
pub fn dedup_key(fp: &Fingerprint, verdict: &Verdict, submitter: &PublicKey, bucket: u64) -> DedupKey {
    let mut h = Sha256::new();
    h.update(fp.as_bytes());
    h.update(verdict_bytes(verdict));
    h.update(submitter);
    h.update(bucket.to_le_bytes());
    DedupKey(h.finalize().into())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim {
    /// Caller owns the key and must `complete` or `release` it.
    Acquired,
    /// A reference already exists for this submission.
    Existing(TransactionRef),
    /// Another caller is submitting the same key.
    Busy,
}

#[derive(Clone, Debug)]
enum Slot {
    InFlight { at_ms: u64 },
    Submitted { tx_ref: TransactionRef, at_ms: u64 },
}

impl Slot {
    fn at_ms(&self) -> u64 {
        match self {
            Slot::InFlight { at_ms } | Slot::Submitted { at_ms, .. } => *at_ms,
        }
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<DedupKey, Slot>,
    order: VecDeque<(DedupKey, u64)>,
}

pub struct DedupCache {
    window_ms: u64,
    capacity: usize,
    state: Mutex<CacheState>,
    changed: Condvar,
}

impl DedupCache {
    pub fn new(window_ms: u64, capacity: usize) -> Self {
        Self {
            window_ms: window_ms.max(1),
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `key`, or find the reference a recent identical submission got.
    /// `prev` is the key of the same submission in the previous bucket; it
    /// counts only while its entry is younger than the window.
    pub fn claim(&self, key: DedupKey, prev: Option<DedupKey>, now_ms: u64) -> Claim {
        let mut st = self.state.lock();
        self.claim_locked(&mut st, key, prev, now_ms)
    }

    /// Like [`DedupCache::claim`], but waits out a concurrent submission of the
    /// same key until `deadline`. Returns `Busy` only when the deadline passes.
    pub fn claim_or_wait(
        &self,
        key: DedupKey,
        prev: Option<DedupKey>,
        now_ms: u64,
        deadline: Instant,
    ) -> Claim {
        let mut st = self.state.lock();
        loop {
            match self.claim_locked(&mut st, key, prev, now_ms) {
                Claim::Busy => {
                    if self.changed.wait_until(&mut st, deadline).timed_out() {
                        return self.claim_locked(&mut st, key, prev, now_ms);
                    }
                }
                other => return other,
            }
        }
    }

    fn claim_locked(
        &self,
        st: &mut CacheState,
        key: DedupKey,
        prev: Option<DedupKey>,
        now_ms: u64,
    ) -> Claim {
        self.evict_expired(st, now_ms);

        match st.slots.get(&key) {
            Some(Slot::Submitted { tx_ref, .. }) => return Claim::Existing(tx_ref.clone()),
            Some(Slot::InFlight { .. }) => return Claim::Busy,
            None => {}
        }
        if let Some(prev) = prev {
            match st.slots.get(&prev) {
                Some(Slot::Submitted { tx_ref, at_ms }) if now_ms.saturating_sub(*at_ms) < self.window_ms => {
                    return Claim::Existing(tx_ref.clone())
                }
                Some(Slot::InFlight { at_ms }) if now_ms.saturating_sub(*at_ms) < self.window_ms => {
                    return Claim::Busy
                }
                _ => {}
            }
        }

        st.slots.insert(key, Slot::InFlight { at_ms: now_ms });
        st.order.push_back((key, now_ms));
        self.evict_overflow(st);
        Claim::Acquired
    }

    /// Record the reference issued for a claimed key. Also used by submissions
    /// that finish after their caller stopped waiting.
    pub fn complete(&self, key: DedupKey, tx_ref: TransactionRef, claimed_at_ms: u64) {
        let mut st = self.state.lock();
        if !st.slots.contains_key(&key) {
            st.order.push_back((key, claimed_at_ms));
        }
        st.slots.insert(
            key,
            Slot::Submitted {
                tx_ref,
                at_ms: claimed_at_ms,
            },
        );
        self.evict_overflow(&mut st);
        drop(st);
        self.changed.notify_all();
    }

    /// Give up a claim after a failed submission so another caller may retry.
    pub fn release(&self, key: DedupKey) {
        let mut st = self.state.lock();
        if matches!(st.slots.get(&key), Some(Slot::InFlight { .. })) {
            st.slots.remove(&key);
        }
        drop(st);
        self.changed.notify_all();
    }

    /// Drop a cached reference the backend no longer recognizes.
    pub fn forget(&self, key: DedupKey, tx_ref: &TransactionRef) {
        let mut st = self.state.lock();
        if matches!(st.slots.get(&key), Some(Slot::Submitted { tx_ref: t, .. }) if t == tx_ref) {
            st.slots.remove(&key);
        }
        drop(st);
        self.changed.notify_all();
    }

    fn evict_expired(&self, st: &mut CacheState, now_ms: u64) {
        while let Some(&(key, at_ms)) = st.order.front() {
            if now_ms.saturating_sub(at_ms) < self.window_ms {
                break;
            }
            st.order.pop_front();
            if st.slots.get(&key).map(Slot::at_ms) == Some(at_ms) {
                st.slots.remove(&key);
            }
        }
    }

    fn evict_overflow(&self, st: &mut CacheState) {
        while st.slots.len() > self.capacity {
            let Some((key, at_ms)) = st.order.pop_front() else {
                break;
            };
            if st.slots.get(&key).map(Slot::at_ms) == Some(at_ms) {
                st.slots.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use crate::verdict::ContentKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn verdict(confidence: f64) -> Verdict {
        Verdict {
            content_kind: ContentKind::Text,
            category: "safe".into(),
            confidence,
            is_flagged: false,
            nested_verdict: None,
        }
    }

    fn key(n: u8) -> DedupKey {
        dedup_key(&fingerprint(&[n]), &verdict(0.1), &[1u8; 32], 0)
    }

    #[test]
    fn key_covers_every_component() {
        let fp = fingerprint(b"hello");
        let base = dedup_key(&fp, &verdict(0.1), &[1u8; 32], 5);
        assert_eq!(base, dedup_key(&fp, &verdict(0.1), &[1u8; 32], 5));
        assert_ne!(base, dedup_key(&fingerprint(b"hello!"), &verdict(0.1), &[1u8; 32], 5));
        assert_ne!(base, dedup_key(&fp, &verdict(0.2), &[1u8; 32], 5));
        assert_ne!(base, dedup_key(&fp, &verdict(0.1), &[2u8; 32], 5));
        assert_ne!(base, dedup_key(&fp, &verdict(0.1), &[1u8; 32], 6));
    }

    #[test]
    fn claim_complete_then_existing() {
        let cache = DedupCache::new(1_000, 16);
        assert_eq!(cache.claim(key(1), None, 10), Claim::Acquired);
        assert_eq!(cache.claim(key(1), None, 11), Claim::Busy);
        cache.complete(key(1), TransactionRef::new("tx-1"), 10);
        assert_eq!(cache.claim(key(1), None, 12), Claim::Existing(TransactionRef::new("tx-1")));
    }

    #[test]
    fn release_lets_next_caller_claim() {
        let cache = DedupCache::new(1_000, 16);
        assert_eq!(cache.claim(key(1), None, 0), Claim::Acquired);
        cache.release(key(1));
        assert_eq!(cache.claim(key(1), None, 1), Claim::Acquired);
    }

    #[test]
    fn entries_expire_after_window() {
        let cache = DedupCache::new(100, 16);
        assert_eq!(cache.claim(key(1), None, 0), Claim::Acquired);
        cache.complete(key(1), TransactionRef::new("tx"), 0);
        assert!(matches!(cache.claim(key(1), None, 99), Claim::Existing(_)));
        assert_eq!(cache.claim(key(1), None, 100), Claim::Acquired);
    }

    #[test]
    fn previous_bucket_counts_inside_window_only() {
        let cache = DedupCache::new(100, 16);
        assert_eq!(cache.claim(key(1), None, 90), Claim::Acquired);
        cache.complete(key(1), TransactionRef::new("tx"), 90);
        assert!(matches!(cache.claim(key(2), Some(key(1)), 150), Claim::Existing(_)));
        assert_eq!(cache.claim(key(3), Some(key(1)), 195), Claim::Acquired);
    }

    #[test]
    fn capacity_bound_evicts_oldest() {
        let cache = DedupCache::new(10_000, 2);
        for n in 0..3u8 {
            assert_eq!(cache.claim(key(n), None, n as u64), Claim::Acquired);
            cache.complete(key(n), TransactionRef::new(format!("tx-{}", n)), n as u64);
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.claim(key(0), None, 5), Claim::Acquired);
    }

    #[test]
    fn waiter_sees_completion() {
        let cache = Arc::new(DedupCache::new(10_000, 16));
        assert_eq!(cache.claim(key(1), None, 0), Claim::Acquired);
        let c = Arc::clone(&cache);
        let waiter = thread::spawn(move || {
            c.claim_or_wait(key(1), None, 0, Instant::now() + Duration::from_secs(5))
        });
        thread::sleep(Duration::from_millis(50));
        cache.complete(key(1), TransactionRef::new("tx-1"), 0);
        assert_eq!(
            waiter.join().expect("waiter"),
            Claim::Existing(TransactionRef::new("tx-1"))
        );
    }

    #[test]
    fn waiter_gives_up_at_deadline() {
        let cache = DedupCache::new(10_000, 16);
        assert_eq!(cache.claim(key(1), None, 0), Claim::Acquired);
        let out = cache.claim_or_wait(key(1), None, 0, Instant::now() + Duration::from_millis(30));
        assert_eq!(out, Claim::Busy);
    }
}
