#![forbid(unsafe_code)]

//! Property-based invariant tests for tracking sessions.
//!
//! These tests verify invariants that must hold for **any** set of reads and
//! any sequence of subsequent writes:
//!
//! 1. The callback fires iff some write hits a (instance, key) pair that was read.
//! 2. It fires at most once, and the session reports the first hit key.
//! 3. After firing, no registrar retains a subscription from the session.
//! 4. The recorded access list equals the naive set of reads.
//! 5. Nested recording yields the union of inner and outer reads.
//! 6. Cancelling any number of times before the writes suppresses the callback.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use perception_core::{
    Callbacks, PropertyKey, Registrar, SessionStatus, recorder, track_session,
};
use proptest::prelude::*;

const KEYS: [PropertyKey; 4] = [
    PropertyKey::new("a"),
    PropertyKey::new("b"),
    PropertyKey::new("c"),
    PropertyKey::new("d"),
];
const INSTANCES: usize = 3;

// ── Strategies ──────────────────────────────────────────────────────────

/// (instance index, key index) pairs.
fn pairs(max: usize) -> impl Strategy<Value = Vec<(usize, usize)>> {
    proptest::collection::vec((0..INSTANCES, 0..KEYS.len()), 0..max)
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn registrars() -> Vec<Registrar> {
    (0..INSTANCES).map(|_| Registrar::new()).collect()
}

fn read_all(registrars: &[Registrar], reads: &[(usize, usize)]) {
    for &(instance, key) in reads {
        registrars[instance].access(KEYS[key]);
    }
}

fn naive(reads: &[(usize, usize)]) -> BTreeSet<(usize, usize)> {
    reads.iter().copied().collect()
}

fn counting_callbacks() -> (Arc<AtomicUsize>, Callbacks) {
    let fired = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&fired);
    let callbacks = Callbacks::new().will_change(move |_| {
        handle.fetch_add(1, Ordering::SeqCst);
    });
    (fired, callbacks)
}

// ═════════════════════════════════════════════════════════════════════════
// 1–3. Fire iff hit, at most once, full teardown
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn fires_once_iff_a_read_pair_is_written(reads in pairs(12), writes in pairs(16)) {
        let registrars = registrars();
        let (fired, callbacks) = counting_callbacks();
        let ((), session) = track_session(|| read_all(&registrars, &reads), callbacks)
            .expect("callbacks present");

        for &(instance, key) in &writes {
            registrars[instance].with_mutation(KEYS[key], || {});
        }

        let read_set = naive(&reads);
        let first_hit = writes.iter().find(|pair| read_set.contains(pair));
        let expected = usize::from(first_hit.is_some());

        prop_assert_eq!(fired.load(Ordering::SeqCst), expected);
        prop_assert_eq!(session.changed(), first_hit.map(|&(_, key)| KEYS[key]));
        if first_hit.is_some() {
            prop_assert_eq!(session.status(), SessionStatus::Fired);
            for registrar in &registrars {
                prop_assert_eq!(registrar.subscription_count(), 0);
            }
        } else {
            prop_assert_eq!(session.status(), SessionStatus::Installed);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Access list matches naive reads
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn access_list_matches_naive_set(reads in pairs(20)) {
        let registrars = registrars();
        let ((), list) = recorder::record(|| read_all(&registrars, &reads));
        let expected = naive(&reads);

        prop_assert_eq!(list.access_count(), expected.len());
        for (instance, registrar) in registrars.iter().enumerate() {
            for (key_index, key) in KEYS.iter().enumerate() {
                prop_assert_eq!(
                    list.contains(registrar.id(), *key),
                    expected.contains(&(instance, key_index))
                );
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Nested recording is a union
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn nested_recording_is_union(outer_reads in pairs(10), inner_reads in pairs(10)) {
        let registrars = registrars();
        let (inner, outer) = recorder::record(|| {
            read_all(&registrars, &outer_reads);
            let ((), inner) = recorder::record(|| read_all(&registrars, &inner_reads));
            inner
        });

        let inner_expected = naive(&inner_reads);
        let union: BTreeSet<_> = naive(&outer_reads).union(&inner_expected).copied().collect();

        prop_assert_eq!(inner.access_count(), inner_expected.len());
        prop_assert_eq!(outer.access_count(), union.len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Cancellation suppresses the callback
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn cancel_suppresses_callback(
        reads in pairs(12),
        writes in pairs(16),
        cancels in 1usize..4,
    ) {
        let registrars = registrars();
        let (fired, callbacks) = counting_callbacks();
        let ((), session) = track_session(|| read_all(&registrars, &reads), callbacks)
            .expect("callbacks present");

        for _ in 0..cancels {
            session.cancel();
        }
        for &(instance, key) in &writes {
            registrars[instance].with_mutation(KEYS[key], || {});
        }

        prop_assert_eq!(fired.load(Ordering::SeqCst), 0);
        prop_assert!(session.is_cancelled());
        for registrar in &registrars {
            prop_assert_eq!(registrar.subscription_count(), 0);
        }
    }
}
