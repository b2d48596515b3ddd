#![no_main]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use perception_core::{Callbacks, PropertyKey, Registrar, SessionStatus, TrackingSession, track_session};

const INSTANCES: usize = 3;
const KEYS: [PropertyKey; 3] = [
    PropertyKey::new("a"),
    PropertyKey::new("b"),
    PropertyKey::new("c"),
];
const MAX_SESSIONS: usize = 16;

#[derive(Arbitrary, Debug, Clone, Copy)]
struct Slot {
    instance: u8,
    key: u8,
}

impl Slot {
    fn resolve(self) -> (usize, usize) {
        (
            usize::from(self.instance) % INSTANCES,
            usize::from(self.key) % KEYS.len(),
        )
    }
}

#[derive(Arbitrary, Debug)]
enum Op {
    Track {
        reads: Vec<Slot>,
        will_change: bool,
        did_change: bool,
    },
    Mutate(Slot),
    WillChange(Slot),
    DidChange(Slot),
    Cancel(u8),
}

struct Shadow {
    reads: BTreeSet<(usize, usize)>,
    wants_will: bool,
    wants_did: bool,
    will_fired: bool,
    did_fired: bool,
    cancelled: bool,
}

impl Shadow {
    fn finished(&self) -> bool {
        (!self.wants_will || self.will_fired) && (!self.wants_did || self.did_fired)
    }

    fn live(&self) -> bool {
        !self.cancelled && !self.finished()
    }

    fn will_pending(&self) -> bool {
        self.live() && self.wants_will && !self.will_fired
    }

    fn did_pending(&self) -> bool {
        self.live() && self.wants_did && !self.did_fired
    }
}

struct Tracked {
    session: TrackingSession,
    will_calls: Arc<AtomicU32>,
    did_calls: Arc<AtomicU32>,
    shadow: Shadow,
}

fn will_phase(tracked: &mut [Tracked], hit: (usize, usize)) {
    for t in tracked {
        if t.shadow.will_pending() && t.shadow.reads.contains(&hit) {
            t.shadow.will_fired = true;
        }
    }
}

fn did_phase(tracked: &mut [Tracked], hit: (usize, usize)) {
    for t in tracked {
        if t.shadow.did_pending() && t.shadow.reads.contains(&hit) {
            t.shadow.did_fired = true;
        }
    }
}

fn check(registrars: &[Registrar], tracked: &[Tracked]) {
    for t in tracked {
        assert_eq!(
            t.will_calls.load(Ordering::SeqCst),
            u32::from(t.shadow.will_fired)
        );
        assert_eq!(
            t.did_calls.load(Ordering::SeqCst),
            u32::from(t.shadow.did_fired)
        );
        let expected = if t.shadow.cancelled {
            SessionStatus::Cancelled
        } else if t.shadow.finished() {
            SessionStatus::Fired
        } else {
            SessionStatus::Installed
        };
        assert_eq!(t.session.status(), expected);
    }

    for (index, registrar) in registrars.iter().enumerate() {
        let expected: usize = tracked
            .iter()
            .filter(|t| t.shadow.reads.iter().any(|&(i, _)| i == index))
            .map(|t| usize::from(t.shadow.will_pending()) + usize::from(t.shadow.did_pending()))
            .sum();
        assert_eq!(registrar.subscription_count(), expected);
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let registrars: Vec<Registrar> = (0..INSTANCES).map(|_| Registrar::new()).collect();
    let mut tracked: Vec<Tracked> = Vec::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Track {
                reads,
                will_change,
                did_change,
            } => {
                if tracked.len() >= MAX_SESSIONS {
                    continue;
                }
                let will_calls = Arc::new(AtomicU32::new(0));
                let did_calls = Arc::new(AtomicU32::new(0));
                let mut callbacks = Callbacks::new();
                if will_change {
                    let calls = Arc::clone(&will_calls);
                    callbacks = callbacks.will_change(move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                }
                if did_change {
                    let calls = Arc::clone(&did_calls);
                    callbacks = callbacks.did_change(move |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                    });
                }

                let slots: Vec<(usize, usize)> =
                    reads.iter().take(32).map(|slot| slot.resolve()).collect();
                let result = track_session(
                    || {
                        for &(instance, key) in &slots {
                            registrars[instance].access(KEYS[key]);
                        }
                    },
                    callbacks,
                );
                let Ok(((), session)) = result else {
                    assert!(!will_change && !did_change);
                    continue;
                };
                tracked.push(Tracked {
                    session,
                    will_calls,
                    did_calls,
                    shadow: Shadow {
                        reads: slots.into_iter().collect(),
                        wants_will: will_change,
                        wants_did: did_change,
                        will_fired: false,
                        did_fired: false,
                        cancelled: false,
                    },
                });
            }
            Op::Mutate(slot) => {
                let (instance, key) = slot.resolve();
                registrars[instance].with_mutation(KEYS[key], || {});
                will_phase(&mut tracked, (instance, key));
                did_phase(&mut tracked, (instance, key));
            }
            Op::WillChange(slot) => {
                let (instance, key) = slot.resolve();
                registrars[instance].will_change(KEYS[key]);
                will_phase(&mut tracked, (instance, key));
            }
            Op::DidChange(slot) => {
                let (instance, key) = slot.resolve();
                registrars[instance].did_change(KEYS[key]);
                did_phase(&mut tracked, (instance, key));
            }
            Op::Cancel(index) => {
                if tracked.is_empty() {
                    continue;
                }
                let t = &mut tracked[usize::from(index) % tracked.len()];
                t.session.cancel();
                if t.shadow.live() {
                    t.shadow.cancelled = true;
                }
            }
        }
        check(&registrars, &tracked);
    }
});
