#![forbid(unsafe_code)]

//! Per-instance registrar: access recording and change notification.
//!
//! Every observable instance owns one [`Registrar`]. Property getters call
//! [`Registrar::access`]; property setters wrap their write in
//! [`Registrar::with_mutation`]. The registrar owns the subscription table
//! that tracking sessions install into.
//!
//! # Design
//!
//! The table lives behind an `Arc<Mutex<..>>` so that registration and
//! cancellation may happen from any thread. Access lists and sessions hold
//! only `Weak` handles: dropping the owning instance drops every subscription
//! registered against it.
//!
//! Notification snapshots the matching callbacks under the lock, releases it,
//! and only then invokes them. Callbacks may therefore cancel or register
//! subscriptions (including their own) without deadlocking.
//!
//! # Invariants
//!
//! 1. Subscription ids are allocated monotonically, so each per-key lookup
//!    list is sorted in registration order and callbacks fire in that order.
//! 2. A key's lookup entry exists iff at least one live subscription covers it.
//! 3. `cancel` of an unknown or already-cancelled token is a no-op.
//!
//! # Failure Modes
//!
//! - **Callback panics**: the lock is never held while callbacks run, so a
//!   panicking callback cannot poison the table. A poisoned lock (a panic in
//!   the bookkeeping itself) is recovered with `PoisonError::into_inner`.
//! - **Mutation body panics**: `did_change` still runs from a drop guard
//!   while unwinding.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::key::PropertyKey;
use crate::logging::{trace, warn};
use crate::recorder;

// ─── Registrar ID generation ─────────────────────────────────────────────────

static NEXT_REGISTRAR_ID: AtomicU64 = AtomicU64::new(1);

fn next_registrar_id() -> RegistrarId {
    RegistrarId(NEXT_REGISTRAR_ID.fetch_add(1, Ordering::Relaxed))
}

/// Identity of one registrar, and therefore of the instance that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrarId(u64);

impl RegistrarId {
    /// Raw numeric value (for logging).
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registrar#{}", self.0)
    }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// When a subscription is notified relative to the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    /// Immediately before the new value is written.
    WillChange,
    /// Immediately after the new value is written.
    DidChange,
}

/// Cancellation handle returned by [`Registrar::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    registrar: RegistrarId,
    id: u64,
}

impl SubscriptionToken {
    /// The registrar this token was issued by.
    #[must_use]
    pub const fn registrar(self) -> RegistrarId {
        self.registrar
    }
}

pub(crate) type Perceiver = Arc<dyn Fn(PropertyKey) + Send + Sync>;

struct Subscription {
    kind: SubscriptionKind,
    keys: Vec<PropertyKey>,
    perceiver: Perceiver,
}

/// Callbacks snapshotted for one notification. Most keys have one or two
/// subscribers, so this rarely spills to the heap.
type Snapshot = SmallVec<[Perceiver; 4]>;

#[derive(Default)]
struct RegistrarState {
    next_id: u64,
    subscriptions: AHashMap<u64, Subscription>,
    lookups: AHashMap<PropertyKey, Vec<u64>>,
}

impl RegistrarState {
    fn register(
        &mut self,
        keys: impl IntoIterator<Item = PropertyKey>,
        kind: SubscriptionKind,
        perceiver: Perceiver,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let mut unique: Vec<PropertyKey> = keys.into_iter().collect();
        unique.sort_unstable();
        unique.dedup();

        for key in &unique {
            self.lookups.entry(*key).or_default().push(id);
        }
        self.subscriptions.insert(
            id,
            Subscription {
                kind,
                keys: unique,
                perceiver,
            },
        );
        id
    }

    fn cancel(&mut self, id: u64) -> bool {
        let Some(subscription) = self.subscriptions.remove(&id) else {
            return false;
        };
        for key in &subscription.keys {
            if let Some(ids) = self.lookups.get_mut(key) {
                if let Ok(pos) = ids.binary_search(&id) {
                    ids.remove(pos);
                }
                if ids.is_empty() {
                    self.lookups.remove(key);
                }
            }
        }
        true
    }

    fn cancel_all(&mut self) -> usize {
        let count = self.subscriptions.len();
        self.subscriptions.clear();
        self.lookups.clear();
        count
    }

    fn snapshot(&self, key: PropertyKey, kind: SubscriptionKind) -> Snapshot {
        let Some(ids) = self.lookups.get(&key) else {
            return Snapshot::new();
        };
        ids.iter()
            .filter_map(|id| self.subscriptions.get(id))
            .filter(|subscription| subscription.kind == kind)
            .map(|subscription| Arc::clone(&subscription.perceiver))
            .collect()
    }
}

// ─── Shared interior ─────────────────────────────────────────────────────────

pub(crate) struct RegistrarInner {
    id: RegistrarId,
    state: Mutex<RegistrarState>,
}

impl RegistrarInner {
    fn new() -> Self {
        Self {
            id: next_registrar_id(),
            state: Mutex::new(RegistrarState::default()),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> RegistrarId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, RegistrarState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(registrar = self.id.0, "registrar lock poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    pub(crate) fn register(
        &self,
        keys: impl IntoIterator<Item = PropertyKey>,
        kind: SubscriptionKind,
        perceiver: Perceiver,
    ) -> SubscriptionToken {
        let id = self.lock().register(keys, kind, perceiver);
        SubscriptionToken {
            registrar: self.id,
            id,
        }
    }

    pub(crate) fn cancel(&self, token: SubscriptionToken) -> bool {
        if token.registrar != self.id {
            return false;
        }
        self.lock().cancel(token.id)
    }

    fn notify(&self, key: PropertyKey, kind: SubscriptionKind) {
        let perceivers = self.lock().snapshot(key, kind);
        if perceivers.is_empty() {
            return;
        }
        trace!(
            registrar = self.id.0,
            key = key.name(),
            kind = ?kind,
            perceivers = perceivers.len(),
            "perception.notify"
        );
        for perceiver in perceivers {
            perceiver(key);
        }
    }
}

// ─── Registrar ───────────────────────────────────────────────────────────────

/// Access/mutation mediator for one observable instance.
///
/// A registrar is transient bookkeeping, not part of its owner's value:
///
/// - `Clone` produces a **fresh** registrar (new identity, no subscriptions),
///   so a cloned model is observed independently of the original.
/// - `PartialEq` always returns `true` and `Hash` writes nothing, so deriving
///   those traits on the owner ignores the registrar.
/// - With the `serde` feature it serializes as `()` and deserializes as a
///   fresh registrar.
///
/// ```
/// use perception_core::{PropertyKey, Registrar, track};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// const COUNT: PropertyKey = PropertyKey::new("count");
///
/// let registrar = Registrar::new();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
///
/// track(|| registrar.access(COUNT), move || flag.store(true, Ordering::SeqCst));
/// registrar.with_mutation(COUNT, || {});
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct Registrar {
    inner: Arc<RegistrarInner>,
}

impl Registrar {
    /// Create a registrar with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistrarInner::new()),
        }
    }

    /// Identity of this registrar (and of its owning instance).
    #[inline]
    #[must_use]
    pub fn id(&self) -> RegistrarId {
        self.inner.id
    }

    /// Record that `key` was read.
    ///
    /// No-op unless a tracked computation is active on this thread.
    #[inline]
    pub fn access(&self, key: PropertyKey) {
        recorder::record_access(&self.inner, key);
    }

    /// Notify will-change subscribers of `key`, in registration order.
    pub fn will_change(&self, key: PropertyKey) {
        self.inner.notify(key, SubscriptionKind::WillChange);
    }

    /// Notify did-change subscribers of `key`, in registration order.
    pub fn did_change(&self, key: PropertyKey) {
        self.inner.notify(key, SubscriptionKind::DidChange);
    }

    /// Run `body` bracketed by [`will_change`](Self::will_change) and
    /// [`did_change`](Self::did_change).
    ///
    /// `did_change` runs however `body` exits: normal return, an `Err` value
    /// (returned unchanged to the caller), or a panic (which then resumes).
    /// Notification is unconditional; see [`set_if_changed`](Self::set_if_changed)
    /// for the equality-gated variant.
    pub fn with_mutation<T>(&self, key: PropertyKey, body: impl FnOnce() -> T) -> T {
        self.will_change(key);
        let _did_change = DidChangeGuard {
            registrar: self,
            key,
        };
        body()
    }

    /// Mutate `slot` in place, bracketed by change notifications.
    pub fn modify<T, R>(&self, key: PropertyKey, slot: &mut T, f: impl FnOnce(&mut T) -> R) -> R {
        self.with_mutation(key, || f(slot))
    }

    /// Write `value` into `slot`, notifying only if it differs from the
    /// current value. Returns whether a write (and notification) happened.
    pub fn set_if_changed<T: PartialEq>(&self, key: PropertyKey, slot: &mut T, value: T) -> bool {
        if *slot == value {
            return false;
        }
        self.with_mutation(key, || *slot = value);
        true
    }

    /// Register `callback` for changes to any of `keys`.
    ///
    /// Duplicate keys are collapsed. The callback receives the key that is
    /// changing and is invoked synchronously on the mutating thread.
    pub fn register(
        &self,
        keys: impl IntoIterator<Item = PropertyKey>,
        kind: SubscriptionKind,
        callback: impl Fn(PropertyKey) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.inner.register(keys, kind, Arc::new(callback))
    }

    /// Remove a subscription. Returns `false` if it was already gone or the
    /// token belongs to another registrar.
    pub fn cancel(&self, token: SubscriptionToken) -> bool {
        self.inner.cancel(token)
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn cancel_all(&self) -> usize {
        self.inner.lock().cancel_all()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    /// Whether any live subscription covers `key`.
    #[must_use]
    pub fn is_observed(&self, key: PropertyKey) -> bool {
        self.inner.lock().lookups.contains_key(&key)
    }
}

struct DidChangeGuard<'a> {
    registrar: &'a Registrar,
    key: PropertyKey,
}

impl Drop for DidChangeGuard<'_> {
    fn drop(&mut self) {
        self.registrar.did_change(self.key);
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Registrar {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registrar")
            .field("id", &self.inner.id)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl PartialEq for Registrar {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for Registrar {}

impl Hash for Registrar {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

#[cfg(feature = "serde")]
impl serde::Serialize for Registrar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Registrar {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(Self::new())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const COUNT: PropertyKey = PropertyKey::new("count");
    const NAME: PropertyKey = PropertyKey::new("name");

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn push(
        log: &Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    ) -> impl Fn(PropertyKey) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |key| log.lock().unwrap().push(format!("{tag}:{key}"))
    }

    #[test]
    fn ids_are_unique() {
        let a = Registrar::new();
        let b = Registrar::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn will_and_did_change_route_by_kind() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([COUNT], SubscriptionKind::WillChange, push(&events, "will"));
        registrar.register([COUNT], SubscriptionKind::DidChange, push(&events, "did"));

        registrar.with_mutation(COUNT, || {});

        assert_eq!(*events.lock().unwrap(), vec!["will:count", "did:count"]);
    }

    #[test]
    fn only_matching_keys_are_notified() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([COUNT], SubscriptionKind::WillChange, push(&events, "count"));

        registrar.will_change(NAME);
        assert!(events.lock().unwrap().is_empty());

        registrar.will_change(COUNT);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([COUNT], SubscriptionKind::DidChange, push(&events, "first"));
        registrar.register([COUNT, NAME], SubscriptionKind::DidChange, push(&events, "second"));
        registrar.register([COUNT], SubscriptionKind::DidChange, push(&events, "third"));

        registrar.did_change(COUNT);

        assert_eq!(
            *events.lock().unwrap(),
            vec!["first:count", "second:count", "third:count"]
        );
    }

    #[test]
    fn cancel_is_idempotent() {
        let registrar = Registrar::new();
        let events = log();
        let token = registrar.register([COUNT], SubscriptionKind::WillChange, push(&events, "x"));

        assert!(registrar.cancel(token));
        assert!(!registrar.cancel(token));
        registrar.will_change(COUNT);

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(registrar.subscription_count(), 0);
        assert!(!registrar.is_observed(COUNT));
    }

    #[test]
    fn cancel_ignores_foreign_tokens() {
        let a = Registrar::new();
        let b = Registrar::new();
        let token = a.register([COUNT], SubscriptionKind::WillChange, |_| {});
        assert!(!b.cancel(token));
        assert_eq!(a.subscription_count(), 1);
        assert_eq!(token.registrar(), a.id());
    }

    #[test]
    fn duplicate_keys_collapse() {
        let registrar = Registrar::new();
        let events = log();
        let token = registrar.register(
            [COUNT, COUNT, NAME],
            SubscriptionKind::DidChange,
            push(&events, "x"),
        );
        registrar.did_change(COUNT);
        assert_eq!(events.lock().unwrap().len(), 1);

        registrar.cancel(token);
        assert!(!registrar.is_observed(COUNT));
        assert!(!registrar.is_observed(NAME));
    }

    #[test]
    fn callback_may_cancel_sibling_during_notification() {
        let registrar = Arc::new(Registrar::new());
        let events = log();

        let sibling = Arc::new(Mutex::new(None::<SubscriptionToken>));
        let sibling_for_first = Arc::clone(&sibling);
        let registrar_for_first = Arc::clone(&registrar);
        registrar.register([COUNT], SubscriptionKind::WillChange, move |_| {
            if let Some(token) = sibling_for_first.lock().unwrap().take() {
                registrar_for_first.cancel(token);
            }
        });
        let token = registrar.register([COUNT], SubscriptionKind::WillChange, push(&events, "second"));
        *sibling.lock().unwrap() = Some(token);

        // The snapshot was taken before the first callback ran.
        registrar.will_change(COUNT);
        assert_eq!(events.lock().unwrap().len(), 1);

        // Cancelled for the next round.
        registrar.will_change(COUNT);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn with_mutation_returns_body_value_and_errors() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([COUNT], SubscriptionKind::DidChange, push(&events, "did"));

        let ok: Result<i32, &str> = registrar.with_mutation(COUNT, || Ok(7));
        assert_eq!(ok, Ok(7));

        let err: Result<i32, &str> = registrar.with_mutation(COUNT, || Err("boom"));
        assert_eq!(err, Err("boom"));

        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn with_mutation_runs_did_change_on_panic() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([COUNT], SubscriptionKind::DidChange, push(&events, "did"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registrar.with_mutation(COUNT, || -> () { panic!("mutation failed") })
        }));

        assert!(result.is_err());
        assert_eq!(*events.lock().unwrap(), vec!["did:count"]);
    }

    #[test]
    fn set_if_changed_skips_equal_values() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([COUNT], SubscriptionKind::WillChange, push(&events, "will"));

        let mut count = 0;
        assert!(!registrar.set_if_changed(COUNT, &mut count, 0));
        assert!(events.lock().unwrap().is_empty());

        assert!(registrar.set_if_changed(COUNT, &mut count, 3));
        assert_eq!(count, 3);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn modify_mutates_in_place() {
        let registrar = Registrar::new();
        let events = log();
        registrar.register([NAME], SubscriptionKind::DidChange, push(&events, "did"));

        let mut name = String::from("a");
        let len = registrar.modify(NAME, &mut name, |name| {
            name.push('b');
            name.len()
        });

        assert_eq!(len, 2);
        assert_eq!(name, "ab");
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn cancel_all_clears_table() {
        let registrar = Registrar::new();
        registrar.register([COUNT], SubscriptionKind::WillChange, |_| {});
        registrar.register([NAME], SubscriptionKind::DidChange, |_| {});
        assert_eq!(registrar.cancel_all(), 2);
        assert_eq!(registrar.subscription_count(), 0);
        assert!(!registrar.is_observed(COUNT));
    }

    #[test]
    fn clone_is_fresh_and_equality_is_transparent() {
        let registrar = Registrar::new();
        registrar.register([COUNT], SubscriptionKind::WillChange, |_| {});

        let copy = registrar.clone();
        assert_ne!(copy.id(), registrar.id());
        assert_eq!(copy.subscription_count(), 0);
        assert_eq!(copy, registrar);
    }

    #[test]
    fn debug_format() {
        let registrar = Registrar::new();
        let dbg = format!("{registrar:?}");
        assert!(dbg.contains("Registrar"));
        assert!(dbg.contains("subscriptions: 0"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_treats_registrar_as_transient() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Model {
            count: i32,
            registrar: Registrar,
        }

        let model = Model {
            count: 3,
            registrar: Registrar::new(),
        };
        model.registrar.register([COUNT], SubscriptionKind::WillChange, |_| {});

        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, r#"{"count":3,"registrar":null}"#);

        let back: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(back.count, 3);
        assert_eq!(back.registrar.subscription_count(), 0);
        assert_ne!(back.registrar.id(), model.registrar.id());
    }
}
