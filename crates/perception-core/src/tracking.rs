#![forbid(unsafe_code)]

//! One-shot tracking sessions.
//!
//! A [`TrackingSession`] turns an [`AccessList`] into subscriptions: one
//! per requested [`SubscriptionKind`] on every registrar the list touched.
//! The first relevant change tears the whole session down and hands the
//! caller a [`ChangeEvent`] naming the key that changed.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──install──▶ Installed ──first change──▶ Fired
//!    │                     │
//!    └──────cancel─────────┴──────────────────────▶ Cancelled
//! ```
//!
//! `Fired` and `Cancelled` are terminal: no callback can run afterwards.
//!
//! # Invariants
//!
//! 1. At most one subscription per (registrar, kind) pair.
//! 2. Each caller callback is an `FnOnce` taken out of the session under its
//!    lock, so it runs at most once even when several tracked keys change
//!    concurrently or a callback mutates a tracked key again.
//! 3. Teardown happens before the caller's callback runs.
//! 4. `cancel` is idempotent, and a no-op on a fired session.
//!
//! # Dual-phase sessions
//!
//! With both callbacks, the will-change callback fires on the first
//! will-change notification (and the will-change subscriptions go away), the
//! did-change callback on the first did-change notification, which then ends
//! the session.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;

use crate::access_list::AccessList;
use crate::key::PropertyKey;
use crate::logging::debug;
use crate::registrar::{RegistrarId, RegistrarInner, SubscriptionKind, SubscriptionToken};

// ─── Metrics counters ────────────────────────────────────────────────────────

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static SESSIONS_INSTALLED_TOTAL: AtomicU64 = AtomicU64::new(0);
static SESSIONS_FIRED_TOTAL: AtomicU64 = AtomicU64::new(0);
static SESSIONS_CANCELLED_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Total number of sessions installed with at least one subscription.
#[must_use]
pub fn sessions_installed_total() -> u64 {
    SESSIONS_INSTALLED_TOTAL.load(Ordering::Relaxed)
}

/// Total number of sessions ended by a change.
#[must_use]
pub fn sessions_fired_total() -> u64 {
    SESSIONS_FIRED_TOTAL.load(Ordering::Relaxed)
}

/// Total number of sessions ended by an explicit cancel.
#[must_use]
pub fn sessions_cancelled_total() -> u64 {
    SESSIONS_CANCELLED_TOTAL.load(Ordering::Relaxed)
}

// ─── Events and callbacks ────────────────────────────────────────────────────

/// Whether a change is about to happen or has just happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangePhase {
    /// Reported before the new value is written.
    WillChange,
    /// Reported after the new value is written.
    DidChange,
}

/// The change that ended (or advanced) a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    registrar: RegistrarId,
    key: PropertyKey,
    phase: ChangePhase,
}

impl ChangeEvent {
    /// Identity of the instance whose property changed.
    #[must_use]
    pub const fn registrar(&self) -> RegistrarId {
        self.registrar
    }

    /// The property that changed.
    #[must_use]
    pub const fn key(&self) -> PropertyKey {
        self.key
    }

    /// Whether this was reported before or after the write.
    #[must_use]
    pub const fn phase(&self) -> ChangePhase {
        self.phase
    }
}

type Callback = Box<dyn FnOnce(ChangeEvent) + Send>;

/// The callbacks a session should deliver. At least one is required.
#[derive(Default)]
pub struct Callbacks {
    will_change: Option<Callback>,
    did_change: Option<Callback>,
}

impl Callbacks {
    /// No callbacks yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver the first will-change notification to `f`.
    #[must_use]
    pub fn will_change(mut self, f: impl FnOnce(ChangeEvent) + Send + 'static) -> Self {
        self.will_change = Some(Box::new(f));
        self
    }

    /// Deliver the first did-change notification to `f`.
    #[must_use]
    pub fn did_change(mut self, f: impl FnOnce(ChangeEvent) + Send + 'static) -> Self {
        self.did_change = Some(Box::new(f));
        self
    }

    /// Whether neither callback is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.will_change.is_none() && self.did_change.is_none()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("will_change", &self.will_change.is_some())
            .field("did_change", &self.did_change.is_some())
            .finish()
    }
}

/// Misuse of the tracking API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackingError {
    /// A session was asked to install with neither callback.
    #[error("tracking session requires a will-change or did-change callback")]
    MissingCallbacks,
    /// `install` was called on a session that is already installed or fired.
    #[error("tracking session is already installed")]
    AlreadyInstalled,
}

// ─── Session state ───────────────────────────────────────────────────────────

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Created from an access list, no subscriptions yet.
    Pending,
    /// Subscriptions registered; waiting for a change.
    Installed,
    /// A tracked property changed; all subscriptions removed.
    Fired,
    /// Cancelled by the caller; all subscriptions removed.
    Cancelled,
}

impl SessionStatus {
    /// Whether no callback can run any more.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fired | Self::Cancelled)
    }
}

/// Tokens held against one registrar.
struct Installation {
    registrar: Weak<RegistrarInner>,
    will_change: Option<SubscriptionToken>,
    did_change: Option<SubscriptionToken>,
}

impl Installation {
    /// Tokens still registered; a dropped registrar took its tokens with it.
    fn token_count(&self) -> usize {
        if self.registrar.strong_count() == 0 {
            return 0;
        }
        usize::from(self.will_change.is_some()) + usize::from(self.did_change.is_some())
    }
}

struct SessionState {
    status: SessionStatus,
    list: Option<AccessList>,
    installed: Vec<Installation>,
    will_change: Option<Callback>,
    did_change: Option<Callback>,
    changed: Option<PropertyKey>,
}

struct SessionInner {
    id: u64,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, event: ChangeEvent) {
        let (callback, teardown, finished) = {
            let mut state = self.lock();
            if state.status != SessionStatus::Installed {
                return;
            }
            let callback = match event.phase {
                ChangePhase::WillChange => state.will_change.take(),
                ChangePhase::DidChange => state.did_change.take(),
            };
            let Some(callback) = callback else {
                return;
            };
            state.changed = Some(event.key);

            let finished = state.will_change.is_none() && state.did_change.is_none();
            let teardown = if finished {
                state.status = SessionStatus::Fired;
                std::mem::take(&mut state.installed)
            } else {
                // Dual-phase session: only the spent phase goes away.
                take_phase(&mut state.installed, event.phase)
            };
            (callback, teardown, finished)
        };

        let _removed = remove_subscriptions(teardown);
        if finished {
            SESSIONS_FIRED_TOTAL.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            session = self.id,
            registrar = event.registrar.raw(),
            key = event.key.name(),
            phase = ?event.phase,
            removed = _removed,
            finished,
            "perception.session.fire"
        );
        callback(event);
    }
}

/// Detach the tokens of one phase, leaving the other in place.
fn take_phase(installed: &mut [Installation], phase: ChangePhase) -> Vec<Installation> {
    installed
        .iter_mut()
        .filter_map(|entry| {
            let (will_change, did_change) = match phase {
                ChangePhase::WillChange => (entry.will_change.take(), None),
                ChangePhase::DidChange => (None, entry.did_change.take()),
            };
            (will_change.is_some() || did_change.is_some()).then(|| Installation {
                registrar: Weak::clone(&entry.registrar),
                will_change,
                did_change,
            })
        })
        .collect()
}

/// Cancel every token; registrars already dropped took their tables with them.
fn remove_subscriptions(installed: Vec<Installation>) -> usize {
    let mut removed = 0;
    for entry in installed {
        let Some(registrar) = entry.registrar.upgrade() else {
            continue;
        };
        for token in [entry.will_change, entry.did_change].into_iter().flatten() {
            if registrar.cancel(token) {
                removed += 1;
            }
        }
    }
    removed
}

// ─── TrackingSession ─────────────────────────────────────────────────────────

/// Handle to a one-shot tracking session.
///
/// Cloning yields another handle to the same session. Dropping a handle does
/// **not** cancel the session: installed subscriptions keep it alive until a
/// change fires it or [`cancel`](Self::cancel) is called.
#[derive(Clone)]
pub struct TrackingSession {
    inner: Arc<SessionInner>,
}

impl TrackingSession {
    /// Create a pending session over `list`.
    #[must_use]
    pub fn new(list: AccessList) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(SessionState {
                    status: SessionStatus::Pending,
                    list: Some(list),
                    installed: Vec::new(),
                    will_change: None,
                    did_change: None,
                    changed: None,
                }),
            }),
        }
    }

    /// Register subscriptions for every (instance, key set) in the list.
    ///
    /// Fails with [`TrackingError::MissingCallbacks`] if `callbacks` is empty
    /// and [`TrackingError::AlreadyInstalled`] if called twice. Installing a
    /// session that was cancelled while pending is a no-op.
    pub fn install(&self, callbacks: Callbacks) -> Result<(), TrackingError> {
        if callbacks.is_empty() {
            return Err(TrackingError::MissingCallbacks);
        }
        self.arm(callbacks)
    }

    pub(crate) fn arm(&self, callbacks: Callbacks) -> Result<(), TrackingError> {
        let mut state = self.inner.lock();
        match state.status {
            SessionStatus::Pending => {}
            SessionStatus::Cancelled => return Ok(()),
            SessionStatus::Installed | SessionStatus::Fired => {
                return Err(TrackingError::AlreadyInstalled);
            }
        }
        let list = state.list.take().unwrap_or_default();
        let want_will = callbacks.will_change.is_some();
        let want_did = callbacks.did_change.is_some();
        state.will_change = callbacks.will_change;
        state.did_change = callbacks.did_change;
        state.status = SessionStatus::Installed;

        // The session lock is held while registering: a change racing in on
        // another thread waits here and then sees every token.
        for (id, entry) in list.into_entries() {
            let Some(registrar) = entry.registrar.upgrade() else {
                continue;
            };
            let will_change = want_will.then(|| {
                registrar.register(
                    entry.keys.iter().copied(),
                    SubscriptionKind::WillChange,
                    self.perceiver(id, ChangePhase::WillChange),
                )
            });
            let did_change = want_did.then(|| {
                registrar.register(
                    entry.keys.iter().copied(),
                    SubscriptionKind::DidChange,
                    self.perceiver(id, ChangePhase::DidChange),
                )
            });
            state.installed.push(Installation {
                registrar: entry.registrar,
                will_change,
                did_change,
            });
        }

        let subscriptions: usize = state.installed.iter().map(Installation::token_count).sum();
        if subscriptions > 0 {
            SESSIONS_INSTALLED_TOTAL.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            session = self.inner.id,
            registrars = state.installed.len(),
            subscriptions,
            "perception.session.install"
        );
        Ok(())
    }

    fn perceiver(
        &self,
        registrar: RegistrarId,
        phase: ChangePhase,
    ) -> Arc<dyn Fn(PropertyKey) + Send + Sync> {
        let session = Arc::clone(&self.inner);
        Arc::new(move |key| {
            session.fire(ChangeEvent {
                registrar,
                key,
                phase,
            });
        })
    }

    /// Remove every subscription; no callback will run afterwards.
    ///
    /// Idempotent, and a no-op once the session has fired.
    pub fn cancel(&self) {
        let (teardown, _will_change, _did_change) = {
            let mut state = self.inner.lock();
            if state.status.is_terminal() {
                return;
            }
            state.status = SessionStatus::Cancelled;
            state.list = None;
            (
                std::mem::take(&mut state.installed),
                state.will_change.take(),
                state.did_change.take(),
            )
        };
        let _removed = remove_subscriptions(teardown);
        SESSIONS_CANCELLED_TOTAL.fetch_add(1, Ordering::Relaxed);
        debug!(
            session = self.inner.id,
            removed = _removed,
            "perception.session.cancel"
        );
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status
    }

    /// Whether the session was cancelled by the caller.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == SessionStatus::Cancelled
    }

    /// The key whose change fired the session, if any.
    #[must_use]
    pub fn changed(&self) -> Option<PropertyKey> {
        self.inner.lock().changed
    }

    /// Number of subscriptions currently registered on behalf of this session.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner
            .lock()
            .installed
            .iter()
            .map(Installation::token_count)
            .sum()
    }

    /// Unique identifier (for logging).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TrackingSession")
            .field("id", &self.inner.id)
            .field("status", &state.status)
            .field("changed", &state.changed)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
