#![forbid(unsafe_code)]

//! Read-subscribe-notify-once entry points.
//!
//! Each function runs `read` with a fresh access list installed, then turns
//! whatever `read` touched into a [`TrackingSession`]. Subscriptions are only
//! installed after `read` returns: a property written inside `read` itself
//! never triggers that same session.

use crate::recorder;
use crate::tracking::{Callbacks, ChangeEvent, TrackingError, TrackingSession};

/// Track `read` and call `on_change` once, before the first tracked property
/// changes.
///
/// ```
/// use perception_core::{PropertyKey, Registrar, track};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// const COUNT: PropertyKey = PropertyKey::new("count");
/// const NAME: PropertyKey = PropertyKey::new("name");
///
/// let registrar = Registrar::new();
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
///
/// track(
///     || registrar.access(COUNT),
///     move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     },
/// );
///
/// registrar.with_mutation(NAME, || {});
/// assert_eq!(calls.load(Ordering::SeqCst), 0);
/// registrar.with_mutation(COUNT, || {});
/// registrar.with_mutation(COUNT, || {});
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub fn track<T>(read: impl FnOnce() -> T, on_change: impl FnOnce() + Send + 'static) -> T {
    track_will_change(read, move |_| on_change())
}

/// Track `read`, reporting the first will-change and the first did-change
/// of any tracked property.
///
/// Delivering `will_change` does not end tracking: `did_change` still
/// arrives once the same mutation completes, and only then is the session
/// torn down.
pub fn track_changes<T>(
    read: impl FnOnce() -> T,
    will_change: impl FnOnce(ChangeEvent) + Send + 'static,
    did_change: impl FnOnce(ChangeEvent) + Send + 'static,
) -> T {
    track_armed(
        read,
        Callbacks::new()
            .will_change(will_change)
            .did_change(did_change),
    )
    .0
}

/// Track `read`, reporting the first will-change of any tracked property.
pub fn track_will_change<T>(
    read: impl FnOnce() -> T,
    will_change: impl FnOnce(ChangeEvent) + Send + 'static,
) -> T {
    track_armed(read, Callbacks::new().will_change(will_change)).0
}

/// Track `read`, reporting the first did-change of any tracked property.
pub fn track_did_change<T>(
    read: impl FnOnce() -> T,
    did_change: impl FnOnce(ChangeEvent) + Send + 'static,
) -> T {
    track_armed(read, Callbacks::new().did_change(did_change)).0
}

/// Track `read` and return the session handle alongside its value, for
/// callers that may need to [`cancel`](TrackingSession::cancel) early.
///
/// `callbacks` is validated before `read` runs.
pub fn track_session<T>(
    read: impl FnOnce() -> T,
    callbacks: Callbacks,
) -> Result<(T, TrackingSession), TrackingError> {
    if callbacks.is_empty() {
        return Err(TrackingError::MissingCallbacks);
    }
    Ok(track_armed(read, callbacks))
}

/// `callbacks` must be non-empty.
fn track_armed<T>(read: impl FnOnce() -> T, callbacks: Callbacks) -> (T, TrackingSession) {
    let (value, list) = recorder::record(read);
    let session = TrackingSession::new(list);
    let armed = session.arm(callbacks);
    debug_assert!(armed.is_ok(), "fresh session rejected its callbacks");
    (value, session)
}
