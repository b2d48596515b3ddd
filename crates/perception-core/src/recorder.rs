#![forbid(unsafe_code)]

//! Thread-local access recorder.
//!
//! Each OS thread has one slot holding the [`AccessList`] currently being
//! built, if any. [`Registrar::access`](crate::Registrar::access) writes into
//! that slot; [`record`] installs a fresh list for the duration of a closure.
//!
//! # Nesting
//!
//! `record` is reentrant. An inner call saves the outer list, installs a
//! fresh one, runs, and on the way out merges its own list into the outer
//! one before restoring it. The enclosing computation therefore sees every
//! access made by nested computations, while the inner caller still receives
//! only its own.
//!
//! # Limitations
//!
//! The slot is per OS thread. If a tracked computation continues on another
//! thread (for example after an async suspension), accesses made after the
//! hop are not recorded. This under-tracks silently; keep a tracked read pass
//! on a single thread.

use std::cell::RefCell;
use std::sync::Arc;

use crate::access_list::AccessList;
use crate::key::PropertyKey;
use crate::registrar::RegistrarInner;

thread_local! {
    static CURRENT: RefCell<Option<AccessList>> = const { RefCell::new(None) };
}

/// Whether a tracked computation is active on this thread.
#[must_use]
pub fn is_recording() -> bool {
    CURRENT
        .try_with(|slot| slot.borrow().is_some())
        .unwrap_or(false)
}

/// Run `f` with a fresh access list installed, returning its value and the
/// list of properties it read.
///
/// If `f` panics the previous slot is still restored (and the partial list
/// merged into it) before the panic propagates.
pub fn record<T>(f: impl FnOnce() -> T) -> (T, AccessList) {
    let scope = Scope::enter();
    let value = f();
    (value, scope.exit())
}

pub(crate) fn record_access(registrar: &Arc<RegistrarInner>, key: PropertyKey) {
    // `try_with` fails only during thread teardown, where nothing is tracked.
    let _ = CURRENT.try_with(|slot| {
        if let Some(list) = slot.borrow_mut().as_mut() {
            list.add_access(registrar, key);
        }
    });
}

/// Drop guard restoring the enclosing slot.
struct Scope {
    outer: Option<AccessList>,
    active: bool,
}

impl Scope {
    fn enter() -> Self {
        let outer = CURRENT.with(|slot| slot.replace(Some(AccessList::new())));
        Self {
            outer,
            active: true,
        }
    }

    fn exit(mut self) -> AccessList {
        self.restore()
    }

    fn restore(&mut self) -> AccessList {
        self.active = false;
        let outer = self.outer.take();
        CURRENT.with(|slot| {
            let scoped = slot.take().unwrap_or_default();
            let restored = outer.map(|mut outer| {
                if !scoped.is_empty() {
                    outer.merge(scoped.clone());
                }
                outer
            });
            *slot.borrow_mut() = restored;
            scoped
        })
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.active {
            let _ = self.restore();
        }
    }
}
