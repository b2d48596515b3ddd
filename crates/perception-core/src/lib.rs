#![forbid(unsafe_code)]

//! Core: fine-grained property-access tracking.
//!
//! This crate records which properties of which observable instances a
//! computation reads, then notifies the caller exactly once when any of them
//! changes:
//!
//! - [`Registrar`]: per-instance access/mutation mediator owning the
//!   subscription table.
//! - [`recorder`]: per-thread slot holding the [`AccessList`] being built.
//! - [`TrackingSession`]: one-shot subscription bundle over an access list.
//! - [`track`] and friends: read, subscribe, notify once.
//!
//! # Example
//!
//! ```
//! use perception_core::{Perceptible, PropertyKey, Registrar, track};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! #[derive(Default)]
//! struct Model {
//!     count: i64,
//!     name: String,
//!     registrar: Registrar,
//! }
//!
//! impl Model {
//!     const COUNT: PropertyKey = PropertyKey::new("count");
//!     const NAME: PropertyKey = PropertyKey::new("name");
//!
//!     fn count(&self) -> i64 {
//!         self.registrar.access(Self::COUNT);
//!         self.count
//!     }
//!
//!     fn set_count(&mut self, count: i64) {
//!         self.registrar.with_mutation(Self::COUNT, || self.count = count);
//!     }
//!
//!     fn set_name(&mut self, name: &str) {
//!         self.registrar.with_mutation(Self::NAME, || self.name = name.to_owned());
//!     }
//! }
//!
//! let mut model = Model::default();
//! let flag = Arc::new(AtomicBool::new(false));
//! let on_change = Arc::clone(&flag);
//!
//! track(|| model.count(), move || on_change.store(true, Ordering::SeqCst));
//!
//! model.set_name("x");
//! assert!(!flag.load(Ordering::SeqCst));
//! model.set_count(1);
//! assert!(flag.load(Ordering::SeqCst));
//! ```
//!
//! # Threading
//!
//! Registrars and sessions are `Send + Sync`; callbacks run synchronously on
//! the thread performing the mutation. Access recording is per OS thread, so
//! a tracked read pass must not hop threads.

pub mod access_list;
pub mod key;
mod logging;
pub mod perceptible;
pub mod recorder;
pub mod registrar;
pub mod track;
pub mod tracking;

pub use access_list::AccessList;
pub use key::PropertyKey;
pub use perceptible::Perceptible;
pub use registrar::{Registrar, RegistrarId, SubscriptionKind, SubscriptionToken};
pub use track::{track, track_changes, track_did_change, track_session, track_will_change};
pub use tracking::{
    Callbacks, ChangeEvent, ChangePhase, SessionStatus, TrackingError, TrackingSession,
};
