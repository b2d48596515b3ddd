#![forbid(unsafe_code)]

//! Perception public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users. Models
//! embed a [`Registrar`], route their getters through
//! [`Registrar::access`] and their setters through
//! [`Registrar::with_mutation`], and views call [`track`] to learn when the
//! properties they read change.

pub use perception_core::*;

pub mod prelude {
    pub use perception_core::{
        Callbacks, ChangeEvent, ChangePhase, Perceptible, PropertyKey, Registrar, SessionStatus,
        TrackingError, TrackingSession, track, track_changes, track_did_change, track_session,
        track_will_change,
    };
}
