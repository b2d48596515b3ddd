#![forbid(unsafe_code)]

//! Counter demo for perception tracking.
//!
//! A view renders a [`model::CounterModel`] inside a tracking session, the
//! loop mutates the model, and the view re-renders only after a property it
//! actually read has changed.

pub mod app;
pub mod cli;
pub mod error;
pub mod model;

pub use cli::run_from_env;
pub use error::{DemoError, Result};
