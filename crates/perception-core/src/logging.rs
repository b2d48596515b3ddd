#![forbid(unsafe_code)]

//! Logging shims.
//!
//! With the `tracing` feature enabled the `trace!`, `debug!` and `warn!`
//! macros are re-exported from `tracing`. Without it they expand to nothing,
//! so call sites carry no `cfg` noise and no runtime cost.

#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace, warn};

// The fallbacks carry distinct names: a `macro_rules!` named `warn` cannot
// be re-exported next to the built-in `#[warn]` attribute.
#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use {debug_noop as debug, trace_noop as trace, warn_noop as warn};
