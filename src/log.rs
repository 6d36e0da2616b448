//! Logging support for the crate.
//!
//! With the `tracing` feature enabled log statements forward to the
//! `tracing` crate's macros. Without it they compile to nothing, while
//! still type checking their arguments.

#[cfg(feature = "tracing")]
pub(crate) use tracing::debug;
#[cfg(feature = "tracing")]
pub(crate) use tracing::warn;

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($args:tt)*) => {{
        if false {
            let _ = format_args!($($args)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug;

// The name `warn` on its own would be ambiguous with the built-in
// attribute of the same name; define the macro under a different one
// and re-export it.
#[cfg(not(feature = "tracing"))]
macro_rules! log_warn {
    ($($args:tt)*) => {{
        if false {
            let _ = format_args!($($args)*);
        }
    }};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use log_warn as warn;
