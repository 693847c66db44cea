//! Core value types shared across the runtime.
//!
//! - [`id`]: type-safe identifiers for jobs
//! - [`cancel`]: cancellation kinds and reasons

pub mod cancel;
pub mod id;

pub use cancel::{CancelKind, CancelReason};
pub use id::JobId;
