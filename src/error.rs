//! The failure taxonomy.
//!
//! One type covers everything a suspension point or a terminal job can
//! surface:
//!
//! - [`Failure::Cancelled`]: expected during shutdown; does not propagate
//!   to the parent job.
//! - [`Failure::Error`]: a user failure thrown from a coroutine body;
//!   propagates to parent cancellation and surfaces through `await_value`
//!   and `run_scope`.
//! - [`Failure::Usage`]: a misuse of a runtime primitive, such as a second
//!   concurrent sender on a rendezvous channel. Double-resume of a
//!   continuation is not a value of this type; it is a panic.
//!
//! Errors are explicit and typed; the runtime never silently discards a
//! failure that reaches a job's terminal state.

use crate::types::CancelReason;
use core::fmt;
use std::sync::Arc;

/// Result alias used throughout the crate.
pub type Result<T, E = Failure> = std::result::Result<T, E>;

/// A failure delivered through a continuation or recorded on a terminal job.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The operation was cancelled.
    Cancelled(CancelReason),
    /// A user failure thrown from a coroutine body.
    Error(Arc<dyn std::error::Error + Send + Sync>),
    /// A misuse of a runtime primitive.
    Usage(UsageError),
}

impl Failure {
    /// Creates a cancellation failure from a structured reason.
    #[must_use]
    pub const fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled(reason)
    }

    /// Wraps a user error.
    #[must_use]
    pub fn error(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Error(Arc::new(source))
    }

    /// Creates a usage failure.
    #[must_use]
    pub const fn usage(error: UsageError) -> Self {
        Self::Usage(error)
    }

    /// Returns true if this failure represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this failure represents a primitive misuse.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            _ => None,
        }
    }

    /// Returns the usage error, if any.
    #[must_use]
    pub const fn usage_error(&self) -> Option<&UsageError> {
        match self {
            Self::Usage(error) => Some(error),
            _ => None,
        }
    }

    /// Attempts to view the wrapped user error as a concrete type.
    #[must_use]
    pub fn downcast_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Error(source) => source.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(reason) => write!(f, "cancelled: {reason}"),
            Self::Error(source) => write!(f, "{source}"),
            Self::Usage(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Error(source) => Some(&**source as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

/// A misuse of a runtime primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageError {
    /// A second sender arrived while a sender already occupies the channel.
    SenderBusy,
    /// A second receiver arrived while a receiver is already parked.
    ReceiverBusy,
    /// A generator body suspended on an external event instead of yielding.
    GeneratorStalled,
    /// `next_value` was called on an exhausted generator.
    GeneratorExhausted,
    /// The dispatcher refused the submission (it has shut down).
    DispatchRejected,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SenderBusy => write!(f, "a sender already occupies the rendezvous cell"),
            Self::ReceiverBusy => write!(f, "a receiver is already parked on the rendezvous cell"),
            Self::GeneratorStalled => {
                write!(f, "generator body suspended on an external event without yielding")
            }
            Self::GeneratorExhausted => write!(f, "generator is exhausted"),
            Self::DispatchRejected => write!(f, "dispatcher refused the submission"),
        }
    }
}

impl std::error::Error for UsageError {}
