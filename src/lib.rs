//! Strand: a cooperative structured-concurrency runtime.
//!
//! # Overview
//!
//! Strand is built around three tightly coupled primitives:
//!
//! 1. **Suspendable computations** (coroutines) whose execution pauses at
//!    well-defined points and resumes without blocking an OS thread.
//! 2. A **structured job tree** giving every coroutine a parent,
//!    propagating cancellation downward and unhandled failures upward.
//! 3. Synchronous building blocks on top: a **rendezvous channel** that
//!    hands a single value from one producer to one consumer with correct
//!    wakeup of whichever side arrives first, and a **pull-mode generator**
//!    exposing a suspendable block as a lazy sequence.
//!
//! # Core Guarantees
//!
//! - **Structured concurrency**: a job is terminal only once all of its
//!   children are terminal; a scope outlives everything it launched.
//! - **Cancel-correctness**: cancellation is delivered at the next
//!   suspension point and to every already-parked continuation (timers
//!   disarmed, channel cells evicted, waiters failed), and it is sticky
//!   until the body unwinds.
//! - **No silent failure loss**: a failure reaching a job's terminal state
//!   cancels the parent and, if never consumed by an await, re-raises from
//!   the root scope.
//! - **Pluggable dispatch**: the runtime owns no threads; where a resumed
//!   continuation runs is decided by the dispatcher element of the context
//!   captured at suspension.
//!
//! # Module Structure
//!
//! - [`types`]: identifiers and cancellation reasons
//! - [`error`]: the failure taxonomy
//! - [`cx`]: the coroutine context and capability handle
//! - [`runtime`]: continuations, the coroutine engine, jobs, the scope entry
//! - [`dispatch`]: inline / pool / single-thread / manual dispatchers
//! - [`channel`]: the single-slot rendezvous channel
//! - [`generator`]: pull-mode generators
//! - [`tracing_compat`]: feature-gated logging macros
//!
//! # Example
//!
//! ```
//! use strand::{run_scope, Context};
//!
//! let result = run_scope(Context::new(), |cx| async move {
//!     let doubled = cx.defer(Context::new(), |_cx| async move { Ok(21 * 2) })?;
//!     doubled.await_value(&cx).await
//! });
//! assert_eq!(result.unwrap(), 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod channel;
pub mod cx;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod runtime;
mod time;
pub mod tracing_compat;
pub mod types;

pub use channel::Rendezvous;
pub use cx::{Context, Cx};
pub use dispatch::{
    Dispatch, InlineDispatcher, ManualDispatcher, PoolConfig, PoolDispatcher,
    SingleThreadDispatcher, SubmitError, Task,
};
pub use error::{Failure, Result, UsageError};
pub use generator::{generate, Generator, Yielder};
pub use runtime::{run_scope, Continuation, Deferred, Job, Suspend, SuspendResult};
pub use types::{CancelKind, CancelReason, JobId};
