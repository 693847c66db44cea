//! The runtime core: continuations, the coroutine engine, the job tree,
//! and the blocking scope entry.
//!
//! A coroutine is a chain of one-shot [`Continuation`]s driven by
//! `Future::poll` under the hood. Suspension points hand the current
//! continuation to an external event source (a timer, a channel peer, a
//! job's terminal transition), which resumes it through the dispatcher
//! captured in the coroutine's context. The [`Job`] tree layers structured
//! concurrency on top: cancellation flows down, unhandled failures flow up,
//! and a job is terminal only once all of its children are.

mod continuation;
mod coroutine;
mod job;
mod scope;
mod suspend;

pub use continuation::Continuation;
pub use job::{Deferred, Job};
pub use scope::run_scope;
pub use suspend::{Suspend, SuspendResult};

pub(crate) use coroutine::{build, Coroutine};
pub(crate) use job::{JobCore, WaiterOutcome};
