//! Synchronous, same-thread dispatch.

use super::{Dispatch, SubmitError, Task};

/// Runs every submitted task synchronously on the calling thread.
///
/// This is the dispatcher a scope falls back to when its context carries
/// none, and the one to pick when the programmer explicitly opts out of
/// thread hand-off. Under this dispatcher `yield_now` is effectively a
/// no-op and a whole job tree runs on one stack, which makes execution
/// order deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl InlineDispatcher {
    /// Creates an inline dispatcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dispatch for InlineDispatcher {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        task();
        Ok(())
    }
}
