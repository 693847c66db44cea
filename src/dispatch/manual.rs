//! Deterministic, manually pumped dispatch for tests.

use super::{Dispatch, SubmitError, Task};
use core::fmt;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A dispatcher that queues tasks until the caller pumps them.
///
/// Nothing runs until [`run_one`](Self::run_one) or
/// [`run_until_idle`](Self::run_until_idle) is called, so a test controls
/// the exact interleaving of coroutine steps. Tasks run in FIFO order.
#[derive(Default)]
pub struct ManualDispatcher {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualDispatcher {
    /// Creates an empty manual dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the oldest queued task, if any.
    ///
    /// Returns `true` if a task ran.
    pub fn run_one(&self) -> bool {
        let task = self
            .queue
            .lock()
            .expect("manual dispatcher lock poisoned")
            .pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks (including ones they enqueue) until the queue is
    /// empty. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Returns the number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .expect("manual dispatcher lock poisoned")
            .len()
    }
}

impl fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

impl Dispatch for ManualDispatcher {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        self.queue
            .lock()
            .expect("manual dispatcher lock poisoned")
            .push_back(task);
        Ok(())
    }
}
