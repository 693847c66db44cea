//! Pull-mode generators.
//!
//! [`generate`] adapts a suspendable block into a demand-driven iterator:
//! the block runs only when the consumer asks for the next value, suspends
//! at every [`Yielder::yield_value`], and resumes on the consumer's
//! thread. Nothing runs ahead of demand.

use crate::cx::{Context, Cx};
use crate::dispatch::InlineDispatcher;
use crate::error::{Failure, Result, UsageError};
use crate::runtime::{build, Continuation, SuspendResult};
use core::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

struct GenState<T> {
    /// Value written by the most recent yield, not yet pulled.
    value: Option<T>,
    /// Continuation of the current step: the entry continuation at first,
    /// then the continuation of each `yield_value` call.
    next_step: Option<Continuation<()>>,
    done: bool,
    failure: Option<Failure>,
}

/// A lazy sequence produced by a suspendable block.
///
/// Advance it with [`has_next`](Self::has_next) /
/// [`next_value`](Self::next_value), or iterate it: the [`Iterator`]
/// implementation yields `Result<T>` and re-raises a failing body's
/// failure as its final item.
pub struct Generator<T> {
    state: Arc<Mutex<GenState<T>>>,
}

/// The capability a generator block receives for producing values.
pub struct Yielder<T> {
    cx: Cx,
    state: Arc<Mutex<GenState<T>>>,
}

/// Adapts a suspendable block into a [`Generator`].
///
/// The block is not entered until the first demand. Each `yield_value`
/// parks the block until the consumer pulls again; a block that returns
/// marks the generator terminal; a block that fails re-raises its failure
/// to the consumer exactly once.
pub fn generate<T, F, Fut>(block: F) -> Generator<T>
where
    T: Send + 'static,
    F: FnOnce(Yielder<T>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let state = Arc::new(Mutex::new(GenState {
        value: None,
        next_step: None,
        done: false,
        failure: None,
    }));
    let context = Context::new().with_dispatcher(Arc::new(InlineDispatcher::new()));
    let block_state = Arc::clone(&state);
    let completion_state = Arc::clone(&state);
    let entry = build(
        context,
        move |cx| {
            block(Yielder {
                cx,
                state: block_state,
            })
        },
        move |outcome: Result<()>| {
            let mut state = completion_state
                .lock()
                .expect("generator state lock poisoned");
            state.done = true;
            state.failure = outcome.err();
        },
    );
    state
        .lock()
        .expect("generator state lock poisoned")
        .next_step = Some(entry);
    Generator { state }
}

impl<T: Send + 'static> Yielder<T> {
    /// Hands `value` to the consumer and suspends until the next demand.
    ///
    /// # Errors
    ///
    /// Never fails on its own; the `Result` keeps the block's suspension
    /// points uniform.
    pub async fn yield_value(&self, value: T) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.cx
            .suspend(move |k: Continuation<()>| {
                let mut state = state.lock().expect("generator state lock poisoned");
                state.value = Some(value);
                state.next_step = Some(k);
                SuspendResult::Suspended
            })
            .await
    }
}

impl<T: Send + 'static> Generator<T> {
    /// Advances the block until a value is available or it terminates.
    ///
    /// # Errors
    ///
    /// Re-raises the block's failure (once; the generator is terminal
    /// afterwards) or reports [`UsageError::GeneratorStalled`] if the
    /// block suspended on an external event instead of yielding.
    pub fn has_next(&mut self) -> Result<bool> {
        loop {
            let step = {
                let mut state = self.state.lock().expect("generator state lock poisoned");
                if state.value.is_some() {
                    return Ok(true);
                }
                if state.done {
                    return match state.failure.take() {
                        Some(failure) => Err(failure),
                        None => Ok(false),
                    };
                }
                match state.next_step.take() {
                    Some(step) => step,
                    None => return Err(Failure::usage(UsageError::GeneratorStalled)),
                }
            };
            // Runs the block inline up to its next yield or its return.
            step.resume(());
        }
    }

    /// Returns the next value.
    ///
    /// Calls [`has_next`](Self::has_next) lazily if no value is pending.
    ///
    /// # Errors
    ///
    /// Re-raises the block's failure, or reports
    /// [`UsageError::GeneratorExhausted`] past the end of the sequence.
    pub fn next_value(&mut self) -> Result<T> {
        if !self.has_next()? {
            return Err(Failure::usage(UsageError::GeneratorExhausted));
        }
        let value = self
            .state
            .lock()
            .expect("generator state lock poisoned")
            .value
            .take()
            .expect("has_next guaranteed a value");
        Ok(value)
    }
}

impl<T: Send + 'static> Iterator for Generator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_value()),
            Ok(false) => None,
            Err(failure) => Some(Err(failure)),
        }
    }
}

impl<T> Drop for Generator<T> {
    fn drop(&mut self) {
        // An abandoned generator's parked step continuation owns the body,
        // which owns the yielder, which points back at this state: drop the
        // continuation to break the cycle.
        if let Ok(mut state) = self.state.lock() {
            state.next_step = None;
            state.value = None;
        }
    }
}

impl<T> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (ready, done) = self
            .state
            .lock()
            .map(|state| (state.value.is_some(), state.done))
            .unwrap_or((false, false));
        f.debug_struct("Generator")
            .field("ready", &ready)
            .field("done", &done)
            .finish()
    }
}
