//! One-shot resume callbacks.

use crate::cx::Context;
use crate::dispatch::{SubmitError, Task};
use crate::error::{Failure, Result};
use crate::tracing_compat::error;
use core::fmt;
use std::sync::{Arc, Mutex};

type ResumeFn<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct ContinuationInner<T> {
    context: Context,
    cell: Mutex<Option<ResumeFn<T>>>,
}

/// A one-shot callback through which a paused computation is resumed.
///
/// Every suspension point produces a continuation; the runtime hands it to
/// whatever external event will eventually unpark the computation. Exactly
/// one of [`resume`](Self::resume) or
/// [`resume_with_failure`](Self::resume_with_failure) fires exactly once;
/// resuming twice is a programming error and panics.
///
/// A continuation carries the [`Context`] that was active at suspension; on
/// resume, the dispatcher element of that context decides where the
/// resumption callback actually runs. A continuation may be resumed from
/// any thread.
///
/// Clones share the same one-shot cell, so a cancellation path and the
/// awaited event can race on clones of the same continuation: the
/// [`try_resume`](Self::try_resume) / [`try_fail`](Self::try_fail) variants
/// let the loser of that race back off instead of panicking.
pub struct Continuation<T> {
    inner: Arc<ContinuationInner<T>>,
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Continuation<T> {
    /// Creates a continuation that feeds `resume` when fired.
    ///
    /// `resume` runs on whichever thread the context's dispatcher selects;
    /// with no dispatcher in the context it runs on the firing thread.
    pub fn new(context: Context, resume: impl FnOnce(Result<T>) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(ContinuationInner {
                context,
                cell: Mutex::new(Some(Box::new(resume))),
            }),
        }
    }

    /// Returns the context captured at suspension.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Resumes the computation with a value.
    ///
    /// # Panics
    ///
    /// Panics if the continuation has already been resumed.
    pub fn resume(self, value: T) {
        assert!(
            self.complete(Ok(value)),
            "continuation resumed more than once"
        );
    }

    /// Resumes the computation with a failure.
    ///
    /// # Panics
    ///
    /// Panics if the continuation has already been resumed.
    pub fn resume_with_failure(self, failure: Failure) {
        assert!(
            self.complete(Err(failure)),
            "continuation resumed more than once"
        );
    }

    /// Resumes with a value unless the continuation was already claimed.
    ///
    /// Returns `true` if this call won the claim.
    pub fn try_resume(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Resumes with a failure unless the continuation was already claimed.
    ///
    /// Returns `true` if this call won the claim.
    pub fn try_fail(&self, failure: Failure) -> bool {
        self.complete(Err(failure))
    }

    /// Claims the continuation without running it.
    ///
    /// Used when a suspension resolves synchronously and the handed-out
    /// continuation must never fire.
    pub(crate) fn disarm(&self) {
        drop(
            self.inner
                .cell
                .lock()
                .expect("continuation lock poisoned")
                .take(),
        );
    }

    /// Like [`resume`](Self::resume) but reports a dispatcher refusal to
    /// the caller instead of logging it.
    pub(crate) fn resume_or_reject(self, value: T) -> std::result::Result<(), SubmitError> {
        let resume = self
            .inner
            .cell
            .lock()
            .expect("continuation lock poisoned")
            .take()
            .expect("continuation resumed more than once");
        let task: Task = Box::new(move || resume(Ok(value)));
        match self.inner.context.dispatcher() {
            Some(dispatcher) => dispatcher.submit(task),
            None => {
                task();
                Ok(())
            }
        }
    }

    /// Returns true when two handles share the same one-shot cell.
    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn complete(&self, result: Result<T>) -> bool {
        let Some(resume) = self
            .inner
            .cell
            .lock()
            .expect("continuation lock poisoned")
            .take()
        else {
            return false;
        };
        let task: Task = Box::new(move || resume(result));
        match self.inner.context.dispatcher() {
            Some(dispatcher) => {
                if let Err(_refused) = dispatcher.submit(task) {
                    error!("dropping a resumption: {}", _refused);
                }
            }
            None => task(),
        }
        true
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let armed = self
            .inner
            .cell
            .lock()
            .map(|cell| cell.is_some())
            .unwrap_or(false);
        f.debug_struct("Continuation").field("armed", &armed).finish()
    }
}
