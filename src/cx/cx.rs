//! The capability handle passed to every suspendable block.

use crate::cx::Context;
use crate::dispatch::{Dispatch, InlineDispatcher};
use crate::error::{Failure, Result, UsageError};
use crate::runtime::{
    build, Continuation, Coroutine, Deferred, Job, JobCore, Suspend, SuspendResult,
};
use crate::time::TimerDriver;
use crate::types::{CancelReason, JobId};
use core::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// The capability token for a coroutine.
///
/// Every suspendable block receives a `Cx`; all effectful operations flow
/// through it. A `Cx` grants access to:
///
/// - **Identity**: the [`Context`] the coroutine runs under, including its
///   [`Job`] and dispatcher.
/// - **Suspension**: [`suspend`](Self::suspend), [`yield_now`](Self::yield_now)
///   and [`delay`](Self::delay).
/// - **Structure**: [`launch`](Self::launch) and [`defer`](Self::defer)
///   install children under the current job.
/// - **Diagnostics**: [`trace`](Self::trace).
///
/// `Cx` is cheaply clonable; clones refer to the same coroutine.
#[derive(Clone)]
pub struct Cx {
    context: Context,
    coroutine: Weak<Coroutine>,
}

impl Cx {
    pub(crate) fn new(context: Context, coroutine: Weak<Coroutine>) -> Self {
        Self { context, coroutine }
    }

    /// Returns the coroutine's context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the current job, if the context carries one.
    #[must_use]
    pub fn job(&self) -> Option<Job> {
        self.context.job()
    }

    /// Returns the current dispatcher, if the context carries one.
    #[must_use]
    pub fn dispatcher(&self) -> Option<Arc<dyn Dispatch>> {
        self.context.dispatcher()
    }

    /// The universal suspension point.
    ///
    /// The runtime hands the current continuation to `handler`. If the
    /// handler parks it with an external event source and returns
    /// [`SuspendResult::Suspended`], the coroutine unwinds until that event
    /// resumes it; if it returns [`SuspendResult::Ready`], the coroutine
    /// continues synchronously. Either way the await yields the same
    /// resume value.
    ///
    /// Cancellation of the current job resolves the suspension toward
    /// [`Failure::Cancelled`]: a continuation parked while the job is
    /// already cancelling is failed immediately, a parked continuation is
    /// claimed when cancellation arrives, and a success value delivered
    /// after cancellation started is replaced by the cancellation failure.
    /// A cancelled coroutine cannot sleep through its cancellation.
    pub fn suspend<T, H>(&self, handler: H) -> Suspend<T>
    where
        T: Send + 'static,
        H: FnOnce(Continuation<T>) -> SuspendResult<T> + Send + 'static,
    {
        self.suspend_with(handler, |k, reason| {
            let _ = k.try_fail(Failure::cancelled(reason));
        })
    }

    /// Like [`suspend`](Self::suspend) with a custom cancellation hook,
    /// for primitives that must undo external registration (e.g. evict a
    /// parked continuation from a channel cell) before failing it.
    pub(crate) fn suspend_with<T, H, C>(&self, handler: H, on_cancel: C) -> Suspend<T>
    where
        T: Send + 'static,
        H: FnOnce(Continuation<T>) -> SuspendResult<T> + Send + 'static,
        C: FnOnce(&Continuation<T>, CancelReason) + Send + 'static,
    {
        Suspend::new(
            self.context.clone(),
            self.coroutine.clone(),
            Box::new(handler),
            Box::new(on_cancel),
        )
    }

    /// Suspends and immediately re-submits the continuation through the
    /// dispatcher.
    ///
    /// On a serializing dispatcher this gives other ready continuations a
    /// chance to run; on [`InlineDispatcher`] it is effectively a no-op.
    /// A cancelled coroutine's yield resumes with Cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Cancelled`] once the current job is cancelling.
    pub async fn yield_now(&self) -> Result<()> {
        self.suspend(|k: Continuation<()>| {
            k.resume(());
            SuspendResult::Suspended
        })
        .await
    }

    /// Suspends and schedules the continuation to be resumed through the
    /// current dispatcher after `duration`.
    ///
    /// Cancellation disarms the pending timer and resumes with
    /// Cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Cancelled`] if the job is cancelled before the
    /// timer fires.
    pub async fn delay(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        self.suspend(move |k: Continuation<()>| {
            TimerDriver::global().register(deadline, k);
            SuspendResult::Suspended
        })
        .await
    }

    /// Launches a child coroutine and returns its [`Job`].
    ///
    /// The caller's context is merged with `context` (right side wins per
    /// key), a fresh job is installed as the child's current job and
    /// registered under the caller's job, and the block's entry
    /// continuation is dispatched through the merged context's dispatcher.
    ///
    /// # Errors
    ///
    /// Fails synchronously only if the dispatcher refuses submission.
    pub fn launch<F, Fut>(&self, context: Context, block: F) -> Result<Job>
    where
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.spawn_job::<(), _, _>(context, block, None)
    }

    /// Like [`launch`](Self::launch), but the job additionally stores the
    /// block's value in a result slot readable through
    /// [`Deferred::await_value`].
    ///
    /// # Errors
    ///
    /// Fails synchronously only if the dispatcher refuses submission.
    pub fn defer<T, F, Fut>(&self, context: Context, block: F) -> Result<Deferred<T>>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let job = self.spawn_job(context, block, Some(Arc::clone(&slot)))?;
        Ok(Deferred::new(job, slot))
    }

    fn spawn_job<T, F, Fut>(
        &self,
        context: Context,
        block: F,
        slot: Option<Arc<Mutex<Option<T>>>>,
    ) -> Result<Job>
    where
        T: Send + 'static,
        F: FnOnce(Cx) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let merged = self.context.merge(&context);
        let merged = match merged.dispatcher() {
            Some(_) => merged,
            None => merged.with_dispatcher(Arc::new(InlineDispatcher::new())),
        };
        let core = match merged.job() {
            Some(parent) => JobCore::new_child(parent.core()),
            None => JobCore::new_root(),
        };
        let job = Job::from_core(Arc::clone(&core));
        let child_context = merged.with_job(job.clone());

        let completion_core = Arc::clone(&core);
        let entry = build(child_context, block, move |outcome: Result<T>| {
            match outcome {
                Ok(value) => {
                    if let Some(slot) = slot {
                        *slot.lock().expect("result slot lock poisoned") = Some(value);
                    }
                    completion_core.body_finished(Ok(()));
                }
                Err(failure) => completion_core.body_finished(Err(failure)),
            }
        });
        match entry.resume_or_reject(()) {
            Ok(()) => Ok(job),
            Err(_refused) => {
                core.request_cancel(CancelReason::user("dispatcher rejected submission"));
                core.body_finished(Err(Failure::usage(UsageError::DispatchRejected)));
                Err(Failure::usage(UsageError::DispatchRejected))
            }
        }
    }

    /// Emits a trace event tagged with the current job id.
    #[cfg(feature = "tracing-integration")]
    pub fn trace(&self, message: &str) {
        match self.job() {
            Some(job) => crate::tracing_compat::trace!("[{}] {message}", job.id()),
            None => crate::tracing_compat::trace!("{message}"),
        }
    }

    /// Emits a trace event tagged with the current job id.
    #[cfg(not(feature = "tracing-integration"))]
    pub fn trace(&self, _message: &str) {}

    /// Returns the current job's id, if any. Convenience for diagnostics.
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        self.job().map(|job| job.id())
    }
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx").field("context", &self.context).finish()
    }
}
