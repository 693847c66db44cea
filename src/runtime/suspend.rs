//! The suspension protocol.
//!
//! [`Cx::suspend`](crate::cx::Cx::suspend) is the primitive every
//! suspension point is built from: the runtime passes the current
//! [`Continuation`] to a handler, which either parks it somewhere and
//! returns [`SuspendResult::Suspended`] (the coroutine unwinds to its
//! builder) or answers synchronously with [`SuspendResult::Ready`]. The
//! caller observes the same resume value either way.
//!
//! Cancellation is enforced on both edges of the suspension. A suspension
//! that parks while the job is already cancelling is resolved toward
//! Cancellation immediately instead of staying parked; and any success
//! value delivered to a job that has started cancelling — whether the
//! handler answered synchronously or an event resumed the continuation —
//! is replaced by the cancellation failure. A failure delivered through
//! the continuation passes through unchanged, which is what lets an await
//! re-raise a failed job's original failure even while the awaiting job is
//! being cancelled by it.

use crate::cx::Context;
use crate::error::{Failure, Result};
use crate::runtime::coroutine::Coroutine;
use crate::runtime::job::SuspensionToken;
use crate::runtime::Continuation;
use crate::types::CancelReason;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context as TaskContext, Poll};

/// What a suspension handler did with the continuation it was given.
#[derive(Debug)]
pub enum SuspendResult<T> {
    /// The handler parked the continuation with an external event source;
    /// the coroutine unwinds until the event resumes it.
    Suspended,
    /// The handler answered synchronously; the coroutine continues on the
    /// same stack with this value. The continuation must not have been
    /// stored anywhere.
    Ready(T),
}

type Handler<T> = Box<dyn FnOnce(Continuation<T>) -> SuspendResult<T> + Send>;
type OnCancel<T> = Box<dyn FnOnce(&Continuation<T>, CancelReason) + Send>;

enum Stage<T> {
    Init {
        handler: Handler<T>,
        on_cancel: OnCancel<T>,
    },
    Parked {
        token: Option<SuspensionToken>,
    },
    Done,
}

/// Future returned by [`Cx::suspend`](crate::cx::Cx::suspend).
#[must_use = "a suspension does nothing unless awaited"]
pub struct Suspend<T> {
    context: Context,
    coroutine: Weak<Coroutine>,
    slot: Arc<Mutex<Option<Result<T>>>>,
    stage: Stage<T>,
}

impl<T: Send + 'static> Suspend<T> {
    pub(crate) fn new(
        context: Context,
        coroutine: Weak<Coroutine>,
        handler: Handler<T>,
        on_cancel: OnCancel<T>,
    ) -> Self {
        Self {
            context,
            coroutine,
            slot: Arc::new(Mutex::new(None)),
            stage: Stage::Init { handler, on_cancel },
        }
    }

    fn make_continuation(&self) -> Continuation<T> {
        let slot = Arc::clone(&self.slot);
        // The continuation owns the coroutine: a parked computation is kept
        // alive by whatever event source holds its continuation, and freed
        // when that continuation resolves or is dropped.
        let coroutine = self.coroutine.upgrade();
        Continuation::new(self.context.clone(), move |result| {
            *slot.lock().expect("suspension slot lock poisoned") = Some(result);
            if let Some(coroutine) = &coroutine {
                coroutine.step();
            }
        })
    }
}

impl<T: Send + 'static> Future for Suspend<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, _task: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.stage, Stage::Done) {
                Stage::Init { handler, on_cancel } => {
                    let continuation = this.make_continuation();
                    match handler(continuation.clone()) {
                        SuspendResult::Ready(value) => {
                            continuation.disarm();
                            let result = match this
                                .context
                                .job()
                                .and_then(|job| job.core().cancel_requested())
                            {
                                Some(reason) => Err(Failure::cancelled(reason)),
                                None => Ok(value),
                            };
                            return Poll::Ready(result);
                        }
                        SuspendResult::Suspended => {
                            // Now that the continuation is parked somewhere,
                            // register the cancellation hook. If the job is
                            // already cancelling, deliver the hook ourselves:
                            // it evicts the parked continuation and fails it,
                            // so a cancelled coroutine never stays parked.
                            let token = match this.context.job() {
                                Some(job) => {
                                    let hook_k = continuation.clone();
                                    let hook = Box::new(move |reason: CancelReason| {
                                        on_cancel(&hook_k, reason);
                                    });
                                    match job.core().register_suspension(hook) {
                                        Ok(id) => {
                                            Some(SuspensionToken::new(Arc::clone(job.core()), id))
                                        }
                                        Err((reason, hook)) => {
                                            hook(reason);
                                            None
                                        }
                                    }
                                }
                                None => None,
                            };
                            // The event may already have resumed us
                            // synchronously; fall through to check the slot.
                            this.stage = Stage::Parked { token };
                        }
                    }
                }
                Stage::Parked { token } => {
                    let resolved = this
                        .slot
                        .lock()
                        .expect("suspension slot lock poisoned")
                        .take();
                    match resolved {
                        Some(result) => {
                            if let Some(token) = token {
                                token.deregister();
                            }
                            let result = match result {
                                Ok(value) => {
                                    // Exit-side cancellation check: a value
                                    // delivered after cancel started loses
                                    // to the cancellation.
                                    match this
                                        .context
                                        .job()
                                        .and_then(|job| job.core().cancel_requested())
                                    {
                                        Some(reason) => Err(Failure::cancelled(reason)),
                                        None => Ok(value),
                                    }
                                }
                                Err(failure) => Err(failure),
                            };
                            return Poll::Ready(result);
                        }
                        None => {
                            this.stage = Stage::Parked { token };
                            return Poll::Pending;
                        }
                    }
                }
                Stage::Done => panic!("suspension polled after completion"),
            }
        }
    }
}
