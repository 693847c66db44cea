//! The coroutine engine: a pollable body plus a step trampoline.

use crate::cx::{Context, Cx};
use crate::error::Result;
use crate::runtime::Continuation;
use crate::tracing_compat::error;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll, Wake, Waker};

/// No coroutine step in progress.
const IDLE: u8 = 0;
/// A step is polling the body.
const RUNNING: u8 = 1;
/// A resume arrived while a step was in progress; run another step.
const NOTIFIED: u8 = 2;

type BodyFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A suspendable computation.
///
/// The body is a boxed future; a *step* polls it until it suspends or
/// completes. The `state` trampoline guarantees exactly one step runs at a
/// time: a resume arriving mid-step (inline dispatcher re-entrancy, or a
/// peer resuming from another thread) records a notification instead of
/// re-entering, and the in-progress step loops once more. This is what
/// keeps a single coroutine's continuations strictly serialized.
pub(crate) struct Coroutine {
    body: Mutex<Option<BodyFuture>>,
    state: AtomicU8,
}

impl Coroutine {
    pub(crate) fn new() -> Self {
        Self {
            body: Mutex::new(None),
            state: AtomicU8::new(IDLE),
        }
    }

    pub(crate) fn install(&self, body: BodyFuture) {
        *self.body.lock().expect("coroutine body lock poisoned") = Some(body);
    }

    /// Drops the body without running it further.
    pub(crate) fn clear(&self) {
        *self.body.lock().expect("coroutine body lock poisoned") = None;
    }

    /// Runs steps until the body suspends with no pending notification.
    pub(crate) fn step(&self) {
        // Become the runner, or leave a notification for the current one.
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match current {
                IDLE => match self.state.compare_exchange(
                    IDLE,
                    RUNNING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                },
                RUNNING => match self.state.compare_exchange(
                    RUNNING,
                    NOTIFIED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return,
                    Err(observed) => current = observed,
                },
                _ => return,
            }
        }

        loop {
            let completed = {
                let mut slot = self.body.lock().expect("coroutine body lock poisoned");
                match slot.as_mut() {
                    None => true,
                    Some(body) => {
                        let waker = noop_waker();
                        let mut task_cx = TaskContext::from_waker(&waker);
                        match body.as_mut().poll(&mut task_cx) {
                            Poll::Ready(()) => {
                                *slot = None;
                                true
                            }
                            Poll::Pending => false,
                        }
                    }
                }
            };
            if completed {
                self.state.store(IDLE, Ordering::Release);
                return;
            }
            match self
                .state
                .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                // A notification raced in; consume it and poll again.
                Err(_) => self.state.store(RUNNING, Ordering::Release),
            }
        }
    }
}

/// Builds a coroutine from a suspendable block and a completion callback.
///
/// Returns the entry continuation of unit: invoking it starts the block,
/// which then runs until it either returns (the completion receives the
/// final value or failure) or suspends (the suspension point has captured a
/// fresh continuation elsewhere). The job, deferred, and generator layers
/// all sit on this one builder.
pub(crate) fn build<T, F, Fut, C>(context: Context, block: F, completion: C) -> Continuation<()>
where
    T: Send + 'static,
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) + Send + 'static,
{
    let coroutine = Arc::new(Coroutine::new());
    let cx = Cx::new(context.clone(), Arc::downgrade(&coroutine));
    let body = block(cx);
    coroutine.install(Box::pin(async move { completion(body.await) }));
    Continuation::new(context, move |entry: Result<()>| match entry {
        Ok(()) => coroutine.step(),
        Err(_failure) => {
            error!("coroutine entry resumed with a failure: {}; dropping the body", _failure);
            coroutine.clear();
        }
    })
}

fn noop_waker() -> Waker {
    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
        fn wake_by_ref(self: &Arc<Self>) {}
    }

    Waker::from(Arc::new(NoopWaker))
}
