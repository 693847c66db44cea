//! The blocking scope entry.

use crate::cx::{Context, Cx};
use crate::error::{Failure, Result, UsageError};
use crate::dispatch::InlineDispatcher;
use crate::runtime::{build, Job, JobCore, WaiterOutcome};
use std::future::Future;
use std::sync::{Arc, Condvar, Mutex};

/// Runs a suspendable block to completion, blocking the calling thread.
///
/// Constructs a root [`Job`], merges `context` with a default
/// [`InlineDispatcher`] when no dispatcher is present, submits the body,
/// and parks the calling thread until the root job's terminal transition.
/// The body's failure is re-raised on the caller thread; if the scope was
/// cancelled by a child's failure, that original failure is re-raised
/// instead.
///
/// This is the only blocking primitive the runtime exposes.
///
/// # Errors
///
/// Returns the body's failure, the failure of an unconsumed failing child,
/// or [`Failure::Cancelled`] if the root job was cancelled.
pub fn run_scope<T, F, Fut>(context: Context, block: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let context = match context.dispatcher() {
        Some(_) => context,
        None => context.with_dispatcher(Arc::new(InlineDispatcher::new())),
    };
    let core = JobCore::new_root();
    let job = Job::from_core(Arc::clone(&core));
    let scope_context = context.with_job(job);

    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    {
        let waiter_gate = Arc::clone(&gate);
        let waiter = Box::new(move |_failure| {
            let (done, condvar) = &*waiter_gate;
            *done.lock().expect("scope gate lock poisoned") = true;
            condvar.notify_all();
        });
        if let WaiterOutcome::Terminal(_) = core.add_waiter(waiter) {
            let (done, _) = &*gate;
            *done.lock().expect("scope gate lock poisoned") = true;
        }
    }

    let slot = Arc::new(Mutex::new(None::<T>));
    let completion_core = Arc::clone(&core);
    let completion_slot = Arc::clone(&slot);
    let entry = build(scope_context, block, move |outcome: Result<T>| match outcome {
        Ok(value) => {
            *completion_slot.lock().expect("scope slot lock poisoned") = Some(value);
            completion_core.body_finished(Ok(()));
        }
        Err(failure) => completion_core.body_finished(Err(failure)),
    });
    entry
        .resume_or_reject(())
        .map_err(|_| Failure::usage(UsageError::DispatchRejected))?;

    {
        let (done, condvar) = &*gate;
        let mut done = done.lock().expect("scope gate lock poisoned");
        while !*done {
            done = condvar.wait(done).expect("scope gate lock poisoned");
        }
    }

    match core.terminal_failure() {
        None => Ok(slot
            .lock()
            .expect("scope slot lock poisoned")
            .take()
            .expect("scope completed without a result")),
        Some(failure) if failure.is_cancelled() => Err(core.failure_cause().unwrap_or(failure)),
        Some(failure) => Err(failure),
    }
}
