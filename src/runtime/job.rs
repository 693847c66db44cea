//! The structured job tree.
//!
//! A [`Job`] is the lifecycle handle for a running coroutine. Jobs form a
//! tree: children hold owning references to their own state, parents hold
//! weak handles to their children. Cancellation propagates downward;
//! unhandled non-cancellation failures propagate upward.
//!
//! State machine:
//!
//! ```text
//! Active ──cancel──▶ Cancelling ──all children terminal──▶ Cancelled
//!   │                      │
//!   │                      └──body returned normally──▶ Completed(Cancellation)
//!   ▼
//! body returns value  ──▶ Completed(v)
//! body raises failure ──▶ Completed(failure)   (+ cancel request on parent)
//! ```
//!
//! A job is terminal only once its body has unwound *and* every child is
//! terminal; `cancel` never completes a job synchronously. When a job's
//! body completes while children are still active, the children receive a
//! cancellation request and the job finalizes once they are done.

use crate::cx::Cx;
use crate::error::{Failure, Result};
use crate::runtime::{Continuation, SuspendResult};
use crate::tracing_compat::{error, trace};
use crate::types::{CancelKind, CancelReason, JobId};
use core::fmt;
use smallvec::SmallVec;
use std::sync::{Arc, Mutex, Weak};

/// A completion waiter, resumed exactly once at the terminal transition
/// with the job's terminal failure (if any).
pub(crate) type Waiter = Box<dyn FnOnce(Option<Failure>) + Send>;

/// A parked-suspension hook, run when cancellation is delivered.
pub(crate) type CancelHook = Box<dyn FnOnce(CancelReason) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Cancelling,
    Completed,
    Cancelled,
}

impl Phase {
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

struct JobRecord {
    phase: Phase,
    cancel_reason: Option<CancelReason>,
    body_done: bool,
    body_failure: Option<Failure>,
    terminal_failure: Option<Failure>,
    /// First child failure that provoked cancellation of this job.
    failure_cause: Option<Failure>,
    children: SmallVec<[Weak<JobCore>; 4]>,
    waiters: SmallVec<[Waiter; 2]>,
    hooks: SmallVec<[(u64, CancelHook); 2]>,
    next_hook_id: u64,
}

/// Outcome of registering a completion waiter.
pub(crate) enum WaiterOutcome {
    /// The waiter was stored; it fires at the terminal transition.
    Registered,
    /// The job is already terminal; the waiter was dropped and the
    /// terminal failure is returned instead.
    Terminal(Option<Failure>),
}

/// Shared state of one job. `Job` handles and child back-pointers all
/// refer to this record; the mutex guards the only mutable location.
pub(crate) struct JobCore {
    id: JobId,
    parent: Weak<JobCore>,
    record: Mutex<JobRecord>,
}

impl JobCore {
    fn new(parent: Weak<JobCore>) -> Arc<Self> {
        Arc::new(Self {
            id: JobId::next(),
            parent,
            record: Mutex::new(JobRecord {
                phase: Phase::Active,
                cancel_reason: None,
                body_done: false,
                body_failure: None,
                terminal_failure: None,
                failure_cause: None,
                children: SmallVec::new(),
                waiters: SmallVec::new(),
                hooks: SmallVec::new(),
                next_hook_id: 0,
            }),
        })
    }

    pub(crate) fn new_root() -> Arc<Self> {
        Self::new(Weak::new())
    }

    /// Creates a child registered under `parent`.
    ///
    /// A child born under a parent that is already cancelling or past its
    /// body receives a cancellation request immediately.
    pub(crate) fn new_child(parent: &Arc<Self>) -> Arc<Self> {
        let child = Self::new(Arc::downgrade(parent));
        let born_cancelled = {
            let mut record = parent.lock_record();
            record.children.push(Arc::downgrade(&child));
            match record.phase {
                Phase::Active if !record.body_done => None,
                Phase::Active | Phase::Completed => Some(CancelReason::parent_completed()),
                Phase::Cancelling | Phase::Cancelled => Some(CancelReason::parent_cancelled()),
            }
        };
        if let Some(reason) = born_cancelled {
            child.request_cancel(reason);
        }
        child
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    /// Requests cancellation: `Active → Cancelling`, idempotent, no-op on
    /// terminal jobs. Delivers the signal to every parked suspension and
    /// cascades to children. Repeated requests strengthen the stored
    /// reason without re-delivering.
    pub(crate) fn request_cancel(self: &Arc<Self>, reason: CancelReason) {
        let delivery = {
            let mut record = self.lock_record();
            match record.phase {
                Phase::Active => {
                    record.phase = Phase::Cancelling;
                    record.cancel_reason = Some(reason.clone());
                    let hooks: SmallVec<[CancelHook; 2]> =
                        record.hooks.drain(..).map(|(_, hook)| hook).collect();
                    let children: Vec<Arc<JobCore>> =
                        record.children.iter().filter_map(Weak::upgrade).collect();
                    Some((hooks, children))
                }
                Phase::Cancelling => {
                    if let Some(existing) = record.cancel_reason.as_mut() {
                        existing.strengthen(&reason);
                    }
                    None
                }
                Phase::Completed | Phase::Cancelled => None,
            }
        };
        if let Some((hooks, children)) = delivery {
            trace!("job {} cancelling: {}", self.id, reason);
            for hook in hooks {
                hook(reason.clone());
            }
            for child in children {
                child.request_cancel(CancelReason::parent_cancelled());
            }
        }
    }

    /// Registers a cancellation hook for a parked suspension.
    ///
    /// # Errors
    ///
    /// If the job is already cancelling the hook is handed back together
    /// with the reason; the caller must deliver it immediately so the
    /// suspension resolves toward Cancellation instead of staying parked
    /// (this is what makes cancellation sticky).
    pub(crate) fn register_suspension(
        &self,
        hook: CancelHook,
    ) -> Result<u64, (CancelReason, CancelHook)> {
        let mut record = self.lock_record();
        match record.phase {
            Phase::Active => {
                let id = record.next_hook_id;
                record.next_hook_id += 1;
                record.hooks.push((id, hook));
                Ok(id)
            }
            _ => Err((
                record
                    .cancel_reason
                    .clone()
                    .unwrap_or_else(|| CancelReason::new(CancelKind::User)),
                hook,
            )),
        }
    }

    pub(crate) fn remove_suspension(&self, id: u64) {
        self.lock_record().hooks.retain(|(hook_id, _)| *hook_id != id);
    }

    /// Returns the cancellation reason if cancellation has been requested.
    pub(crate) fn cancel_requested(&self) -> Option<CancelReason> {
        let record = self.lock_record();
        match record.phase {
            Phase::Cancelling | Phase::Cancelled => Some(
                record
                    .cancel_reason
                    .clone()
                    .unwrap_or_else(|| CancelReason::new(CancelKind::User)),
            ),
            _ => None,
        }
    }

    /// Registers a completion waiter, or reports that the job is already
    /// terminal. Waiters fire in registration order.
    pub(crate) fn add_waiter(&self, waiter: Waiter) -> WaiterOutcome {
        let mut record = self.lock_record();
        if record.phase.is_terminal() {
            WaiterOutcome::Terminal(record.terminal_failure.clone())
        } else {
            record.waiters.push(waiter);
            WaiterOutcome::Registered
        }
    }

    /// Records that the body unwound, cancels still-active children, and
    /// finalizes once the tree below is quiescent.
    pub(crate) fn body_finished(self: &Arc<Self>, outcome: Result<()>) {
        let to_cancel: Vec<Arc<JobCore>> = {
            let mut record = self.lock_record();
            debug_assert!(!record.body_done, "job body finished twice");
            record.body_done = true;
            record.body_failure = outcome.err();
            record
                .children
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|child| !child.is_terminal())
                .collect()
        };
        for child in to_cancel {
            child.request_cancel(CancelReason::parent_completed());
        }
        self.try_finalize();
    }

    /// A child reached its terminal state: prune it, escalate its failure
    /// if it carried one, and re-check our own finalization.
    fn child_terminal(self: &Arc<Self>, child: &Arc<JobCore>, escalation: Option<Failure>) {
        {
            let mut record = self.lock_record();
            record
                .children
                .retain(|weak| weak.upgrade().is_some_and(|c| !Arc::ptr_eq(&c, child)));
        }
        if let Some(failure) = escalation {
            self.record_child_failure(failure);
        }
        self.try_finalize();
    }

    /// Stashes the first child failure as this job's failure cause and
    /// requests cancellation.
    fn record_child_failure(self: &Arc<Self>, failure: Failure) {
        {
            let mut record = self.lock_record();
            if record.failure_cause.is_none() {
                record.failure_cause = Some(failure);
            }
        }
        self.request_cancel(CancelReason::child_failed());
    }

    fn try_finalize(self: &Arc<Self>) {
        let finished = {
            let mut record = self.lock_record();
            if record.phase.is_terminal() || !record.body_done {
                None
            } else if record
                .children
                .iter()
                .any(|weak| weak.upgrade().is_some_and(|child| !child.is_terminal()))
            {
                None
            } else {
                let (phase, terminal_failure) = match (record.phase, record.body_failure.take()) {
                    (Phase::Active, None) => (Phase::Completed, None),
                    (Phase::Active, Some(failure)) if failure.is_cancelled() => {
                        (Phase::Cancelled, Some(failure))
                    }
                    (Phase::Active, Some(failure)) => (Phase::Completed, Some(failure)),
                    (Phase::Cancelling, body_failure) => {
                        let reason = record
                            .cancel_reason
                            .clone()
                            .unwrap_or_else(|| CancelReason::new(CancelKind::User));
                        match body_failure {
                            None => (Phase::Completed, Some(Failure::cancelled(reason))),
                            Some(failure) if failure.is_cancelled() => {
                                (Phase::Cancelled, Some(failure))
                            }
                            Some(_suppressed) => {
                                error!("job {} raised while cancelling: {}", self.id, _suppressed);
                                (Phase::Cancelled, Some(Failure::cancelled(reason)))
                            }
                        }
                    }
                    (Phase::Completed | Phase::Cancelled, _) => unreachable!("checked above"),
                };
                record.phase = phase;
                record.terminal_failure = terminal_failure.clone();
                let waiters: SmallVec<[Waiter; 2]> = record.waiters.drain(..).collect();
                Some((waiters, terminal_failure))
            }
        };
        let Some((waiters, failure)) = finished else {
            return;
        };
        trace!("job {} terminal: {:?}", self.id, failure);
        let escalation = failure.as_ref().filter(|f| !f.is_cancelled()).cloned();
        if let Some(parent) = self.parent.upgrade() {
            parent.child_terminal(self, escalation);
        }
        for waiter in waiters {
            waiter(failure.clone());
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.lock_record().phase.is_terminal()
    }

    pub(crate) fn terminal_failure(&self) -> Option<Failure> {
        self.lock_record().terminal_failure.clone()
    }

    pub(crate) fn failure_cause(&self) -> Option<Failure> {
        self.lock_record().failure_cause.clone()
    }

    fn phase(&self) -> Phase {
        self.lock_record().phase
    }

    fn lock_record(&self) -> std::sync::MutexGuard<'_, JobRecord> {
        self.record.lock().expect("job record lock poisoned")
    }
}

/// A suspension's registration with its job, removed when the suspension
/// resolves normally.
pub(crate) struct SuspensionToken {
    job: Arc<JobCore>,
    id: u64,
}

impl SuspensionToken {
    pub(crate) fn new(job: Arc<JobCore>, id: u64) -> Self {
        Self { job, id }
    }

    pub(crate) fn deregister(self) {
        self.job.remove_suspension(self.id);
    }
}

/// Lifecycle handle for a running coroutine.
///
/// Cheaply clonable; clones share the same underlying state. A job is an
/// element of the coroutine context, so every coroutine can reach its own
/// handle through [`Cx::job`](crate::cx::Cx::job).
#[derive(Clone)]
pub struct Job {
    core: Arc<JobCore>,
}

impl Job {
    pub(crate) fn from_core(core: Arc<JobCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<JobCore> {
        &self.core
    }

    /// Returns this job's id.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.core.id()
    }

    /// Requests cancellation of this job.
    ///
    /// Idempotent and asynchronous: the job transitions to `Cancelling`,
    /// parked suspensions resolve toward Cancellation, and the next
    /// suspension point fails. The job is terminal only once its body has
    /// unwound and its children are terminal. A no-op on terminal jobs.
    pub fn cancel(&self) {
        self.core.request_cancel(CancelReason::new(CancelKind::User));
    }

    /// Like [`cancel`](Self::cancel) with an explicit reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.core.request_cancel(reason);
    }

    /// True while the job is running and not cancelling.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.phase() == Phase::Active
    }

    /// True once cancellation has been requested but the job is not yet
    /// terminal.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.core.phase() == Phase::Cancelling
    }

    /// True if the job reached `Completed` (with a value or a failure).
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.phase() == Phase::Completed
    }

    /// True if the job reached `Cancelled`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.phase() == Phase::Cancelled
    }

    /// True once the job reached either terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.core.is_terminal()
    }

    /// Suspends until this job is terminal.
    ///
    /// Discards the target's value and does not re-raise its failure; the
    /// only failure `join` raises is Cancellation, when the *awaiting* job
    /// was itself cancelled. Joining an already-terminal job returns
    /// synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`Failure::Cancelled`] if the awaiting job is cancelled.
    pub async fn join(&self, cx: &Cx) -> Result<()> {
        let target = Arc::clone(&self.core);
        cx.suspend(move |k: Continuation<()>| {
            let waiter_k = k.clone();
            match target.add_waiter(Box::new(move |_failure| {
                let _ = waiter_k.try_resume(());
            })) {
                WaiterOutcome::Registered => SuspendResult::Suspended,
                WaiterOutcome::Terminal(_) => SuspendResult::Ready(()),
            }
        })
        .await
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.core.id())
            .field("phase", &self.core.phase())
            .finish()
    }
}

/// A [`Job`] that additionally carries a typed result slot.
pub struct Deferred<T> {
    job: Job,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Deferred<T> {
    pub(crate) fn new(job: Job, slot: Arc<Mutex<Option<T>>>) -> Self {
        Self { job, slot }
    }

    /// Returns the underlying job handle.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    /// Suspends until the deferred job is terminal and yields its value.
    ///
    /// Re-raises the job's failure on failure; awaiting an
    /// already-terminal deferred resolves synchronously. The value is
    /// cloned out of the result slot, so repeated awaits (or several
    /// awaiters) all observe it.
    ///
    /// # Errors
    ///
    /// Returns the deferred body's failure, or [`Failure::Cancelled`] if
    /// either the deferred job or the awaiting job was cancelled.
    pub async fn await_value(&self, cx: &Cx) -> Result<T> {
        let target = Arc::clone(self.job.core());
        cx.suspend(move |k: Continuation<()>| {
            let waiter_k = k.clone();
            match target.add_waiter(Box::new(move |failure| match failure {
                None => {
                    let _ = waiter_k.try_resume(());
                }
                Some(failure) => {
                    let _ = waiter_k.try_fail(failure);
                }
            })) {
                WaiterOutcome::Registered => SuspendResult::Suspended,
                WaiterOutcome::Terminal(None) => SuspendResult::Ready(()),
                WaiterOutcome::Terminal(Some(failure)) => {
                    k.resume_with_failure(failure);
                    SuspendResult::Suspended
                }
            }
        })
        .await?;
        let value = self
            .slot
            .lock()
            .expect("deferred slot lock poisoned")
            .clone()
            .expect("deferred job completed successfully without a value");
        Ok(value)
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("job", &self.job).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fresh_job_is_active() {
        let core = JobCore::new_root();
        let job = Job::from_core(core);
        assert!(job.is_active());
        assert!(!job.is_terminal());
    }

    #[test]
    fn body_completion_without_children_is_terminal() {
        let core = JobCore::new_root();
        core.body_finished(Ok(()));
        let job = Job::from_core(core);
        assert!(job.is_completed());
        assert!(job.is_terminal());
    }

    #[test]
    fn cancel_is_idempotent_and_a_noop_on_terminal_jobs() {
        let core = JobCore::new_root();
        let job = Job::from_core(Arc::clone(&core));
        job.cancel();
        job.cancel();
        assert!(job.is_cancelling());
        core.body_finished(Err(Failure::cancelled(CancelReason::new(CancelKind::User))));
        assert!(job.is_cancelled());
        // Terminal: further cancels change nothing.
        job.cancel();
        assert!(job.is_cancelled());
    }

    #[test]
    fn job_waits_for_children_before_finalizing() {
        let parent = JobCore::new_root();
        let child = JobCore::new_child(&parent);
        parent.body_finished(Ok(()));
        // Child still active: the parent is not yet terminal, and the
        // child has been asked to cancel.
        assert!(!parent.is_terminal());
        assert!(Job::from_core(Arc::clone(&child)).is_cancelling());
        child.body_finished(Err(Failure::cancelled(CancelReason::parent_completed())));
        assert!(child.is_terminal());
        assert!(parent.is_terminal());
    }

    #[test]
    fn child_failure_cancels_the_parent_and_leaves_a_cause() {
        let parent = JobCore::new_root();
        let child = JobCore::new_child(&parent);
        child.body_finished(Err(Failure::usage(crate::error::UsageError::SenderBusy)));
        let parent_job = Job::from_core(Arc::clone(&parent));
        assert!(parent_job.is_cancelling());
        assert!(parent.failure_cause().is_some_and(|f| f.is_usage()));
    }

    #[test]
    fn child_cancellation_does_not_cancel_the_parent() {
        let parent = JobCore::new_root();
        let child = JobCore::new_child(&parent);
        child.request_cancel(CancelReason::new(CancelKind::User));
        child.body_finished(Err(Failure::cancelled(CancelReason::new(CancelKind::User))));
        assert!(child.is_terminal());
        assert!(Job::from_core(Arc::clone(&parent)).is_active());
        assert!(parent.failure_cause().is_none());
    }

    #[test]
    fn waiters_fire_once_in_registration_order() {
        let core = JobCore::new_root();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            let outcome = core.add_waiter(Box::new(move |_| {
                order.lock().expect("order lock").push(i);
            }));
            assert!(matches!(outcome, WaiterOutcome::Registered));
        }
        core.body_finished(Ok(()));
        assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2]);
    }

    #[test]
    fn waiter_added_after_terminal_reports_terminal() {
        let core = JobCore::new_root();
        core.body_finished(Ok(()));
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let outcome = core.add_waiter(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(matches!(outcome, WaiterOutcome::Terminal(None)));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn child_born_under_a_cancelling_parent_is_cancelled() {
        let parent = JobCore::new_root();
        parent.request_cancel(CancelReason::new(CancelKind::User));
        let child = JobCore::new_child(&parent);
        assert!(Job::from_core(child).is_cancelling());
    }

    #[test]
    fn cancel_cascades_to_children() {
        let parent = JobCore::new_root();
        let child = JobCore::new_child(&parent);
        let grandchild = JobCore::new_child(&child);
        parent.request_cancel(CancelReason::new(CancelKind::User));
        assert!(Job::from_core(child).is_cancelling());
        assert!(Job::from_core(grandchild).is_cancelling());
    }

    #[test]
    fn cancelling_body_returning_normally_completes_with_cancellation() {
        let core = JobCore::new_root();
        core.request_cancel(CancelReason::new(CancelKind::User));
        core.body_finished(Ok(()));
        let job = Job::from_core(Arc::clone(&core));
        assert!(job.is_completed());
        assert!(core.terminal_failure().is_some_and(|f| f.is_cancelled()));
    }

    #[test]
    fn suspension_registration_hands_the_hook_back_once_cancelling() {
        let core = JobCore::new_root();
        core.request_cancel(CancelReason::user("stop"));
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let result = core.register_suspension(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        let (reason, hook) = result.expect_err("cancelling");
        assert_eq!(reason.kind(), CancelKind::User);
        hook(reason);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_runs_registered_hooks_once() {
        let core = JobCore::new_root();
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let registered = core.register_suspension(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(registered.is_ok());
        core.request_cancel(CancelReason::new(CancelKind::User));
        core.request_cancel(CancelReason::new(CancelKind::User));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
