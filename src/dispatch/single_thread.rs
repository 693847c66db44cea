//! Dispatch onto a single serializing thread.

use super::{Dispatch, SubmitError, Task};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

struct SingleThreadInner {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

/// Forwards every task to one dedicated thread, in FIFO order.
///
/// The serializing thread plays the role of an event loop: tasks submitted
/// from any thread run one after another, never concurrently. The thread
/// is spawned eagerly at construction and drained gracefully on
/// [`shutdown`](Self::shutdown) or drop.
pub struct SingleThreadDispatcher {
    inner: Arc<SingleThreadInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl SingleThreadDispatcher {
    /// Spawns the serializing thread with the given name.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the thread.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(SingleThreadInner {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(&worker_inner))
            .expect("failed to spawn dispatcher thread");
        let worker_id = handle.thread().id();
        Self {
            inner,
            worker: Mutex::new(Some(handle)),
            worker_id,
        }
    }

    /// Signals shutdown and waits for the queue to drain.
    ///
    /// Already-queued tasks still run; further submissions are refused.
    /// Calling this from the serializing thread itself only signals; the
    /// thread is never joined onto itself.
    pub fn shutdown(&self) {
        {
            // Store the flag under the queue lock so the worker cannot
            // check it stale and then sleep through the notification.
            let _guard = self.inner.queue.lock();
            self.inner.shutdown.store(true, Ordering::Release);
        }
        self.inner.condvar.notify_all();
        if thread::current().id() != self.worker_id {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SingleThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SingleThreadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleThreadDispatcher")
            .field("pending", &self.inner.queue.lock().len())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatch for SingleThreadDispatcher {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }
        self.inner.queue.lock().push_back(task);
        self.inner.condvar.notify_one();
        Ok(())
    }
}

fn worker_loop(inner: &SingleThreadInner) {
    loop {
        let task = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                inner.condvar.wait(&mut queue);
            }
        };
        task();
    }
}
