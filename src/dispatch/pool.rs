//! Dispatch onto a bounded worker pool.

use super::{Dispatch, SubmitError, Task};
use core::fmt;
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Configuration for a [`PoolDispatcher`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of worker threads.
    pub max_threads: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_threads: thread::available_parallelism().map_or(4, usize::from),
            thread_name: "strand-pool".to_string(),
        }
    }
}

struct PoolInner {
    config: PoolConfig,
    /// Injection queue; workers pop from here.
    queue: SegQueue<Task>,
    /// Tasks pushed but not yet started.
    pending: AtomicUsize,
    /// Workers currently parked waiting for work.
    idle: AtomicUsize,
    /// Workers spawned so far.
    active: AtomicUsize,
    shutdown: AtomicBool,
    /// Mutex for the condition variable only; the queue itself is lock-free.
    lock: Mutex<()>,
    condvar: Condvar,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Forwards tasks to a pool of worker threads.
///
/// Threads are spawned lazily up to `max_threads` and park on a condition
/// variable when the queue is empty. Shutdown is graceful: queued tasks
/// drain before the workers exit.
///
/// Distinct coroutines make progress on distinct threads under this
/// dispatcher; any single coroutine's steps remain strictly serialized by
/// the coroutine itself.
pub struct PoolDispatcher {
    inner: Arc<PoolInner>,
}

impl PoolDispatcher {
    /// Creates a pool with at most `max_threads` workers.
    #[must_use]
    pub fn new(max_threads: usize) -> Self {
        Self::with_config(PoolConfig {
            max_threads: max_threads.max(1),
            ..PoolConfig::default()
        })
    }

    /// Creates a pool from an explicit configuration.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                queue: SegQueue::new(),
                pending: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                lock: Mutex::new(()),
                condvar: Condvar::new(),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Signals shutdown, drains queued tasks, and joins the workers.
    ///
    /// Calling this from a worker thread only signals; a worker is never
    /// joined onto itself.
    pub fn shutdown(&self) {
        {
            // Store the flag under the lock so a worker between its
            // empty-queue check and its wait cannot miss the signal.
            let _guard = self.inner.lock.lock();
            self.inner.shutdown.store(true, Ordering::Release);
        }
        self.inner.condvar.notify_all();
        let current = thread::current().id();
        let handles: Vec<JoinHandle<()>> = self.inner.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }

    fn maybe_spawn_worker(&self) {
        let inner = &self.inner;
        if inner.idle.load(Ordering::Acquire) > 0 {
            return;
        }
        let mut active = inner.active.load(Ordering::Acquire);
        while active < inner.config.max_threads {
            match inner.active.compare_exchange(
                active,
                active + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let worker_inner = Arc::clone(inner);
                    let name = format!("{}-{active}", inner.config.thread_name);
                    let handle = thread::Builder::new()
                        .name(name)
                        .spawn(move || worker_loop(&worker_inner))
                        .expect("failed to spawn pool worker");
                    inner.handles.lock().push(handle);
                    return;
                }
                Err(current) => active = current,
            }
        }
    }
}

impl Drop for PoolDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for PoolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolDispatcher")
            .field("max_threads", &self.inner.config.max_threads)
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatch for PoolDispatcher {
    fn submit(&self, task: Task) -> Result<(), SubmitError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }
        self.inner.pending.fetch_add(1, Ordering::Release);
        self.inner.queue.push(task);
        self.maybe_spawn_worker();
        {
            // Taking the lock pairs this notify with a worker's re-check,
            // so the push cannot slip between its check and its wait.
            let _guard = self.inner.lock.lock();
        }
        self.inner.condvar.notify_one();
        Ok(())
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Release);
            task();
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }
        inner.idle.fetch_add(1, Ordering::Release);
        {
            let mut guard = inner.lock.lock();
            // Re-check under the lock so a push that raced with the empty
            // pop above cannot strand its notification.
            if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
                inner.condvar.wait(&mut guard);
            }
        }
        inner.idle.fetch_sub(1, Ordering::Release);
    }
}
