//! The shared timer driver.

use crate::runtime::Continuation;
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

/// A deadline plus the continuation to fire when it passes.
struct TimerEntry {
    deadline: Instant,
    /// Registration order; breaks deadline ties so firing is stable.
    seq: u64,
    continuation: Continuation<()>,
}

// Ordering considers only (deadline, seq); `Continuation` has no order.

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct TimerQueue {
    /// Min-heap by deadline (entries pushed reversed).
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

struct TimerInner {
    queue: Mutex<TimerQueue>,
    condvar: Condvar,
}

/// The process-wide timer driver.
///
/// Lazily spawns one driver thread on first use. A cancelled sleeper has
/// already claimed its continuation, so its entry simply fires dead when
/// the deadline passes and is skipped; cancellation never has to dig an
/// entry out of the heap.
pub(crate) struct TimerDriver {
    inner: Arc<TimerInner>,
}

impl TimerDriver {
    /// Returns the shared driver, starting its thread on first call.
    pub(crate) fn global() -> &'static Self {
        static DRIVER: OnceLock<TimerDriver> = OnceLock::new();
        DRIVER.get_or_init(Self::start)
    }

    fn start() -> Self {
        let inner = Arc::new(TimerInner {
            queue: Mutex::new(TimerQueue {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            condvar: Condvar::new(),
        });
        let driver_inner = Arc::clone(&inner);
        thread::Builder::new()
            .name("strand-timer".to_string())
            .spawn(move || driver_loop(&driver_inner))
            .expect("failed to spawn timer thread");
        Self { inner }
    }

    /// Arms `continuation` to fire once `deadline` passes.
    pub(crate) fn register(&self, deadline: Instant, continuation: Continuation<()>) {
        let mut queue = self.inner.queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Reverse(TimerEntry {
            deadline,
            seq,
            continuation,
        }));
        self.inner.condvar.notify_one();
    }
}

fn driver_loop(inner: &TimerInner) {
    let mut due: Vec<TimerEntry> = Vec::new();
    loop {
        {
            let mut queue = inner.queue.lock();
            let now = Instant::now();
            while queue
                .heap
                .peek()
                .is_some_and(|Reverse(entry)| entry.deadline <= now)
            {
                let Reverse(entry) = queue.heap.pop().expect("peeked entry");
                due.push(entry);
            }
            if due.is_empty() {
                match queue.heap.peek() {
                    Some(Reverse(next)) => {
                        let wait = next.deadline.saturating_duration_since(now);
                        inner.condvar.wait_for(&mut queue, wait);
                    }
                    None => inner.condvar.wait(&mut queue),
                }
            }
        }
        // Fire outside the lock; a resume may run user code inline.
        for entry in due.drain(..) {
            let _ = entry.continuation.try_resume(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::Context;
    use std::time::Duration;

    fn entry(deadline: Instant, seq: u64) -> TimerEntry {
        TimerEntry {
            deadline,
            seq,
            continuation: Continuation::new(Context::new(), |_| {}),
        }
    }

    #[test]
    fn orders_by_deadline_then_registration() {
        let base = Instant::now();
        let early = entry(base, 1);
        let late = entry(base + Duration::from_millis(5), 0);
        let tie = entry(base, 2);
        assert!(early < late);
        assert!(early < tie);
        assert!(tie < late);
    }

    #[test]
    fn heap_pops_earliest_first() {
        let base = Instant::now();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(entry(base + Duration::from_millis(2), 0)));
        heap.push(Reverse(entry(base, 1)));
        heap.push(Reverse(entry(base + Duration::from_millis(1), 2)));
        let Reverse(first) = heap.pop().expect("entry");
        assert_eq!(first.seq, 1);
        let Reverse(second) = heap.pop().expect("entry");
        assert_eq!(second.seq, 2);
    }
}
