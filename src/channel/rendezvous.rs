//! The single-slot rendezvous channel.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      RENDEZVOUS STATE CELL                       │
//! │                                                                  │
//! │                 register_sender(k_s)                             │
//! │          ┌──────────────────────────▶ SenderRegistered(k_s)      │
//! │          │                                   │ send(v, k_s')     │
//! │          │                                   ▼                   │
//! │        Empty ──── send(v, k_s) ─────▶ SenderWaiting(v, k_s)      │
//! │          │                                   │ receive(k_r)      │
//! │          │                                   ▼                   │
//! │          │◀───── handoff: k_r gets v, k_s resumes ───────────────│
//! │          │                                                       │
//! │          └──── receive(k_r) ────────▶ ReceiverWaiting(k_r)       │
//! │                                              │ send(v, k_s)      │
//! │                                              ▼                   │
//! │           handoff: k_r gets v, k_s resumes ──▶ Empty             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each operation performs one atomic transition of the state cell, so for
//! any concurrent `(send, receive)` pair exactly one side observes the
//! other's parked continuation and performs the handoff; the loser sees
//! the post-handoff state. Continuations are always resumed outside the
//! cell lock, because a resume may run user code inline.
//!
//! A second concurrent sender or receiver is a misuse: the exceptional
//! entry point of its continuation fires exactly once and the cell is left
//! unchanged.

use crate::cx::Cx;
use crate::error::{Failure, Result, UsageError};
use crate::runtime::{Continuation, SuspendResult};
use crate::tracing_compat::trace;
use core::fmt;
use std::sync::{Arc, Mutex};

enum Cell<T> {
    /// No party waiting.
    Empty,
    /// A producer announced intent but has not yet produced a value.
    SenderRegistered(Continuation<()>),
    /// A producer has produced a value and is parked.
    SenderWaiting(T, Continuation<()>),
    /// A consumer is parked waiting for a value.
    ReceiverWaiting(Continuation<T>),
}

impl<T> Cell<T> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::SenderRegistered(_) => "SenderRegistered",
            Self::SenderWaiting(..) => "SenderWaiting",
            Self::ReceiverWaiting(_) => "ReceiverWaiting",
        }
    }
}

/// A single-slot rendezvous channel.
///
/// Hands one value at a time from one producer to one consumer. The
/// continuation-passing primitives ([`send`](Self::send),
/// [`receive`](Self::receive), [`register_sender`](Self::register_sender))
/// never block; the suspendable wrappers ([`send_value`](Self::send_value),
/// [`recv`](Self::recv), [`reserve`](Self::reserve)) park the calling
/// coroutine and resolve it toward Cancellation if its job is cancelled
/// while parked.
///
/// Cheaply clonable; clones refer to the same cell.
pub struct Rendezvous<T> {
    cell: Arc<Mutex<Cell<T>>>,
}

impl<T> Clone for Rendezvous<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Rendezvous<T> {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(Cell::Empty)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cell<T>> {
        self.cell.lock().expect("rendezvous cell lock poisoned")
    }
}

impl<T: Send + 'static> Rendezvous<T> {
    /// Announces a producer's intent to send, without a value.
    ///
    /// `k` resumes once a receiver is waiting (immediately if one already
    /// is); the producer is then expected to compute its value and call
    /// [`send`](Self::send). If a sender already occupies the cell, `k`'s
    /// exceptional entry point fires with [`UsageError::SenderBusy`] and
    /// the cell is unchanged.
    pub fn register_sender(&self, k: Continuation<()>) {
        let ready = {
            let mut cell = self.lock();
            match std::mem::replace(&mut *cell, Cell::Empty) {
                Cell::Empty => {
                    *cell = Cell::SenderRegistered(k);
                    return;
                }
                Cell::ReceiverWaiting(k_r) => {
                    // Receiver already waits; the sender proceeds at once.
                    *cell = Cell::ReceiverWaiting(k_r);
                    Ok(k)
                }
                occupied => {
                    *cell = occupied;
                    Err(k)
                }
            }
        };
        match ready {
            Ok(k) => k.resume(()),
            Err(k) => k.resume_with_failure(Failure::usage(UsageError::SenderBusy)),
        }
    }

    /// Offers `v`, parking `k` until a receiver takes it.
    ///
    /// If a receiver is already waiting the handoff happens immediately:
    /// the receiver resumes with `v`, then `k` resumes. A sender upgrading
    /// its own registration replaces it. If another sender's value is
    /// already parked, `k`'s exceptional entry point fires with
    /// [`UsageError::SenderBusy`] and the cell is unchanged.
    pub fn send(&self, value: T, k: Continuation<()>) {
        enum Action<T> {
            Parked,
            HandOff(Continuation<T>, T, Continuation<()>),
            Busy(Continuation<()>),
        }
        let action = {
            let mut cell = self.lock();
            trace!("rendezvous send in state {}", cell.name());
            match std::mem::replace(&mut *cell, Cell::Empty) {
                Cell::Empty => {
                    *cell = Cell::SenderWaiting(value, k);
                    Action::Parked
                }
                // The same sender upgrading its registration to a value.
                Cell::SenderRegistered(registration) => {
                    registration.disarm();
                    *cell = Cell::SenderWaiting(value, k);
                    Action::Parked
                }
                Cell::ReceiverWaiting(k_r) => Action::HandOff(k_r, value, k),
                occupied @ Cell::SenderWaiting(..) => {
                    *cell = occupied;
                    Action::Busy(k)
                }
            }
        };
        match action {
            Action::Parked => {}
            Action::HandOff(k_r, value, k_s) => {
                k_r.resume(value);
                k_s.resume(());
            }
            Action::Busy(k) => k.resume_with_failure(Failure::usage(UsageError::SenderBusy)),
        }
    }

    /// Requests a value, parking `k` until a sender provides one.
    ///
    /// If a sender's value is parked the handoff happens immediately. If a
    /// sender has only registered, it is resumed to go produce its value
    /// and the request is retried. If another receiver is already parked,
    /// `k`'s exceptional entry point fires with
    /// [`UsageError::ReceiverBusy`] and the cell is unchanged.
    pub fn receive(&self, k: Continuation<T>) {
        enum Action<T> {
            Parked,
            HandOff(Continuation<T>, T, Continuation<()>),
            SenderPending(Continuation<T>, Continuation<()>),
            Busy(Continuation<T>),
        }
        let mut k = k;
        loop {
            let action = {
                let mut cell = self.lock();
                trace!("rendezvous receive in state {}", cell.name());
                match std::mem::replace(&mut *cell, Cell::Empty) {
                    Cell::Empty => {
                        *cell = Cell::ReceiverWaiting(k);
                        Action::Parked
                    }
                    Cell::SenderWaiting(value, k_s) => Action::HandOff(k, value, k_s),
                    // Wake the registered sender, then re-examine the cell:
                    // this is the retry step of the state machine.
                    Cell::SenderRegistered(k_s) => Action::SenderPending(k, k_s),
                    occupied @ Cell::ReceiverWaiting(_) => {
                        *cell = occupied;
                        Action::Busy(k)
                    }
                }
            };
            match action {
                Action::Parked => return,
                Action::HandOff(k_r, value, k_s) => {
                    k_r.resume(value);
                    k_s.resume(());
                    return;
                }
                Action::SenderPending(k_r, k_s) => {
                    k_s.resume(());
                    k = k_r;
                }
                Action::Busy(k_r) => {
                    k_r.resume_with_failure(Failure::usage(UsageError::ReceiverBusy));
                    return;
                }
            }
        }
    }

    /// Takes a parked value without blocking, if one is present.
    ///
    /// Resumes the sender on success. A merely registered sender is left
    /// untouched.
    pub fn try_recv(&self) -> Option<T> {
        let taken = {
            let mut cell = self.lock();
            match std::mem::replace(&mut *cell, Cell::Empty) {
                Cell::SenderWaiting(value, k_s) => Some((value, k_s)),
                other => {
                    *cell = other;
                    None
                }
            }
        };
        taken.map(|(value, k_s)| {
            k_s.resume(());
            value
        })
    }

    /// Suspends until a receiver is ready for this producer.
    ///
    /// The suspendable form of [`register_sender`](Self::register_sender):
    /// resumes once a receiver arrives, after which the producer computes
    /// its value and calls [`send_value`](Self::send_value).
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::SenderBusy`] if a sender already occupies the
    /// cell, or [`Failure::Cancelled`] if the job is cancelled while
    /// parked.
    pub async fn reserve(&self, cx: &Cx) -> Result<()> {
        let chan = self.clone();
        let evict = self.clone();
        cx.suspend_with(
            move |k: Continuation<()>| {
                chan.register_sender(k);
                SuspendResult::Suspended
            },
            move |k, reason| {
                evict.evict_sender(k);
                let _ = k.try_fail(Failure::cancelled(reason));
            },
        )
        .await
    }

    /// Suspends until a receiver takes `value`.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::SenderBusy`] if another sender's value is
    /// already parked, or [`Failure::Cancelled`] if the job is cancelled
    /// while parked (the undelivered value is dropped).
    pub async fn send_value(&self, cx: &Cx, value: T) -> Result<()> {
        let chan = self.clone();
        let evict = self.clone();
        cx.suspend_with(
            move |k: Continuation<()>| {
                chan.send(value, k);
                SuspendResult::Suspended
            },
            move |k, reason| {
                evict.evict_sender(k);
                let _ = k.try_fail(Failure::cancelled(reason));
            },
        )
        .await
    }

    /// Suspends until a sender hands over a value.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::ReceiverBusy`] if another receiver is already
    /// parked, or [`Failure::Cancelled`] if the job is cancelled while
    /// parked.
    pub async fn recv(&self, cx: &Cx) -> Result<T> {
        let chan = self.clone();
        let evict = self.clone();
        cx.suspend_with(
            move |k: Continuation<T>| {
                chan.receive(k);
                SuspendResult::Suspended
            },
            move |k, reason| {
                evict.evict_receiver(k);
                let _ = k.try_fail(Failure::cancelled(reason));
            },
        )
        .await
    }

    /// Removes a cancelled sender's continuation from the cell.
    fn evict_sender(&self, k: &Continuation<()>) {
        let mut cell = self.lock();
        match std::mem::replace(&mut *cell, Cell::Empty) {
            Cell::SenderRegistered(parked) if parked.same(k) => {}
            Cell::SenderWaiting(_, ref parked) if parked.same(k) => {}
            other => *cell = other,
        }
    }

    /// Removes a cancelled receiver's continuation from the cell.
    fn evict_receiver(&self, k: &Continuation<T>) {
        let mut cell = self.lock();
        match std::mem::replace(&mut *cell, Cell::Empty) {
            Cell::ReceiverWaiting(parked) if parked.same(k) => {}
            other => *cell = other,
        }
    }
}

impl<T> fmt::Debug for Rendezvous<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.lock().map_or("poisoned", |cell| cell.name());
        f.debug_struct("Rendezvous").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cx::Context;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn value_probe() -> (Continuation<i32>, Arc<Mutex<Vec<Result<i32>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let k = Continuation::new(Context::new(), move |result| {
            sink.lock().expect("probe lock").push(result);
        });
        (k, seen)
    }

    fn unit_probe() -> (Continuation<()>, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&fired);
        let k = Continuation::new(Context::new(), move |result| {
            assert!(result.is_ok());
            count.fetch_add(1, Ordering::SeqCst);
        });
        (k, fired)
    }

    #[test]
    fn send_then_receive_hands_off() {
        let chan = Rendezvous::new();
        let (k_s, sender_fired) = unit_probe();
        chan.send(42, k_s);
        assert_eq!(sender_fired.load(Ordering::SeqCst), 0);

        let (k_r, received) = value_probe();
        chan.receive(k_r);
        assert_eq!(sender_fired.load(Ordering::SeqCst), 1);
        let received = received.lock().expect("probe lock");
        assert!(matches!(received.as_slice(), [Ok(42)]));
    }

    #[test]
    fn receive_then_send_hands_off() {
        let chan = Rendezvous::new();
        let (k_r, received) = value_probe();
        chan.receive(k_r);
        assert!(received.lock().expect("probe lock").is_empty());

        let (k_s, sender_fired) = unit_probe();
        chan.send(7, k_s);
        assert_eq!(sender_fired.load(Ordering::SeqCst), 1);
        let received = received.lock().expect("probe lock");
        assert!(matches!(received.as_slice(), [Ok(7)]));
    }

    #[test]
    fn registered_sender_resumes_when_receiver_arrives() {
        let chan: Rendezvous<i32> = Rendezvous::new();
        let (k_s, sender_ready) = unit_probe();
        chan.register_sender(k_s);
        assert_eq!(sender_ready.load(Ordering::SeqCst), 0);

        // Receiver arrival wakes the sender and parks the receiver's
        // request; the cell returns to Empty and then ReceiverWaiting.
        let (k_r, received) = value_probe();
        chan.receive(k_r);
        assert_eq!(sender_ready.load(Ordering::SeqCst), 1);
        assert!(received.lock().expect("probe lock").is_empty());

        let (k_s2, sender_fired) = unit_probe();
        chan.send(9, k_s2);
        assert_eq!(sender_fired.load(Ordering::SeqCst), 1);
        let received = received.lock().expect("probe lock");
        assert!(matches!(received.as_slice(), [Ok(9)]));
    }

    #[test]
    fn register_against_waiting_receiver_resumes_immediately() {
        let chan: Rendezvous<i32> = Rendezvous::new();
        let (k_r, received) = value_probe();
        chan.receive(k_r);

        let (k_s, sender_ready) = unit_probe();
        chan.register_sender(k_s);
        assert_eq!(sender_ready.load(Ordering::SeqCst), 1);
        // The receiver still waits for the actual value.
        assert!(received.lock().expect("probe lock").is_empty());
    }

    #[test]
    fn second_sender_fails_and_cell_is_unchanged() {
        let chan = Rendezvous::new();
        let (k_s, first_fired) = unit_probe();
        chan.send(1, k_s);

        let failures = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&failures);
        let k_second = Continuation::new(Context::new(), move |result: Result<()>| {
            let failure = result.expect_err("second sender must fail");
            assert_eq!(failure.usage_error(), Some(&UsageError::SenderBusy));
            sink.fetch_add(1, Ordering::SeqCst);
        });
        chan.send(2, k_second);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        // The original value is still there for a receiver.
        let (k_r, received) = value_probe();
        chan.receive(k_r);
        assert_eq!(first_fired.load(Ordering::SeqCst), 1);
        let received = received.lock().expect("probe lock");
        assert!(matches!(received.as_slice(), [Ok(1)]));
    }

    #[test]
    fn second_receiver_fails_and_cell_is_unchanged() {
        let chan: Rendezvous<i32> = Rendezvous::new();
        let (k_r, received) = value_probe();
        chan.receive(k_r);

        let failures = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&failures);
        let k_second = Continuation::new(Context::new(), move |result: Result<i32>| {
            let failure = result.expect_err("second receiver must fail");
            assert_eq!(failure.usage_error(), Some(&UsageError::ReceiverBusy));
            sink.fetch_add(1, Ordering::SeqCst);
        });
        chan.receive(k_second);
        assert_eq!(failures.load(Ordering::SeqCst), 1);

        let (k_s, _) = unit_probe();
        chan.send(3, k_s);
        let received = received.lock().expect("probe lock");
        assert!(matches!(received.as_slice(), [Ok(3)]));
    }

    #[test]
    fn try_recv_takes_only_parked_values() {
        let chan: Rendezvous<i32> = Rendezvous::new();
        assert_eq!(chan.try_recv(), None);

        let (k_s, registered) = unit_probe();
        chan.register_sender(k_s);
        // A registration carries no value.
        assert_eq!(chan.try_recv(), None);
        assert_eq!(registered.load(Ordering::SeqCst), 0);

        // Upgrade to a real value.
        let (k_s2, sender_fired) = unit_probe();
        chan.send(5, k_s2);
        assert_eq!(chan.try_recv(), Some(5));
        assert_eq!(sender_fired.load(Ordering::SeqCst), 1);
    }
}
