//! Synchronization primitives built on continuations.
//!
//! - [`Rendezvous`]: a single-slot channel pairing one producer with one
//!   consumer, with correct wakeup of whichever side arrives first.

mod rendezvous;

pub use rendezvous::Rendezvous;
