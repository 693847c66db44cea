//! Timed resumption.
//!
//! A single shared driver thread keeps a deadline-ordered heap of armed
//! continuations and fires each through the dispatcher captured at its
//! suspension. [`Cx::delay`](crate::cx::Cx::delay) is the public surface.

mod driver;

pub(crate) use driver::TimerDriver;
