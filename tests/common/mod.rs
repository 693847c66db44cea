#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;

use strand::{run_scope, Context, Cx, ManualDispatcher};

static INIT_LOGGING: Once = Once::new();

/// Initializes a tracing subscriber once per test binary.
///
/// Controlled by `RUST_LOG`; a no-op unless the crate is built with the
/// `tracing-integration` feature.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Asserts that checkpoints are hit exactly in the order 1, 2, 3, …
#[derive(Debug, Default)]
pub struct StepTracker {
    current: AtomicUsize,
}

impl StepTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records checkpoint `step`, asserting it directly follows the
    /// previous one.
    pub fn expect(&self, step: usize) {
        let previous = self.current.swap(step, Ordering::SeqCst);
        assert_eq!(
            previous + 1,
            step,
            "checkpoint {step} reached after checkpoint {previous}"
        );
    }

    /// The highest checkpoint recorded so far.
    pub fn total(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

/// A test error with a recognizable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boom(pub &'static str);

impl fmt::Display for Boom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boom: {}", self.0)
    }
}

impl std::error::Error for Boom {}

/// Runs a scope whose tasks all go to `dispatcher`, pumping the dispatcher
/// from the test thread while the scope blocks on a background thread.
///
/// Task order is the dispatcher's FIFO order, so the interleaving is
/// deterministic.
pub fn run_scope_stepped<T, F, Fut>(
    dispatcher: Arc<ManualDispatcher>,
    block: F,
) -> strand::Result<T>
where
    T: Send + 'static,
    F: FnOnce(Cx) -> Fut + Send + 'static,
    Fut: Future<Output = strand::Result<T>> + Send + 'static,
{
    let context = Context::new().with_dispatcher(dispatcher.clone());
    let scope = thread::spawn(move || run_scope(context, block));
    while !scope.is_finished() {
        if !dispatcher.run_one() {
            thread::yield_now();
        }
    }
    scope.join().expect("scope thread panicked")
}
