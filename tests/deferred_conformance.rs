//! Deferred value conformance.
//!
//! Round-trips, failure re-raising, repeated awaits, cancellation of the
//! deferred job, and the policy that an unobserved failure still cancels
//! the parent.

mod common;

use common::*;
use std::sync::Arc;
use strand::{run_scope, Context, Failure, ManualDispatcher, Rendezvous};

#[test]
fn deferred_round_trip() {
    init_test_logging();
    let result = run_scope(Context::new(), |cx| async move {
        let deferred = cx.defer(Context::new(), |_cx| async move { Ok(42) })?;
        deferred.await_value(&cx).await
    });
    assert_eq!(result.expect("round trip"), 42);
}

#[test]
fn deferred_round_trip_with_an_interleaved_yield() {
    init_test_logging();
    let result = run_scope(Context::new(), |cx| async move {
        let deferred = cx.defer(Context::new(), |cx| async move {
            cx.yield_now().await?;
            Ok(42)
        })?;
        deferred.await_value(&cx).await
    });
    assert_eq!(result.expect("round trip"), 42);
}

#[test]
fn deferred_round_trip_under_manual_dispatch() {
    init_test_logging();
    let dispatcher = Arc::new(ManualDispatcher::new());
    let result = run_scope_stepped(dispatcher, |cx| async move {
        let deferred = cx.defer(Context::new(), |cx| async move {
            cx.yield_now().await?;
            Ok(7)
        })?;
        // The deferred body has not run yet; the await parks until it has.
        deferred.await_value(&cx).await
    });
    assert_eq!(result.expect("round trip"), 7);
}

#[test]
fn deferred_failure_is_reraised_by_await() {
    init_test_logging();
    let result: strand::Result<()> = run_scope(Context::new(), |cx| async move {
        let deferred = cx.defer(Context::new(), |_cx| async move {
            Err::<i32, _>(Failure::error(Boom("deferred")))
        })?;
        let failure = deferred
            .await_value(&cx)
            .await
            .expect_err("failure re-raised");
        assert_eq!(failure.downcast_error::<Boom>(), Some(&Boom("deferred")));
        Ok(())
    });
    // The unhandled child failure also cancelled the scope; the root
    // re-raises the original cause.
    let failure = result.expect_err("scope cancelled by the deferred failure");
    assert_eq!(failure.downcast_error::<Boom>(), Some(&Boom("deferred")));
}

#[test]
fn unobserved_deferred_failure_still_cancels_the_parent() {
    init_test_logging();
    let result: strand::Result<()> = run_scope(Context::new(), |cx| async move {
        let _unobserved = cx.defer(Context::new(), |_cx| async move {
            Err::<i32, _>(Failure::error(Boom("never awaited")))
        })?;
        let after = cx.yield_now().await;
        assert!(after.expect_err("parent is cancelling").is_cancelled());
        Ok(())
    });
    let failure = result.expect_err("scope terminates exceptionally");
    assert_eq!(
        failure.downcast_error::<Boom>(),
        Some(&Boom("never awaited"))
    );
}

#[test]
fn awaiting_twice_observes_the_same_value() {
    init_test_logging();
    let result = run_scope(Context::new(), |cx| async move {
        let deferred = cx.defer(Context::new(), |_cx| async move { Ok(5) })?;
        let first = deferred.await_value(&cx).await?;
        let second = deferred.await_value(&cx).await?;
        Ok((first, second))
    });
    assert_eq!(result.expect("both awaits"), (5, 5));
}

#[test]
fn awaiting_a_cancelled_deferred_raises_cancellation() {
    init_test_logging();
    let result = run_scope(Context::new(), |cx| async move {
        let chan: Rendezvous<i32> = Rendezvous::new();
        let deferred_chan = chan.clone();
        let deferred = cx.defer(Context::new(), move |cx| async move {
            deferred_chan.recv(&cx).await
        })?;
        deferred.job().cancel();
        let failure = deferred
            .await_value(&cx)
            .await
            .expect_err("deferred was cancelled");
        assert!(failure.is_cancelled());
        // Cancellation of a child does not disturb the scope.
        assert!(cx.job().expect("scope job").is_active());
        Ok(())
    });
    result.expect("scope completes");
}
