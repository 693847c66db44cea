//! Generator conformance.
//!
//! Lazy demand-driven production, ordering, failure re-raising, and the
//! guarantee that the body never runs ahead of the consumer.

mod common;

use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strand::{generate, Failure, Generator};

#[test]
fn yields_the_values_in_order() {
    init_test_logging();
    let gen = generate(|y| async move {
        y.yield_value(1).await?;
        y.yield_value(2).await?;
        Ok(())
    });
    let values: strand::Result<Vec<i32>> = gen.collect();
    assert_eq!(values.expect("both values"), vec![1, 2]);
}

#[test]
fn the_body_does_not_run_ahead_of_demand() {
    init_test_logging();
    let entries = Arc::new(AtomicUsize::new(0));
    let body_entries = Arc::clone(&entries);
    let mut gen = generate(move |y| async move {
        let mut i: u64 = 0;
        loop {
            body_entries.fetch_add(1, Ordering::SeqCst);
            y.yield_value(i).await?;
            i += 1;
        }
    });
    // Nothing runs before the first pull.
    assert_eq!(entries.load(Ordering::SeqCst), 0);
    for expected in 0..5 {
        assert_eq!(gen.next_value().expect("infinite sequence"), expected);
    }
    // An infinite generator pulled k times passes at most k suspension
    // points.
    assert!(entries.load(Ordering::SeqCst) <= 5);
}

#[test]
fn a_failing_body_reraises_to_the_caller_once() {
    init_test_logging();
    let mut gen = generate(|y| async move {
        y.yield_value(1).await?;
        Err(Failure::error(Boom("generator")))
    });
    assert_eq!(gen.next_value().expect("first value"), 1);
    let failure = gen.has_next().expect_err("failure re-raised");
    assert_eq!(failure.downcast_error::<Boom>(), Some(&Boom("generator")));
    // The generator is terminal afterwards; the failure is not repeated.
    assert!(!gen.has_next().expect("terminal"));
}

#[test]
fn iterating_a_failing_generator_ends_with_the_failure() {
    init_test_logging();
    let gen = generate(|y| async move {
        y.yield_value(1).await?;
        y.yield_value(2).await?;
        Err(Failure::error(Boom("late")))
    });
    let mut values = Vec::new();
    let mut failures = Vec::new();
    for item in gen {
        match item {
            Ok(value) => values.push(value),
            Err(failure) => failures.push(failure),
        }
    }
    assert_eq!(values, vec![1, 2]);
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].downcast_error::<Boom>(),
        Some(&Boom("late"))
    );
}

#[test]
fn an_empty_generator_is_immediately_exhausted() {
    init_test_logging();
    let mut gen: Generator<i32> = generate(|_y| async move { Ok(()) });
    assert!(!gen.has_next().expect("empty body"));
    assert!(gen
        .next_value()
        .expect_err("nothing to produce")
        .usage_error()
        .is_some());
}

#[test]
fn generators_interleave_independently() {
    init_test_logging();
    let mut evens = generate(|y| async move {
        for i in (0..6).step_by(2) {
            y.yield_value(i).await?;
        }
        Ok(())
    });
    let mut odds = generate(|y| async move {
        for i in (1..6).step_by(2) {
            y.yield_value(i).await?;
        }
        Ok(())
    });
    let mut merged = Vec::new();
    loop {
        match (evens.has_next(), odds.has_next()) {
            (Ok(true), _) => merged.push(evens.next_value().expect("even")),
            (_, Ok(true)) => merged.push(odds.next_value().expect("odd")),
            _ => break,
        }
    }
    assert_eq!(merged, vec![0, 2, 4, 1, 3, 5]);
}
