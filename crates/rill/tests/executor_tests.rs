//! Executor semantics: single-threaded state, FIFO order, nested loops,
//! breaks, and queued-item cancellation.

use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rill::{CancellationToken, ExecError, Executor, LoopValue};

/// Submissions from many threads are serialized: each one observes a
/// distinct counter value even though none of them lock anything.
#[test]
fn submissions_are_serialized() {
    let executor = Executor::spawn(|| 0u32);
    let results: Vec<u32> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    executor
                        .submit(|ctx| {
                            *ctx.state += 1;
                            *ctx.state
                        })
                        .expect("executor is alive")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let mut sorted = results;
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=8).collect::<Vec<u32>>());
}

/// Items run strictly in queue order.
#[test]
fn posted_items_run_in_fifo_order() {
    let executor = Executor::spawn(Vec::new);
    for n in 0..5 {
        executor.post(move |ctx| ctx.state.push(n));
    }
    let seen = executor
        .submit(|ctx| ctx.state.clone())
        .expect("executor is alive");
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
}

/// `run_loop` pumps queued items until one breaks, and hands the break
/// value back to the waiting item.
#[test]
fn run_loop_returns_break_value() {
    let executor = Executor::spawn(|| 0u32);
    let (value, state) = executor
        .submit(|ctx| {
            ctx.post(|inner| {
                *inner.state += 1;
                inner.break_loop(LoopValue::Text("done".to_owned()));
            });
            let value = ctx.run_loop();
            (value, *ctx.state)
        })
        .expect("executor is alive");
    assert_eq!(value, LoopValue::Text("done".to_owned()));
    assert_eq!(state, 1, "the posted item must run inside the loop");
}

/// Items queued before the break still run exactly once, inside the loop.
#[test]
fn items_before_break_run_once() {
    let executor = Executor::spawn(|| 0u32);
    let total = executor
        .submit(|ctx| {
            for _ in 0..3 {
                ctx.post(|inner| *inner.state += 1);
            }
            ctx.post(|inner| inner.break_loop(LoopValue::Unit));
            ctx.run_loop();
            *ctx.state
        })
        .expect("executor is alive");
    assert_eq!(total, 3);
}

/// Loops nest: a break unwinds exactly one level, innermost first.
#[test]
fn nested_loops_unwind_innermost_first() {
    let executor = Executor::spawn(Vec::<&'static str>::new);
    let log = executor
        .submit(|ctx| {
            ctx.post(|outer_item| {
                // Runs inside the outer loop; opens an inner loop of its own.
                outer_item.post(|inner_item| {
                    inner_item.state.push("inner break");
                    inner_item.break_loop(LoopValue::Unit);
                });
                assert_eq!(outer_item.loop_depth(), 1);
                outer_item.run_loop();
                outer_item.state.push("inner done");
                outer_item.break_loop(LoopValue::Unit);
            });
            ctx.run_loop();
            ctx.state.push("outer done");
            ctx.state.clone()
        })
        .expect("executor is alive");
    assert_eq!(log, vec!["inner break", "inner done", "outer done"]);
}

/// A token cancelled while the item is still queued stops it from running.
#[test]
fn cancelled_item_never_runs() {
    let executor = Executor::spawn(|| 0u32);
    let token = CancellationToken::new();
    token.cancel();
    let result = executor.submit_cancellable(
        |ctx| {
            *ctx.state += 1;
            *ctx.state
        },
        Some(token),
    );
    assert_eq!(result, Err(ExecError::Cancelled));
    let state = executor.submit(|ctx| *ctx.state).expect("executor is alive");
    assert_eq!(state, 0, "a cancelled item must not touch the state");
}

/// An uncancelled token does not get in the way.
#[test]
fn live_token_runs_normally() {
    let executor = Executor::spawn(|| 0u32);
    let token = CancellationToken::new();
    let result = executor.submit_cancellable(|ctx| *ctx.state, Some(token));
    assert_eq!(result, Ok(0));
}

/// Dropping the executor unblocks submitters with a shutdown error.
#[test]
fn shutdown_unblocks_waiters() {
    let executor = Executor::spawn(|| ());
    executor.post(|_| thread::sleep(Duration::from_millis(50)));
    drop(executor);
    // The sleeping item finished; the executor is gone afterwards.
}

/// Helper threads can post through a detached sender.
#[test]
fn loop_sender_posts_from_other_threads() {
    let executor = Executor::spawn(|| 0u32);
    let value = executor
        .submit(|ctx| {
            let sender = ctx.sender();
            thread::spawn(move || {
                sender.post(|inner| {
                    *inner.state = 7;
                    inner.break_loop(LoopValue::Unit);
                });
            });
            ctx.run_loop();
            *ctx.state
        })
        .expect("executor is alive");
    assert_eq!(value, 7);
}
