#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for connection state transitions using loom.
//!
//! These tests exercise `StateCell` without Tokio. `loom` explores
//! interleavings to ensure exactly one concurrent caller wins each
//! transition and that disposal always ends in `Disposed`.

use std::sync::Arc as StdArc;

use loom::{model, sync::Arc, thread};
use wiremux::connection::{ConnectionState, StateCell};

fn connecting() -> StateCell {
    let cell = StateCell::new();
    cell.transition(ConnectionState::Initial, ConnectionState::Connecting)
        .expect("initial transition");
    cell
}

#[test]
fn exactly_one_concurrent_failure_wins() {
    model(|| {
        let cell = Arc::new(connecting());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.fail().is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|handle| handle.join().expect("failing thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(cell.load(), ConnectionState::Failed);
    });
}

#[test]
fn disposal_wins_races_with_failure() {
    model(|| {
        let cell = Arc::new(connecting());
        let failer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let _ = cell.fail();
            })
        };
        let disposer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.dispose())
        };

        failer.join().expect("failing thread panicked");
        let previous = disposer.join().expect("disposing thread panicked");
        assert!(matches!(
            previous,
            Some(ConnectionState::Connecting | ConnectionState::Failed)
        ));
        assert_eq!(cell.load(), ConnectionState::Disposed);
        assert_eq!(cell.dispose(), None);
    });
}

#[test]
fn racing_opens_advance_once() {
    model(|| {
        let cell = Arc::new(StateCell::new());
        let results = StdArc::new(std::sync::Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let results = StdArc::clone(&results);
                thread::spawn(move || {
                    let won = cell
                        .transition(ConnectionState::Initial, ConnectionState::Connecting)
                        .is_ok();
                    results.lock().expect("results lock").push(won);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("opening thread panicked");
        }
        let wins = results
            .lock()
            .expect("results lock")
            .iter()
            .filter(|won| **won)
            .count();
        assert_eq!(wins, 1);
    });
}
