//! Shared test utilities for replication and integration tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - Helpers for waiting on replicated state

#![allow(dead_code)]

pub mod containers;

pub use containers::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// How long any single replication step may take in tests.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until the watched state satisfies `check`.
pub async fn wait_for_state<S>(mut rx: watch::Receiver<S>, check: impl FnMut(&S) -> bool) {
    tokio::time::timeout(SETTLE_TIMEOUT, rx.wait_for(check))
        .await
        .expect("state did not settle in time")
        .expect("replica dropped while waiting");
}

/// Poll `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Collects every value a listener is called with.
#[derive(Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A listener callback that records into this recorder.
    pub fn listener<S>(&self, map: impl Fn(&S) -> T + Send + Sync + 'static) -> impl Fn(&S) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |state: &S| seen.lock().unwrap().push(map(state))
    }

    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}
