// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events and shared state internal to the runner.

use crate::runner::session::SessionState;
use regatta_metadata::{TestId, TestResultRecord};
use std::{
    collections::HashSet,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

/// An event sent from the executor side to the dispatcher.
#[derive(Debug)]
pub(super) enum ExecutorEvent {
    /// A test failed and a single-test rerun will decide its outcome.
    AttemptFailedWillRetry { record: TestResultRecord },

    /// A test reached its authoritative outcome.
    TestFinished { record: TestResultRecord },

    /// A worker session was reaped.
    SessionFinished {
        terminal_state: SessionState,
        infra_failure: bool,
    },

    /// Consecutive infrastructure failures crossed the configured bound.
    InfraExhausted { consecutive: u32 },
}

/// State shared between the unit futures and the partition stream.
///
/// The run is single-threaded, but units observe and flip these flags at
/// interleaved await points, so they are atomics rather than cells.
#[derive(Debug)]
pub(super) struct RunSharedState {
    cancelled: AtomicBool,
    consecutive_infra: AtomicU32,
    max_infra_failures: u32,
    retried: Mutex<HashSet<TestId>>,
}

impl RunSharedState {
    pub(super) fn new(max_infra_failures: u32) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            consecutive_infra: AtomicU32::new(0),
            max_infra_failures,
            retried: Mutex::new(HashSet::new()),
        }
    }

    pub(super) fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Flips the run into draining: the partition stream stops yielding.
    pub(super) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Claims the single isolated rerun for a test. Returns false if the
    /// test was already retried during this run.
    pub(super) fn claim_retry(&self, test: &TestId) -> bool {
        self.retried
            .lock()
            .expect("retry set lock is never poisoned")
            .insert(test.clone())
    }

    /// Records one session's infrastructure health. Returns the consecutive
    /// failure count when it crosses the configured bound, cancelling the
    /// run as a side effect.
    pub(super) fn note_session(&self, infra_failure: bool) -> Option<u32> {
        if !infra_failure {
            self.consecutive_infra.store(0, Ordering::SeqCst);
            return None;
        }
        let count = self.consecutive_infra.fetch_add(1, Ordering::SeqCst) + 1;
        if self.max_infra_failures > 0 && count == self.max_infra_failures {
            self.cancel();
            return Some(count);
        }
        None
    }
}
