// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for timing runs and sessions.
//!
//! Pairs a realtime clock (for report timestamps) with a monotonic clock
//! (for durations), captured imperceptibly close together at start.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart {
        start_time: Local::now(),
        instant: Instant::now(),
    }
}

/// A running stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    pub(crate) fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

/// A finished measurement.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_duration_is_monotonic() {
        let start = stopwatch();
        std::thread::sleep(Duration::from_millis(10));
        let first = start.snapshot();
        std::thread::sleep(Duration::from_millis(10));
        let second = start.snapshot();

        assert!(first.duration >= Duration::from_millis(10));
        assert!(second.duration > first.duration);
        assert_eq!(first.start_time, second.start_time);
    }
}
