// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test result records reported by worker processes.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt, process::ExitStatus, time::Duration};

/// Identifier for a single named test.
///
/// Test names are short and repeated throughout a run, so they are stored
/// interned.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a new test identifier.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self(name.into())
    }

    /// Returns the test name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The kind of outcome a single test execution produced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// The test ran to completion and passed.
    Passed,

    /// The test ran to completion and failed.
    Failed,

    /// The test was skipped by the worker (unsupported platform, missing
    /// resource from the allow-list, or an explicit skip).
    Skipped,

    /// The test nominally passed but left shared global state mutated.
    EnvChanged,

    /// Synthesized by the controller: the worker session missed its
    /// deadline before this test resolved.
    Timeout,

    /// Synthesized by the controller: the worker exited before producing a
    /// well-formed record for this test.
    Crashed,
}

impl OutcomeKind {
    /// Returns true if this outcome counts against the run.
    ///
    /// [`EnvChanged`](Self::EnvChanged) is not a failure by itself; whether
    /// it fails the run depends on the run's configuration.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Timeout | Self::Crashed)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::EnvChanged => "env-changed",
            Self::Timeout => "timeout",
            Self::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// How a worker process exited.
///
/// On unix, a process killed by a signal has no exit code; exactly one of
/// the two fields is populated in that case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExitSummary {
    /// The exit code, if the process exited normally.
    pub code: Option<i32>,

    /// The signal that terminated the process, on unix.
    pub signal: Option<i32>,
}

impl ExitSummary {
    /// Summary for a process that was forcibly terminated by the controller.
    pub fn terminated() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }
}

impl From<ExitStatus> for ExitSummary {
    fn from(status: ExitStatus) -> Self {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::process::ExitStatusExt;
                Self {
                    code: status.code(),
                    signal: status.signal(),
                }
            } else {
                Self {
                    code: status.code(),
                    signal: None,
                }
            }
        }
    }
}

impl fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "terminated"),
        }
    }
}

/// One structured result record, transmitted over the result channel as a
/// worker finishes each test.
///
/// Records synthesized by the controller (timeouts, crashes) use the same
/// shape so the aggregator sees a single stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResultRecord {
    /// The test this record is for.
    pub test: TestId,

    /// The outcome kind.
    pub kind: OutcomeKind,

    /// How long the test (or the session, for synthesized records) ran.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Captured diagnostic text: test output, a failure message, or the
    /// reason for a synthesized outcome.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,

    /// Names of shared global resources the test touched, as reported by
    /// the worker's environment inspection. Non-empty for
    /// [`OutcomeKind::EnvChanged`] records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources_touched: Vec<SmolStr>,

    /// Allocation-delta samples, present when leak hunting is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refleak_samples: Option<Vec<i64>>,

    /// How the worker exited, for crash records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitSummary>,
}

impl TestResultRecord {
    /// Creates a record with no diagnostic payload.
    pub fn new(test: TestId, kind: OutcomeKind, duration: Duration) -> Self {
        Self {
            test,
            kind,
            duration,
            output: String::new(),
            resources_touched: Vec::new(),
            refleak_samples: None,
            exit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(OutcomeKind::Passed, false; "passed is not a failure")]
    #[test_case(OutcomeKind::Skipped, false; "skipped is not a failure")]
    #[test_case(OutcomeKind::EnvChanged, false; "env-changed is not a failure by itself")]
    #[test_case(OutcomeKind::Failed, true; "failed is a failure")]
    #[test_case(OutcomeKind::Timeout, true; "timeout is a failure")]
    #[test_case(OutcomeKind::Crashed, true; "crashed is a failure")]
    fn outcome_failure_classification(kind: OutcomeKind, is_failure: bool) {
        assert_eq!(kind.is_failure(), is_failure);
    }

    #[test]
    fn record_serialization_elides_empty_fields() {
        let record = TestResultRecord::new(
            "test_os".into(),
            OutcomeKind::Passed,
            Duration::from_millis(1500),
        );
        let json = serde_json::to_value(&record).expect("record serializes");
        let obj = json.as_object().expect("record is an object");
        assert!(!obj.contains_key("output"));
        assert!(!obj.contains_key("resources_touched"));
        assert!(!obj.contains_key("refleak_samples"));
        assert!(!obj.contains_key("exit"));

        let back: TestResultRecord = serde_json::from_value(json).expect("record deserializes");
        assert_eq!(back, record);
    }

    #[test]
    fn crash_record_round_trips_exit_summary() {
        let mut record = TestResultRecord::new(
            "test_signal".into(),
            OutcomeKind::Crashed,
            Duration::from_secs(2),
        );
        record.exit = Some(ExitSummary {
            code: None,
            signal: Some(11),
        });
        record.output = "worker exited before reporting".to_owned();

        let json = serde_json::to_string(&record).expect("record serializes");
        let back: TestResultRecord = serde_json::from_str(&json).expect("record deserializes");
        assert_eq!(back, record);
        assert_eq!(back.exit.expect("exit present").to_string(), "signal 11");
    }
}
