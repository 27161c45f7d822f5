// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Merging per-worker results into one report.
//!
//! Outcomes arrive in completion order from many concurrent sessions; the
//! aggregator reconstructs a deterministic, input-order report regardless.
//! Rerun outcomes are authoritative and handled upstream, so by the time a
//! record reaches the aggregator it is final. In a forever run the same
//! test resolves many times; the worst observed outcome wins.

use crate::errors::WriteReportError;
use crate::runspec::JobCount;
use camino::Utf8Path;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestRerun, TestSuite};
use regatta_metadata::{OutcomeKind, RunExitCode, TestId, TestResultRecord};
use std::{collections::HashMap, fs::File, time::Duration};

/// Running tally of final outcomes.
///
/// Counts are per execution: in a forever run the same test contributes
/// once per cycle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// Total final outcomes observed.
    pub executed: usize,

    /// Tests that passed.
    pub passed: usize,

    /// Tests that failed.
    pub failed: usize,

    /// Tests that were skipped.
    pub skipped: usize,

    /// Tests that passed but mutated shared state.
    pub env_changed: usize,

    /// Tests synthesized as timed out.
    pub timed_out: usize,

    /// Tests synthesized as crashed.
    pub crashed: usize,
}

impl RunStats {
    pub(crate) fn record(&mut self, kind: OutcomeKind) {
        self.executed += 1;
        match kind {
            OutcomeKind::Passed => self.passed += 1,
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::EnvChanged => self.env_changed += 1,
            OutcomeKind::Timeout => self.timed_out += 1,
            OutcomeKind::Crashed => self.crashed += 1,
        }
    }

    /// Returns true if any unrecovered failure was recorded.
    pub fn any_failure(&self) -> bool {
        self.failed + self.timed_out + self.crashed > 0
    }
}

/// Why the run stopped scheduling new sessions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// An interrupt or termination signal arrived.
    Interrupt,

    /// Fail-fast stopped the run after the first unrecovered failure.
    FailFast,

    /// Worker infrastructure failed too many times in a row.
    SchedulingExhausted,
}

/// An event produced while a run executes.
///
/// Events are produced by the [`Runner`](crate::runner::Runner) and handed
/// to the caller's callback in completion order.
#[derive(Clone, Debug)]
pub enum RunEvent {
    /// The run started.
    RunStarted {
        /// Scheduling units required to cover the run.
        job_count: JobCount,

        /// Concurrent worker sessions the pool allows.
        pool_size: usize,
    },

    /// A test failed and a single-test rerun will decide its outcome.
    TestAttemptFailedWillRetry {
        /// The failing attempt. Never reaches the final report directly.
        record: TestResultRecord,
    },

    /// A test reached its final outcome.
    TestFinished {
        /// The authoritative record.
        record: TestResultRecord,
    },

    /// A worker session reached a terminal state and was reaped.
    SessionFinished {
        /// False if the session produced no well-formed record.
        clean: bool,
    },

    /// The run began draining: no new sessions will be launched.
    CancelStarted {
        /// Why.
        reason: CancelReason,
    },

    /// The run finished and the report is being assembled.
    RunFinished {
        /// Final tallies.
        stats: RunStats,

        /// Wall-clock duration of the run.
        elapsed: Duration,
    },
}

fn severity(kind: OutcomeKind) -> u8 {
    match kind {
        OutcomeKind::Passed => 0,
        OutcomeKind::Skipped => 1,
        OutcomeKind::EnvChanged => 2,
        OutcomeKind::Failed => 3,
        OutcomeKind::Timeout => 4,
        OutcomeKind::Crashed => 5,
    }
}

/// Accumulates final records during a run and assembles the [`RunReport`].
#[derive(Debug, Default)]
pub(crate) struct RunAggregator {
    stats: RunStats,
    outcomes: IndexMap<TestId, TestResultRecord>,
    attempts: HashMap<TestId, Vec<TestResultRecord>>,
}

impl RunAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stats(&self) -> RunStats {
        self.stats
    }

    /// Records a failing attempt that a rerun superseded.
    pub(crate) fn record_attempt(&mut self, record: TestResultRecord) {
        self.attempts
            .entry(record.test.clone())
            .or_default()
            .push(record);
    }

    /// Records a final outcome. Worst observed wins across repeats.
    pub(crate) fn record_final(&mut self, record: TestResultRecord) {
        self.stats.record(record.kind);
        match self.outcomes.entry(record.test.clone()) {
            indexmap::map::Entry::Occupied(mut entry) => {
                if severity(record.kind) > severity(entry.get().kind) {
                    entry.insert(record);
                }
            }
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
    }

    pub(crate) fn into_report(
        self,
        input_order: &[TestId],
        fail_env_changed: bool,
        interrupted: Option<CancelReason>,
        start_time: DateTime<Local>,
        duration: Duration,
    ) -> RunReport {
        let mut failed = Vec::new();
        let mut env_changed = Vec::new();
        let mut outcomes = Vec::with_capacity(self.outcomes.len());

        for test in input_order {
            let Some(record) = self.outcomes.get(test) else {
                continue;
            };
            if record.kind.is_failure() {
                failed.push(test.clone());
            } else if record.kind == OutcomeKind::EnvChanged {
                env_changed.push(test.clone());
            }
            outcomes.push(record.clone());
        }

        RunReport {
            stats: self.stats,
            failed,
            env_changed,
            interrupted,
            fail_env_changed,
            start_time,
            duration,
            outcomes,
            attempts: self.attempts,
        }
    }
}

/// The final, input-ordered report of one run.
#[derive(Clone, Debug)]
pub struct RunReport {
    stats: RunStats,
    failed: Vec<TestId>,
    env_changed: Vec<TestId>,
    interrupted: Option<CancelReason>,
    fail_env_changed: bool,
    start_time: DateTime<Local>,
    duration: Duration,
    outcomes: Vec<TestResultRecord>,
    attempts: HashMap<TestId, Vec<TestResultRecord>>,
}

impl RunReport {
    /// Final tallies.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Failing test names, in input order.
    pub fn failed(&self) -> &[TestId] {
        &self.failed
    }

    /// Environment-changed test names, in input order. Populated whether or
    /// not the run treats them as failures.
    pub fn env_changed(&self) -> &[TestId] {
        &self.env_changed
    }

    /// Why the run drained early, if it did.
    pub fn interrupted(&self) -> Option<CancelReason> {
        self.interrupted
    }

    /// Final records, in input order.
    pub fn outcomes(&self) -> &[TestResultRecord] {
        &self.outcomes
    }

    /// When the run started.
    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True when nothing failed: no unresolved failures, no environment
    /// changes (when they count), nothing interrupted, and at least one
    /// test actually ran.
    pub fn success(&self) -> bool {
        self.interrupted.is_none()
            && self.failed.is_empty()
            && (!self.fail_env_changed || self.env_changed.is_empty())
            && self.stats.executed > 0
    }

    /// The process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        match self.interrupted {
            Some(CancelReason::SchedulingExhausted) => RunExitCode::INFRASTRUCTURE_FAILED,
            Some(CancelReason::Interrupt | CancelReason::FailFast) => RunExitCode::INTERRUPTED,
            None => {
                if !self.failed.is_empty() {
                    RunExitCode::TEST_RUN_FAILED
                } else if self.fail_env_changed && !self.env_changed.is_empty() {
                    RunExitCode::ENV_CHANGED
                } else if self.stats.executed == 0 {
                    RunExitCode::NO_TESTS_RAN
                } else {
                    RunExitCode::OK
                }
            }
        }
    }

    /// Renders the report as JUnit XML at `path`.
    ///
    /// One testcase per test; superseded rerun attempts are attached to
    /// their test's case.
    pub fn write_junit(&self, path: &Utf8Path) -> Result<(), WriteReportError> {
        let report = self.render_junit();
        let file = File::create(path).map_err(|source| WriteReportError::Io {
            path: path.to_owned(),
            source,
        })?;
        report
            .serialize(file)
            .map_err(|source| WriteReportError::Junit {
                path: path.to_owned(),
                source,
            })?;
        Ok(())
    }

    fn render_junit(&self) -> Report {
        let mut report = Report::new("regatta-run");
        report
            .set_timestamp(self.start_time)
            .set_time(self.duration);

        let mut suite = TestSuite::new("regatta");
        for record in &self.outcomes {
            let mut status = match record.kind {
                OutcomeKind::Passed => TestCaseStatus::success(),
                OutcomeKind::Skipped => TestCaseStatus::skipped(),
                OutcomeKind::EnvChanged => {
                    if self.fail_env_changed {
                        let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                        status.set_type("environment-changed");
                        status
                    } else {
                        TestCaseStatus::success()
                    }
                }
                OutcomeKind::Failed => {
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                    status.set_type("failure");
                    status
                }
                OutcomeKind::Timeout => {
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                    status.set_type("timeout");
                    status
                }
                OutcomeKind::Crashed => {
                    let mut status = TestCaseStatus::non_success(NonSuccessKind::Error);
                    status.set_type("crash");
                    status
                }
            };

            if let Some(attempts) = self.attempts.get(&record.test) {
                for attempt in attempts {
                    let mut rerun = TestRerun::new(NonSuccessKind::Failure);
                    rerun
                        .set_time(attempt.duration)
                        .set_type(attempt.kind.to_string());
                    if !attempt.output.is_empty() {
                        rerun.set_system_out(&attempt.output);
                    }
                    status.add_rerun(rerun);
                }
            }

            let mut case = TestCase::new(record.test.as_str(), status);
            case.set_classname("regatta").set_time(record.duration);
            if !record.output.is_empty() {
                case.set_system_out(&record.output);
            }
            suite.add_test_case(case);
        }

        report.add_test_suite(suite);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(test: &str, kind: OutcomeKind) -> TestResultRecord {
        TestResultRecord::new(test.into(), kind, Duration::from_millis(25))
    }

    fn input_order() -> Vec<TestId> {
        ["t1", "t2", "t3"].into_iter().map(TestId::from).collect()
    }

    fn report_for(
        records: Vec<TestResultRecord>,
        fail_env_changed: bool,
        interrupted: Option<CancelReason>,
    ) -> RunReport {
        let mut aggregator = RunAggregator::new();
        for rec in records {
            aggregator.record_final(rec);
        }
        aggregator.into_report(
            &input_order(),
            fail_env_changed,
            interrupted,
            Local::now(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn report_is_input_ordered_regardless_of_completion_order() {
        let report = report_for(
            vec![
                record("t3", OutcomeKind::Failed),
                record("t1", OutcomeKind::Failed),
                record("t2", OutcomeKind::Passed),
            ],
            false,
            None,
        );
        assert_eq!(report.failed(), &[TestId::from("t1"), TestId::from("t3")]);
        let order: Vec<_> = report
            .outcomes()
            .iter()
            .map(|r| r.test.as_str())
            .collect();
        assert_eq!(order, ["t1", "t2", "t3"]);
        assert_eq!(report.exit_code(), RunExitCode::TEST_RUN_FAILED);
        assert!(!report.success());
    }

    #[test]
    fn worst_outcome_wins_across_repeats() {
        let report = report_for(
            vec![
                record("t1", OutcomeKind::Passed),
                record("t1", OutcomeKind::Failed),
                record("t1", OutcomeKind::Passed),
            ],
            false,
            None,
        );
        assert_eq!(report.failed(), &[TestId::from("t1")]);
        assert_eq!(report.stats().executed, 3);
        assert_eq!(report.stats().failed, 1);
    }

    #[test]
    fn env_changes_fail_the_run_only_when_configured() {
        let records = vec![
            record("t1", OutcomeKind::Passed),
            record("t2", OutcomeKind::EnvChanged),
            record("t3", OutcomeKind::Passed),
        ];

        let lenient = report_for(records.clone(), false, None);
        assert!(lenient.success());
        assert_eq!(lenient.exit_code(), RunExitCode::OK);
        assert_eq!(lenient.env_changed(), &[TestId::from("t2")]);

        let strict = report_for(records, true, None);
        assert!(!strict.success());
        assert_eq!(strict.exit_code(), RunExitCode::ENV_CHANGED);
    }

    #[test]
    fn interrupted_exit_code_is_distinct_from_failure() {
        let report = report_for(
            vec![record("t1", OutcomeKind::Failed)],
            false,
            Some(CancelReason::FailFast),
        );
        assert_eq!(report.exit_code(), RunExitCode::INTERRUPTED);
        assert_ne!(report.exit_code(), RunExitCode::TEST_RUN_FAILED);

        let exhausted = report_for(
            vec![record("t1", OutcomeKind::Crashed)],
            false,
            Some(CancelReason::SchedulingExhausted),
        );
        assert_eq!(exhausted.exit_code(), RunExitCode::INFRASTRUCTURE_FAILED);
    }

    #[test]
    fn empty_run_is_not_a_success() {
        let report = report_for(Vec::new(), false, None);
        assert!(!report.success());
        assert_eq!(report.exit_code(), RunExitCode::NO_TESTS_RAN);
    }

    #[test]
    fn junit_attaches_rerun_attempts() {
        let mut aggregator = RunAggregator::new();
        aggregator.record_attempt({
            let mut rec = record("t2", OutcomeKind::Failed);
            rec.output = "flaky the first time".to_owned();
            rec
        });
        aggregator.record_final(record("t1", OutcomeKind::Passed));
        aggregator.record_final(record("t2", OutcomeKind::Passed));
        aggregator.record_final(record("t3", OutcomeKind::Failed));

        let report = aggregator.into_report(
            &input_order(),
            false,
            None,
            Local::now(),
            Duration::from_secs(2),
        );
        let mut buf = Vec::new();
        report
            .render_junit()
            .serialize(&mut buf)
            .expect("junit serializes");
        let xml = String::from_utf8(buf).expect("junit output is utf-8");

        assert!(xml.contains(r#"name="t1""#));
        assert!(xml.contains(r#"name="t2""#));
        assert!(xml.contains(r#"name="t3""#));
        assert!(xml.contains("flaky the first time"));
        assert!(xml.contains("failure"));
    }
}
