// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The worker half of the process boundary.
//!
//! A worker process receives its serialized [`WorkerRunSpec`] on standard
//! input, executes the partition one test at a time through the pluggable
//! [`TestExecutor`] adapter, and streams one enveloped record per test over
//! the bound channel. The engine does not know how an individual test
//! executes; everything in-process beyond dispatch and collection belongs
//! to the adapter.

use crate::{
    channel::ResultChannel,
    errors::WorkerError,
    runspec::{HuntRefleak, RunSpec, WorkerRunSpec},
    test_filter::FilterPatterns,
    time::stopwatch,
};
use regatta_metadata::{OutcomeKind, RunExitCode, TestId, TestResultRecord, wire};
use smol_str::SmolStr;
use std::{
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
};
use tracing::debug;

/// Context handed to the execution adapter for one test.
pub struct ExecuteContext<'a> {
    /// The run configuration (resource allow-list, limits, verbosity).
    pub spec: &'a RunSpec,

    /// Sub-test patterns registered for this test name, if any.
    pub patterns: Option<&'a FilterPatterns>,
}

/// What the adapter observed for one test.
pub struct ExecutionOutcome {
    /// Pass/fail/skip as seen in-process. Environment changes are derived
    /// from `resources_touched`, and timeouts/crashes are the controller's
    /// to synthesize; the adapter never reports those kinds.
    pub kind: OutcomeKind,

    /// Captured output.
    pub output: String,

    /// Shared global resources the test touched, as reported by the
    /// environment-naming service.
    pub resources_touched: Vec<SmolStr>,

    /// Allocation-delta samples, when leak hunting is enabled.
    pub refleak_samples: Option<Vec<i64>>,
}

/// The in-process test-execution adapter.
pub trait TestExecutor {
    /// Runs one test to completion.
    fn execute(&mut self, test: &TestId, cx: &ExecuteContext<'_>) -> ExecutionOutcome;
}

enum RecordSink {
    Stdout(io::Stdout),
    Channel(LineWriter<File>),
}

impl RecordSink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            Self::Stdout(stdout) => {
                let mut lock = stdout.lock();
                lock.write_all(line.as_bytes())?;
                lock.write_all(b"\n")?;
                lock.flush()
            }
            Self::Channel(writer) => {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                writer.flush()
            }
        }
    }
}

/// Executes a serialized worker spec inside a worker process.
///
/// Returns the worker's exit code. Per-test failures are not errors: they
/// travel back as records, and the worker still exits 0.
pub fn run_worker<E: TestExecutor>(input: &str, executor: &mut E) -> Result<i32, WorkerError> {
    let worker_spec = WorkerRunSpec::from_wire(input)?;
    debug!(tests = worker_spec.tests().len(), "worker starting");

    let mut sink = match worker_spec.result_channel() {
        ResultChannel::Stdout => RecordSink::Stdout(io::stdout()),
        channel => RecordSink::Channel(LineWriter::new(channel.open_for_write()?)),
    };

    for test in worker_spec.tests() {
        let record = run_single_test(&worker_spec, test, executor);
        let line = wire::encode(&record).map_err(WorkerError::EncodeRecord)?;
        sink.write_line(&line).map_err(WorkerError::WriteRecord)?;

        if let (Some(hunt), Some(samples)) =
            (worker_spec.hunt_refleak(), record.refleak_samples.as_ref())
        {
            append_hunt_samples(hunt, &record.test, samples)?;
        }
    }

    Ok(RunExitCode::OK)
}

fn run_single_test<E: TestExecutor>(
    spec: &RunSpec,
    test: &TestId,
    executor: &mut E,
) -> TestResultRecord {
    let sw = stopwatch();

    if !spec.match_tests().matches(test) {
        let mut record = TestResultRecord::new(test.clone(), OutcomeKind::Skipped, sw.elapsed());
        record.output = "filtered out by the test-name filter".to_owned();
        return record;
    }

    let cx = ExecuteContext {
        spec,
        patterns: spec.resolve_test_filter(test),
    };
    let outcome = executor.execute(test, &cx);

    // A nominally passing test that touched shared state is flagged.
    let kind = if outcome.kind == OutcomeKind::Passed && !outcome.resources_touched.is_empty() {
        OutcomeKind::EnvChanged
    } else {
        outcome.kind
    };

    let mut record = TestResultRecord::new(test.clone(), kind, sw.elapsed());
    record.output = outcome.output;
    record.resources_touched = outcome.resources_touched;
    record.refleak_samples = outcome.refleak_samples;
    record
}

fn append_hunt_samples(
    hunt: &HuntRefleak,
    test: &TestId,
    samples: &[i64],
) -> Result<(), WorkerError> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&hunt.filename)
        .map_err(|source| WorkerError::HuntFileWrite {
            path: hunt.filename.clone(),
            source,
        })?;
    writeln!(file, "{test} {samples:?}").map_err(|source| WorkerError::HuntFileWrite {
        path: hunt.filename.clone(),
        source,
    })
}
