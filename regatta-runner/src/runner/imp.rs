// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    dispatcher::DispatcherContext,
    internal_events::{ExecutorEvent, RunSharedState},
    session::{SessionOutput, WorkerLauncher},
};
use crate::{
    aggregator::{RunEvent, RunReport},
    errors::{RunnerBuildError, RunnerExecuteError},
    runspec::{RandomSeed, RunSpec},
    signal::{SignalHandler, SignalHandlerKind},
    time::stopwatch,
};
use camino::Utf8PathBuf;
use future_queue::StreamExt as _;
use futures::StreamExt as _;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use regatta_metadata::{OutcomeKind, TestId, TestResultRecord};
use std::{num::NonZeroUsize, sync::Arc};
use tokio::{
    runtime::Runtime,
    sync::mpsc::{UnboundedSender, unbounded_channel},
};
use tracing::{debug, info};

/// Runner options.
///
/// The infrastructure-failure bound is deliberately configurable: a pool
/// whose workers crash this many times in a row cannot make progress and
/// the run is declared exhausted. Zero disables the bound.
#[derive(Debug)]
pub struct RunnerBuilder {
    pool_size: Option<usize>,
    max_infra_failures: u32,
    junit_path: Option<Utf8PathBuf>,
    signal_handler_kind: SignalHandlerKind,
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self {
            pool_size: None,
            max_infra_failures: 5,
            junit_path: None,
            signal_handler_kind: SignalHandlerKind::Standard,
        }
    }
}

impl RunnerBuilder {
    /// Sets the number of concurrently active worker sessions.
    ///
    /// Defaults to the machine's available parallelism.
    pub fn set_pool_size(&mut self, pool_size: usize) -> &mut Self {
        self.pool_size = Some(pool_size);
        self
    }

    /// Sets the consecutive infrastructure-failure bound.
    pub fn set_max_infra_failures(&mut self, max_infra_failures: u32) -> &mut Self {
        self.max_infra_failures = max_infra_failures;
        self
    }

    /// Sets where the JUnit report is written when the spec asks for one.
    pub fn set_junit_path(&mut self, junit_path: Utf8PathBuf) -> &mut Self {
        self.junit_path = Some(junit_path);
        self
    }

    /// Sets the kind of signal handling for this run.
    pub fn set_signal_handler_kind(&mut self, kind: SignalHandlerKind) -> &mut Self {
        self.signal_handler_kind = kind;
        self
    }

    /// Creates the runner, building its runtime and signal handler.
    pub fn build(
        self,
        spec: RunSpec,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Result<Runner, RunnerBuildError> {
        // The controller is a single-threaded event loop; worker
        // parallelism lives in the subprocesses.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(RunnerBuildError::RuntimeCreate)?;

        // The signal handler registers with this runtime's driver.
        let _guard = runtime.enter();
        let signal_handler = self.signal_handler_kind.build()?;

        let pool_size = self.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        });

        Ok(Runner {
            spec: Arc::new(spec),
            launcher,
            pool_size,
            max_infra_failures: self.max_infra_failures,
            junit_path: self.junit_path,
            runtime,
            signal_handler,
        })
    }
}

/// Context for one run. Created with [`RunnerBuilder::build`].
pub struct Runner {
    spec: Arc<RunSpec>,
    launcher: Arc<dyn WorkerLauncher>,
    pool_size: usize,
    max_infra_failures: u32,
    junit_path: Option<Utf8PathBuf>,
    runtime: Runtime,
    signal_handler: SignalHandler,
}

impl Runner {
    /// Executes the run to completion, one worker subprocess per session.
    ///
    /// The callback observes every event in completion order; the returned
    /// report is input-ordered. A report is produced even when the run
    /// drains early.
    pub fn execute<F>(self, callback: F) -> Result<RunReport, RunnerExecuteError>
    where
        F: FnMut(RunEvent),
    {
        let Self {
            spec,
            launcher,
            pool_size,
            max_infra_failures,
            junit_path,
            runtime,
            mut signal_handler,
        } = self;

        let sw = stopwatch();
        let shared = Arc::new(RunSharedState::new(max_infra_failures));
        let order = scheduling_order(&spec);
        let batch = batch_size(&spec, pool_size);
        debug!(batch, "partitioning tests");

        let mut dispatcher = DispatcherContext::new(callback, spec.clone());
        dispatcher.run_started(spec.job_count(), pool_size);

        let (event_tx, event_rx) = unbounded_channel();
        runtime.block_on(async {
            let pool_fut = run_pool(
                spec.clone(),
                launcher,
                order,
                batch,
                pool_size,
                event_tx,
                shared.clone(),
            );
            let dispatcher_fut = dispatcher.run(event_rx, &mut signal_handler, &shared);
            tokio::join!(pool_fut, dispatcher_fut);
        });

        let report = dispatcher.finish(sw.snapshot());
        if spec.use_junit()
            && let Some(path) = &junit_path
        {
            info!(%path, "writing JUnit report");
            report.write_junit(path)?;
        }
        Ok(report)
    }
}

/// The scheduling order: the spec's test order, shuffled when asked.
fn scheduling_order(spec: &RunSpec) -> Vec<TestId> {
    let mut order = spec.tests().to_vec();
    if spec.randomize() {
        let seed = match spec.random_seed() {
            RandomSeed::Fixed(seed) => seed,
            RandomSeed::Random => rand::random(),
        };
        info!(seed, "shuffling test order");
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    order
}

/// One test per session when isolation matters (leak hunting, fail-fast
/// precision, pgo profiling); a throughput chunk otherwise.
fn batch_size(spec: &RunSpec, pool_size: usize) -> usize {
    if spec.fail_fast() || spec.hunt_refleak().is_some() || spec.pgo() || spec.pgo_extended() {
        return 1;
    }
    let tests = spec.tests().len();
    tests.div_ceil(pool_size.max(1) * 4).clamp(1, 32)
}

/// Lazily yields per-session partitions, cycling when the run is forever.
/// Stops as soon as the run is cancelled, which is what drains the pool.
struct PartitionIter {
    order: Vec<TestId>,
    batch: usize,
    pos: usize,
    forever: bool,
    shared: Arc<RunSharedState>,
}

impl Iterator for PartitionIter {
    type Item = Vec<TestId>;

    fn next(&mut self) -> Option<Vec<TestId>> {
        if self.order.is_empty() || self.shared.cancelled() {
            return None;
        }
        if self.pos >= self.order.len() {
            if !self.forever {
                return None;
            }
            self.pos = 0;
        }
        let end = (self.pos + self.batch).min(self.order.len());
        let partition = self.order[self.pos..end].to_vec();
        self.pos = end;
        Some(partition)
    }
}

async fn run_pool(
    spec: Arc<RunSpec>,
    launcher: Arc<dyn WorkerLauncher>,
    order: Vec<TestId>,
    batch: usize,
    pool_size: usize,
    event_tx: UnboundedSender<ExecutorEvent>,
    shared: Arc<RunSharedState>,
) {
    let partitions = PartitionIter {
        order,
        batch,
        pos: 0,
        forever: spec.forever(),
        shared: shared.clone(),
    };

    futures::stream::iter(partitions)
        .map(move |partition| {
            let spec = spec.clone();
            let launcher = launcher.clone();
            let event_tx = event_tx.clone();
            let shared = shared.clone();
            (
                1,
                move |_cx| async move {
                    run_unit(spec, launcher, partition, event_tx, shared).await
                },
            )
        })
        .future_queue(pool_size)
        .for_each(|()| futures::future::ready(()))
        .await;
}

/// Runs one session over a partition, retrying failing tests in isolation,
/// and reports authoritative outcomes.
async fn run_unit(
    spec: Arc<RunSpec>,
    launcher: Arc<dyn WorkerLauncher>,
    partition: Vec<TestId>,
    event_tx: UnboundedSender<ExecutorEvent>,
    shared: Arc<RunSharedState>,
) {
    if shared.cancelled() {
        // Pulled before the stream observed the cancellation.
        return;
    }

    let output = launcher.launch(spec.clone(), partition).await;
    let records = note_session(output, &event_tx, &shared);

    for record in records {
        let final_record = if record.kind.is_failure()
            && spec.rerun()
            && !shared.cancelled()
            && shared.claim_retry(&record.test)
        {
            debug!(test = %record.test, "re-running failing test in isolation");
            let _ = event_tx.send(ExecutorEvent::AttemptFailedWillRetry {
                record: record.clone(),
            });
            let rerun_output = launcher.launch(spec.clone(), vec![record.test.clone()]).await;
            let mut rerun_records = note_session(rerun_output, &event_tx, &shared);
            // The rerun covered exactly this test, and a session always
            // produces one record per partition test.
            rerun_records
                .drain(..)
                .find(|r| r.test == record.test)
                .unwrap_or(record)
        } else {
            record
        };

        let unrecovered = final_record.kind.is_failure()
            || (final_record.kind == OutcomeKind::EnvChanged && spec.fail_env_changed());
        let _ = event_tx.send(ExecutorEvent::TestFinished {
            record: final_record,
        });
        if unrecovered && spec.fail_fast() {
            // Flip the flag here, not in the dispatcher, so no further
            // partition is pulled before the event is even processed.
            shared.cancel();
        }
    }
}

/// Reports a reaped session and applies the exhaustion bound. Returns the
/// session's records for outcome handling.
fn note_session(
    output: SessionOutput,
    event_tx: &UnboundedSender<ExecutorEvent>,
    shared: &RunSharedState,
) -> Vec<TestResultRecord> {
    let SessionOutput {
        records,
        terminal_state,
        infra_failure,
    } = output;
    let _ = event_tx.send(ExecutorEvent::SessionFinished {
        terminal_state,
        infra_failure,
    });
    if let Some(consecutive) = shared.note_session(infra_failure) {
        let _ = event_tx.send(ExecutorEvent::InfraExhausted { consecutive });
    }
    records
}
