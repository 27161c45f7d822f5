// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The controller for a run.
//!
//! The dispatcher is the single place where events from the outside world
//! meet the executor: it consumes executor events and shutdown signals,
//! feeds the aggregator, decides when the run flips into draining, and
//! reports everything to the caller's callback.

use super::internal_events::{ExecutorEvent, RunSharedState};
use crate::{
    aggregator::{CancelReason, RunAggregator, RunEvent, RunReport},
    runner::session::SessionState,
    runspec::{JobCount, RunSpec},
    signal::SignalHandler,
    time::StopwatchSnapshot,
};
use debug_ignore::DebugIgnore;
use regatta_metadata::OutcomeKind;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

pub(super) struct DispatcherContext<F> {
    callback: DebugIgnore<F>,
    spec: Arc<RunSpec>,
    aggregator: RunAggregator,
    cancel_state: Option<CancelReason>,
}

impl<F> DispatcherContext<F>
where
    F: FnMut(RunEvent),
{
    pub(super) fn new(callback: F, spec: Arc<RunSpec>) -> Self {
        Self {
            callback: DebugIgnore(callback),
            spec,
            aggregator: RunAggregator::new(),
            cancel_state: None,
        }
    }

    pub(super) fn run_started(&mut self, job_count: JobCount, pool_size: usize) {
        info!(%job_count, pool_size, "run started");
        self.emit(RunEvent::RunStarted {
            job_count,
            pool_size,
        });
    }

    /// Runs the dispatcher until the executor side hangs up.
    pub(super) async fn run(
        &mut self,
        mut executor_rx: UnboundedReceiver<ExecutorEvent>,
        signal_handler: &mut SignalHandler,
        shared: &RunSharedState,
    ) {
        let mut signals_done = false;
        loop {
            tokio::select! {
                event = executor_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event, shared),
                        // All sessions completed and the executor dropped
                        // its sender.
                        None => break,
                    }
                }
                event = signal_handler.recv(), if !signals_done => {
                    match event {
                        Some(event) => {
                            debug!(?event, "shutdown signal received");
                            self.cancel(CancelReason::Interrupt, shared);
                        }
                        None => signals_done = true,
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: ExecutorEvent, shared: &RunSharedState) {
        match event {
            ExecutorEvent::AttemptFailedWillRetry { record } => {
                self.aggregator.record_attempt(record.clone());
                self.emit(RunEvent::TestAttemptFailedWillRetry { record });
            }
            ExecutorEvent::TestFinished { record } => {
                let unrecovered = record.kind.is_failure()
                    || (record.kind == OutcomeKind::EnvChanged && self.spec.fail_env_changed());
                self.aggregator.record_final(record.clone());
                self.emit(RunEvent::TestFinished { record });
                if unrecovered && self.spec.fail_fast() {
                    self.cancel(CancelReason::FailFast, shared);
                }
            }
            ExecutorEvent::SessionFinished {
                terminal_state,
                infra_failure,
            } => {
                debug!(state = ?terminal_state, infra_failure, "session finished");
                self.emit(RunEvent::SessionFinished {
                    clean: terminal_state == SessionState::Completed,
                });
            }
            ExecutorEvent::InfraExhausted { consecutive } => {
                info!(consecutive, "worker infrastructure exhausted");
                self.cancel(CancelReason::SchedulingExhausted, shared);
            }
        }
    }

    /// Flips the run into draining. The first reason wins; in-flight
    /// sessions are left to finish naturally.
    fn cancel(&mut self, reason: CancelReason, shared: &RunSharedState) {
        if self.cancel_state.is_some() {
            return;
        }
        info!(?reason, "draining the run");
        self.cancel_state = Some(reason);
        shared.cancel();
        self.emit(RunEvent::CancelStarted { reason });
    }

    /// Emits the final event and assembles the report.
    pub(super) fn finish(mut self, snapshot: StopwatchSnapshot) -> RunReport {
        let stats = self.aggregator.stats();
        self.emit(RunEvent::RunFinished {
            stats,
            elapsed: snapshot.duration,
        });
        self.aggregator.into_report(
            self.spec.tests(),
            self.spec.fail_env_changed(),
            self.cancel_state,
            snapshot.start_time,
            snapshot.duration,
        )
    }

    fn emit(&mut self, event: RunEvent) {
        (self.callback.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::stopwatch;
    use regatta_metadata::{TestId, TestResultRecord};
    use std::time::Duration;

    fn record(test: &str, kind: OutcomeKind) -> TestResultRecord {
        TestResultRecord::new(test.into(), kind, Duration::from_millis(1))
    }

    fn spec(fail_fast: bool) -> Arc<RunSpec> {
        use crate::runspec::RunSpecOverrides;
        let spec = RunSpec::new(vec![TestId::from("t1"), TestId::from("t2")]);
        Arc::new(spec.copy(RunSpecOverrides {
            fail_fast: Some(fail_fast),
            ..Default::default()
        }))
    }

    #[test]
    fn fail_fast_cancels_on_first_unrecovered_failure() {
        let shared = RunSharedState::new(5);
        let mut events = Vec::new();
        let mut dispatcher = DispatcherContext::new(|event| events.push(event), spec(true));

        dispatcher.handle_event(
            ExecutorEvent::TestFinished {
                record: record("t1", OutcomeKind::Failed),
            },
            &shared,
        );

        assert!(shared.cancelled());
        let report = dispatcher.finish(stopwatch().snapshot());
        assert_eq!(report.interrupted(), Some(CancelReason::FailFast));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RunEvent::CancelStarted { reason: CancelReason::FailFast }))
        );
    }

    #[test]
    fn the_first_cancel_reason_wins() {
        let shared = RunSharedState::new(1);
        let mut dispatcher = DispatcherContext::new(|_| {}, spec(true));

        dispatcher.handle_event(
            ExecutorEvent::TestFinished {
                record: record("t1", OutcomeKind::Failed),
            },
            &shared,
        );
        dispatcher.handle_event(ExecutorEvent::InfraExhausted { consecutive: 1 }, &shared);

        let report = dispatcher.finish(stopwatch().snapshot());
        assert_eq!(report.interrupted(), Some(CancelReason::FailFast));
    }

    #[test]
    fn failures_without_fail_fast_do_not_cancel() {
        let shared = RunSharedState::new(5);
        let mut dispatcher = DispatcherContext::new(|_| {}, spec(false));

        dispatcher.handle_event(
            ExecutorEvent::TestFinished {
                record: record("t1", OutcomeKind::Failed),
            },
            &shared,
        );

        assert!(!shared.cancelled());
        let report = dispatcher.finish(stopwatch().snapshot());
        assert_eq!(report.interrupted(), None);
        assert_eq!(report.failed(), &[TestId::from("t1")]);
    }
}
