// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted stand-in for the process-spawning primitive.

use super::session::{SessionOutput, SessionState, WorkerLauncher};
use crate::runspec::RunSpec;
use futures::future::BoxFuture;
use regatta_metadata::{ExitSummary, OutcomeKind, TestId, TestResultRecord};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

/// What a scripted launch produces for one test. Successive launches of
/// the same test consume successive entries; an unscripted test passes.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ScriptedOutcome {
    /// A well-formed record with this outcome.
    Outcome(OutcomeKind),

    /// The session crashes without reporting this test; the record is
    /// synthesized, and a session made up entirely of these counts as an
    /// infrastructure failure.
    CrashNoRecord,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedLauncher {
    scripts: Mutex<HashMap<TestId, VecDeque<ScriptedOutcome>>>,
    launches: Mutex<Vec<Vec<TestId>>>,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(
        self,
        test: &str,
        outcomes: impl IntoIterator<Item = ScriptedOutcome>,
    ) -> Self {
        self.scripts
            .lock()
            .expect("script lock is never poisoned")
            .insert(TestId::from(test), outcomes.into_iter().collect());
        self
    }

    /// Every partition launched so far, in launch order.
    pub(crate) fn launches(&self) -> Vec<Vec<TestId>> {
        self.launches
            .lock()
            .expect("launch log lock is never poisoned")
            .clone()
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(
        &self,
        _spec: Arc<RunSpec>,
        partition: Vec<TestId>,
    ) -> BoxFuture<'static, SessionOutput> {
        self.launches
            .lock()
            .expect("launch log lock is never poisoned")
            .push(partition.clone());

        let mut records = Vec::with_capacity(partition.len());
        let mut received = 0_usize;
        let mut crashed = false;
        {
            let mut scripts = self.scripts.lock().expect("script lock is never poisoned");
            for test in &partition {
                let scripted = scripts
                    .get_mut(test)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or(ScriptedOutcome::Outcome(OutcomeKind::Passed));
                match scripted {
                    ScriptedOutcome::Outcome(kind) => {
                        received += 1;
                        records.push(TestResultRecord::new(
                            test.clone(),
                            kind,
                            Duration::from_millis(1),
                        ));
                    }
                    ScriptedOutcome::CrashNoRecord => {
                        crashed = true;
                        let mut record = TestResultRecord::new(
                            test.clone(),
                            OutcomeKind::Crashed,
                            Duration::from_millis(1),
                        );
                        record.exit = Some(ExitSummary {
                            code: Some(1),
                            signal: None,
                        });
                        record.output = "worker crashed before reporting".to_owned();
                        records.push(record);
                    }
                }
            }
        }

        let terminal_state = if crashed {
            SessionState::Crashed
        } else {
            SessionState::Completed
        };
        let output = SessionOutput {
            records,
            terminal_state,
            infra_failure: crashed && received == 0,
        };
        Box::pin(futures::future::ready(output))
    }
}
