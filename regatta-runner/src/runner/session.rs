// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One worker session: a subprocess executing a partition of tests.
//!
//! A session owns its result channel exclusively from launch until it is
//! reaped, and emits exactly one record per partition test no matter which
//! terminal state it reaches: missing outcomes are synthesized so the
//! aggregator always sees a complete stream.

use crate::{
    channel::{ChannelPair, ResultChannel},
    errors::ChannelSetupError,
    runspec::{RunSpec, RunSpecOverrides},
    time::stopwatch,
};
use futures::future::BoxFuture;
use regatta_metadata::{
    Decoded, EnvelopeError, ExitSummary, OutcomeKind, TestId, TestResultRecord, wire,
};
use std::{
    collections::HashMap, fmt::Write as _, io, process::Stdio, sync::Arc, time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdout, Command},
};
use tracing::{debug, warn};

/// Lifecycle of a worker session.
///
/// `Pending → Launched → Running → {Completed, TimedOut, Crashed} → Reaped`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Created, subprocess not yet spawned.
    Pending,

    /// Subprocess spawned with the serialized spec and prepared channel.
    Launched,

    /// Process alive; no initial handshake is required.
    Running,

    /// Exited with status 0 and a well-formed record for every test.
    Completed,

    /// Missed the deadline; the process was force-terminated.
    TimedOut,

    /// Exited without a complete, well-formed record set.
    Crashed,

    /// Channel and subprocess resources released; no further events.
    Reaped,
}

/// Everything a session reports to the pool once reaped.
#[derive(Debug)]
pub struct SessionOutput {
    /// One record per partition test, possibly synthesized.
    pub records: Vec<TestResultRecord>,

    /// The terminal state reached before reaping.
    pub terminal_state: SessionState,

    /// True when the session crashed without producing a single well-formed
    /// record. Consecutive sessions like this exhaust the scheduler.
    pub infra_failure: bool,
}

/// The process-spawning primitive supplying the pool with sessions.
///
/// The production implementation is [`ProcessLauncher`]; tests substitute a
/// scripted stand-in.
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Launches one worker over `partition` and drives it to a terminal
    /// state.
    fn launch(&self, spec: Arc<RunSpec>, partition: Vec<TestId>)
    -> BoxFuture<'static, SessionOutput>;
}

/// Launches real worker processes.
///
/// The default command is used unless the spec carries an override; either
/// way the serialized [`WorkerRunSpec`](crate::runspec::WorkerRunSpec) is
/// handed over on standard input.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    default_command: Vec<String>,
}

impl ProcessLauncher {
    /// Creates a launcher with the given default worker command line.
    pub fn new(default_command: Vec<String>) -> Self {
        Self { default_command }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        spec: Arc<RunSpec>,
        partition: Vec<TestId>,
    ) -> BoxFuture<'static, SessionOutput> {
        let command = spec
            .worker_command()
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.default_command.clone());
        Box::pin(WorkerSession::new(spec, partition, command).run())
    }
}

#[derive(Debug, Error)]
enum LaunchError {
    #[error(transparent)]
    Channel(#[from] ChannelSetupError),

    #[error("worker command line is empty")]
    EmptyCommand,

    #[error("failed to serialize the worker spec")]
    Encode(#[source] serde_json::Error),

    #[error("failed to spawn the worker process")]
    Spawn(#[source] io::Error),
}

enum Terminal {
    Completed,
    TimedOut,
    Crashed { exit: Option<ExitSummary> },
}

struct LaunchedWorker {
    child: Child,
    stdout_lines: Lines<BufReader<ChildStdout>>,
    stderr_lines: Lines<BufReader<ChildStderr>>,
    channel_lines: Option<Lines<BufReader<tokio::fs::File>>>,
    stdout_is_channel: bool,
}

/// One subprocess executing a partition of tests under a run spec.
pub struct WorkerSession {
    spec: Arc<RunSpec>,
    partition: Vec<TestId>,
    command: Vec<String>,
    state: SessionState,
}

impl WorkerSession {
    /// Creates a pending session. Nothing is spawned until [`run`](Self::run).
    pub fn new(spec: Arc<RunSpec>, partition: Vec<TestId>, command: Vec<String>) -> Self {
        Self {
            spec,
            partition,
            command,
            state: SessionState::Pending,
        }
    }

    /// The session's current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session to its terminal state and reaps it.
    pub async fn run(mut self) -> SessionOutput {
        let sw = stopwatch();
        debug!(
            tests = self.partition.len(),
            command = ?self.command,
            "launching worker session"
        );

        let mut collector = RecordCollector::new(&self.partition);
        let mut diagnostics = String::new();
        let mut malformed = false;

        let terminal = match self.launch().await {
            Ok(worker) => {
                self.observe(worker, &mut collector, &mut diagnostics, &mut malformed)
                    .await
            }
            Err(error) => {
                warn!(%error, "worker session failed to launch");
                let _ = writeln!(diagnostics, "worker failed to launch: {error}");
                Terminal::Crashed { exit: None }
            }
        };

        let received = collector.received();
        let elapsed = sw.elapsed();
        let extra = if self.spec.output_on_failure() && !diagnostics.is_empty() {
            Some(diagnostics.as_str())
        } else {
            None
        };

        let (state, records) = match terminal {
            Terminal::Completed => (
                SessionState::Completed,
                collector.finish(
                    OutcomeKind::Crashed,
                    elapsed,
                    "worker exited without reporting this test",
                    None,
                    extra,
                ),
            ),
            Terminal::TimedOut => (
                SessionState::TimedOut,
                collector.finish(
                    OutcomeKind::Timeout,
                    elapsed,
                    "worker session timed out",
                    None,
                    extra,
                ),
            ),
            Terminal::Crashed { exit } => {
                let note = match exit {
                    Some(exit) => format!("worker crashed ({exit})"),
                    None => "worker crashed before reporting".to_owned(),
                };
                (
                    SessionState::Crashed,
                    collector.finish(OutcomeKind::Crashed, elapsed, &note, exit, extra),
                )
            }
        };

        let infra_failure = state != SessionState::Completed && received == 0;
        self.state = SessionState::Reaped;
        debug!(state = ?state, records = records.len(), "worker session reaped");

        SessionOutput {
            records,
            terminal_state: state,
            infra_failure,
        }
    }

    async fn launch(&mut self) -> Result<LaunchedWorker, LaunchError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(LaunchError::EmptyCommand)?;

        let use_stdout = self.spec.prefers_inherited_output_channel();
        let (channel, pair) = if use_stdout {
            (ResultChannel::Stdout, None)
        } else {
            let pair = ChannelPair::new()?;
            (pair.channel(), Some(pair))
        };

        let worker_spec = self.spec.derive_worker_spec(
            RunSpecOverrides {
                tests: Some(self.partition.clone()),
                forever: Some(false),
                ..Default::default()
            },
            channel,
        );
        let payload = worker_spec.to_wire().map_err(LaunchError::Encode)?;

        let mut cmd = std::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        channel.prepare_for_subprocess(&mut cmd);

        let mut cmd: Command = cmd.into();
        cmd.kill_on_drop(true);

        let guard = channel.scoped_inheritance()?;
        let spawn_result = cmd.spawn();
        drop(guard);
        let mut child = spawn_result.map_err(LaunchError::Spawn)?;
        self.state = SessionState::Launched;

        // Hand over the serialized spec without blocking the read loop on
        // the pipe buffer. A worker that exits without reading it is
        // reported through its exit status, not this write.
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(error) = stdin.write_all(payload.as_bytes()).await {
                    debug!(%error, "worker did not accept its spec payload");
                } else if let Err(error) = stdin.write_all(b"\n").await {
                    debug!(%error, "worker did not accept its spec payload");
                }
            });
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let channel_lines = pair.map(|pair| {
            let reader = tokio::fs::File::from_std(pair.into_reader());
            BufReader::new(reader).lines()
        });

        Ok(LaunchedWorker {
            child,
            stdout_lines: BufReader::new(stdout).lines(),
            stderr_lines: BufReader::new(stderr).lines(),
            channel_lines,
            stdout_is_channel: use_stdout,
        })
    }

    async fn observe(
        &mut self,
        mut worker: LaunchedWorker,
        collector: &mut RecordCollector,
        diagnostics: &mut String,
        malformed: &mut bool,
    ) -> Terminal {
        self.state = SessionState::Running;

        let timeout = self.spec.timeout();
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut exited: Option<(ExitSummary, bool)> = None;
        let mut channel_done = worker.channel_lines.is_none();
        let mut stdout_done = false;
        let mut stderr_done = false;

        loop {
            if exited.is_some() && channel_done && stdout_done && stderr_done {
                break;
            }

            tokio::select! {
                line = next_channel_line(worker.channel_lines.as_mut()), if !channel_done => {
                    match line {
                        Ok(Some(line)) => {
                            consume_wire_line(&line, false, collector, diagnostics, malformed);
                        }
                        Ok(None) => channel_done = true,
                        Err(error) => {
                            debug!(%error, "error reading the result channel");
                            channel_done = true;
                        }
                    }
                }
                line = worker.stdout_lines.next_line(), if !stdout_done => {
                    match line {
                        Ok(Some(line)) => {
                            if worker.stdout_is_channel {
                                consume_wire_line(&line, true, collector, diagnostics, malformed);
                            } else {
                                diagnostics.push_str(&line);
                                diagnostics.push('\n');
                            }
                        }
                        Ok(None) => stdout_done = true,
                        Err(error) => {
                            debug!(%error, "error reading worker stdout");
                            stdout_done = true;
                        }
                    }
                }
                line = worker.stderr_lines.next_line(), if !stderr_done => {
                    match line {
                        Ok(Some(line)) => {
                            diagnostics.push_str(&line);
                            diagnostics.push('\n');
                        }
                        Ok(None) => stderr_done = true,
                        Err(error) => {
                            debug!(%error, "error reading worker stderr");
                            stderr_done = true;
                        }
                    }
                }
                status = worker.child.wait(), if exited.is_none() => {
                    match status {
                        Ok(status) => {
                            exited = Some((ExitSummary::from(status), status.success()));
                        }
                        Err(error) => {
                            warn!(%error, "failed to wait on the worker process");
                            exited = Some((ExitSummary::terminated(), false));
                        }
                    }
                }
                () = &mut deadline => {
                    warn!(?timeout, "worker session deadline elapsed; terminating");
                    terminate(&mut worker.child).await;
                    return Terminal::TimedOut;
                }
            }
        }

        let (exit, success) = exited.unwrap_or((ExitSummary::terminated(), false));
        if success && !*malformed && collector.is_complete() {
            Terminal::Completed
        } else {
            Terminal::Crashed { exit: Some(exit) }
        }
    }
}

async fn next_channel_line(
    lines: Option<&mut Lines<BufReader<tokio::fs::File>>>,
) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Classifies one line from a result stream.
///
/// On the shared stdout stream, anything that is not an enveloped record is
/// ordinary test output. On a dedicated channel there is no other writer,
/// so undecodable data marks the session malformed.
fn consume_wire_line(
    line: &str,
    shared_stream: bool,
    collector: &mut RecordCollector,
    diagnostics: &mut String,
    malformed: &mut bool,
) {
    match wire::decode::<TestResultRecord>(line) {
        Ok(Decoded::Payload(record)) => collector.accept(record),
        Ok(Decoded::Untagged(_)) | Err(EnvelopeError::Syntax(_)) if shared_stream => {
            diagnostics.push_str(line);
            diagnostics.push('\n');
        }
        Ok(Decoded::Untagged(_)) => {
            warn!("untagged data on a dedicated result channel");
            *malformed = true;
        }
        Err(error) => {
            warn!(%error, "malformed result record");
            *malformed = true;
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Gives the worker a chance to exit cleanly before killing it.
        async fn terminate(child: &mut Child) {
            const GRACE_PERIOD: Duration = Duration::from_secs(2);

            let Some(pid) = child.id() else {
                return;
            };
            if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
                // Already gone.
                return;
            }
            if tokio::time::timeout(GRACE_PERIOD, child.wait()).await.is_err() {
                let _ = child.start_kill();
            }
        }
    } else {
        async fn terminate(child: &mut Child) {
            let _ = child.start_kill();
        }
    }
}

/// Collects well-formed records for a partition and synthesizes the rest.
struct RecordCollector {
    expected: Vec<TestId>,
    resolved: HashMap<TestId, TestResultRecord>,
}

impl RecordCollector {
    fn new(partition: &[TestId]) -> Self {
        Self {
            expected: partition.to_vec(),
            resolved: HashMap::new(),
        }
    }

    fn accept(&mut self, record: TestResultRecord) {
        if !self.expected.contains(&record.test) {
            warn!(test = %record.test, "record for a test outside this partition");
            return;
        }
        // The first record for a test is authoritative within a session.
        self.resolved.entry(record.test.clone()).or_insert(record);
    }

    fn received(&self) -> usize {
        self.resolved.len()
    }

    fn is_complete(&self) -> bool {
        self.expected
            .iter()
            .all(|test| self.resolved.contains_key(test))
    }

    fn finish(
        self,
        fill: OutcomeKind,
        duration: Duration,
        note: &str,
        exit: Option<ExitSummary>,
        extra_output: Option<&str>,
    ) -> Vec<TestResultRecord> {
        let Self {
            expected,
            mut resolved,
        } = self;
        expected
            .iter()
            .map(|test| {
                resolved.remove(test).unwrap_or_else(|| {
                    let mut record = TestResultRecord::new(test.clone(), fill, duration);
                    record.output = match extra_output {
                        Some(extra) => format!("{note}\n{extra}"),
                        None => note.to_owned(),
                    };
                    record.exit = exit;
                    record
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runspec::RunSpec;
    use regatta_metadata::TestId;

    fn ids(names: &[&str]) -> Vec<TestId> {
        names.iter().copied().map(TestId::from).collect()
    }

    fn spec_with_command(command: &[&str]) -> Arc<RunSpec> {
        let spec = RunSpec::new(ids(&["t1", "t2"]));
        Arc::new(spec.copy(RunSpecOverrides {
            worker_command: Some(Some(
                command.iter().map(|s| (*s).to_owned()).collect(),
            )),
            ..Default::default()
        }))
    }

    #[test]
    fn collector_synthesizes_only_unresolved_tests() {
        let partition = ids(&["t1", "t2", "t3"]);
        let mut collector = RecordCollector::new(&partition);
        collector.accept(TestResultRecord::new(
            "t2".into(),
            OutcomeKind::Passed,
            Duration::from_millis(5),
        ));

        let records = collector.finish(
            OutcomeKind::Timeout,
            Duration::from_secs(1),
            "worker session timed out",
            None,
            None,
        );
        let kinds: Vec<_> = records.iter().map(|r| (r.test.as_str(), r.kind)).collect();
        assert_eq!(
            kinds,
            [
                ("t1", OutcomeKind::Timeout),
                ("t2", OutcomeKind::Passed),
                ("t3", OutcomeKind::Timeout),
            ]
        );
    }

    #[test]
    fn collector_ignores_records_outside_the_partition() {
        let partition = ids(&["t1"]);
        let mut collector = RecordCollector::new(&partition);
        collector.accept(TestResultRecord::new(
            "t9".into(),
            OutcomeKind::Passed,
            Duration::ZERO,
        ));
        assert_eq!(collector.received(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_worker_times_out_and_synthesizes_the_partition() {
        let spec = spec_with_command(&["sleep", "30"]);
        let spec = Arc::new(spec.copy(RunSpecOverrides {
            timeout: Some(Some(Duration::from_millis(200))),
            ..Default::default()
        }));

        let session = WorkerSession::new(
            spec.clone(),
            ids(&["t1", "t2"]),
            vec!["sleep".to_owned(), "30".to_owned()],
        );
        let output = session.run().await;

        assert_eq!(output.terminal_state, SessionState::TimedOut);
        assert!(
            output.infra_failure,
            "a session that never reported is an infrastructure failure"
        );
        assert_eq!(output.records.len(), 2);
        for record in &output.records {
            assert_eq!(record.kind, OutcomeKind::Timeout);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashing_worker_synthesizes_crash_records() {
        let spec = spec_with_command(&["false"]);
        let session = WorkerSession::new(spec, ids(&["t1", "t2"]), vec!["false".to_owned()]);
        let output = session.run().await;

        assert_eq!(output.terminal_state, SessionState::Crashed);
        assert!(output.infra_failure);
        assert_eq!(output.records.len(), 2);
        for record in &output.records {
            assert_eq!(record.kind, OutcomeKind::Crashed);
            let exit = record.exit.expect("crash records carry the exit summary");
            assert_eq!(exit.code, Some(1));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn records_on_shared_stdout_are_separated_from_output() {
        let record = TestResultRecord::new("t1".into(), OutcomeKind::Passed, Duration::ZERO);
        let line = wire::encode(&record).expect("record encodes");
        let script = format!("cat > /dev/null; echo 'plain test output'; echo '{line}'");

        let spec = spec_with_command(&["sh", "-c", &script]);
        let session = WorkerSession::new(
            spec,
            ids(&["t1"]),
            vec!["sh".to_owned(), "-c".to_owned(), script.clone()],
        );
        let output = session.run().await;

        assert_eq!(output.terminal_state, SessionState::Completed);
        assert!(!output.infra_failure);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].kind, OutcomeKind::Passed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn partial_reporting_marks_the_rest_crashed() {
        let record = TestResultRecord::new("t1".into(), OutcomeKind::Passed, Duration::ZERO);
        let line = wire::encode(&record).expect("record encodes");
        let script = format!("cat > /dev/null; echo '{line}'");

        let spec = spec_with_command(&["sh", "-c", &script]);
        let session = WorkerSession::new(
            spec,
            ids(&["t1", "t2"]),
            vec!["sh".to_owned(), "-c".to_owned(), script.clone()],
        );
        let output = session.run().await;

        // Exit status 0, but t2 never resolved.
        assert_eq!(output.terminal_state, SessionState::Crashed);
        assert!(!output.infra_failure, "one well-formed record was received");
        let kinds: Vec<_> = output
            .records
            .iter()
            .map(|r| (r.test.as_str(), r.kind))
            .collect();
        assert_eq!(
            kinds,
            [("t1", OutcomeKind::Passed), ("t2", OutcomeKind::Crashed)]
        );
    }
}
