// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for regatta runs.
///
/// A run may end in a number of expected ways; this structure documents the
/// exit codes reported for each of them. Unknown/unexpected failures always
/// result in exit code 1.
pub enum RunExitCode {}

impl RunExitCode {
    /// Every scheduled test passed and the run completed normally.
    pub const OK: i32 = 0;

    /// One or more tests failed, crashed, or timed out, and the failure was
    /// not recovered by a rerun.
    pub const TEST_RUN_FAILED: i32 = 2;

    /// No test failed, but at least one test altered the shared execution
    /// environment and the run was configured to treat that as an error.
    pub const ENV_CHANGED: i32 = 3;

    /// The run completed without executing any tests.
    pub const NO_TESTS_RAN: i32 = 4;

    /// Worker processes repeatedly failed to produce results and the
    /// scheduler gave up before the test list was exhausted.
    pub const INFRASTRUCTURE_FAILED: i32 = 5;

    /// The run was cut short: either an interrupt signal arrived, or
    /// fail-fast stopped scheduling after the first unrecovered failure.
    ///
    /// This code is deliberately distinct from [`TEST_RUN_FAILED`](Self::TEST_RUN_FAILED)
    /// so callers can tell a truncated run from a completed failing one.
    pub const INTERRUPTED: i32 = 130;
}
