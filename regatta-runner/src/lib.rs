// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core orchestration for regatta: a multi-process test runner.
//!
//! The controller process described by this crate schedules a bounded pool
//! of worker subprocesses, hands each one an immutable
//! [`RunSpec`](runspec::RunSpec) partition over a side
//! [`ResultChannel`](channel::ResultChannel), reconciles timeouts, crashes
//! and flaky reruns, and aggregates everything into one input-ordered
//! [`RunReport`](aggregator::RunReport) with a documented exit code.
//!
//! The worker half of the boundary lives in [`worker`]; the wire contract
//! between the two is defined by the `regatta-metadata` crate.

pub mod aggregator;
pub mod channel;
pub mod errors;
pub mod runner;
pub mod runspec;
pub mod signal;
pub mod test_filter;
mod time;
pub mod worker;
