// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured types shared between the regatta controller and its worker
//! processes.
//!
//! Everything in this crate crosses the process boundary: test identifiers,
//! per-test result records, the versioned envelope that tags regatta's own
//! messages on a shared stream, and the exit codes the controller reports.
//! The controller ([`regatta-runner`](https://crates.io/crates/regatta-runner))
//! and the worker entry point both depend on this crate, so its surface is
//! kept small and serialization-stable.

mod exit_codes;
mod records;
pub mod wire;

pub use exit_codes::*;
pub use records::*;
pub use wire::{Decoded, EnvelopeError};
