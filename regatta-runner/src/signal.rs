// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shutdown-signal handling for the controller.
//!
//! A signal never kills the run outright: the scheduler observes it and
//! drains, letting in-flight worker sessions reach a natural terminal
//! state.

use crate::errors::SignalHandlerSetupError;

/// The kind of signal handling to set up for a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// Capture interrupt and termination signals for the platform.
    Standard,

    /// A no-op handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// The signal handler implementation.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    /// Creates a handler listening for the platform's shutdown signals.
    ///
    /// Must be called from within a tokio runtime.
    fn new() -> Result<Self, SignalHandlerSetupError> {
        let signals = imp::Signals::new()?;
        Ok(Self {
            signals: Some(signals),
        })
    }

    fn noop() -> Self {
        Self { signals: None }
    }

    /// Waits for the next shutdown event. Returns `None` once no further
    /// events can arrive.
    pub(crate) async fn recv(&mut self) -> Option<ShutdownEvent> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// SIGINT, SIGTERM and SIGHUP on unix.
    #[derive(Debug)]
    pub(super) struct Signals {
        sigint: Signal,
        sigterm: Signal,
        sighup: Signal,
        done: bool,
    }

    impl Signals {
        pub(super) fn new() -> Result<Self, SignalHandlerSetupError> {
            let sigint = signal(SignalKind::interrupt())?;
            let sigterm = signal(SignalKind::terminate())?;
            let sighup = signal(SignalKind::hangup())?;
            Ok(Self {
                sigint,
                sigterm,
                sighup,
                done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            if self.done {
                return None;
            }
            tokio::select! {
                recv = self.sigint.recv() => match recv {
                    Some(()) => Some(ShutdownEvent::Interrupt),
                    None => {
                        self.done = true;
                        None
                    }
                },
                recv = self.sigterm.recv() => match recv {
                    Some(()) => Some(ShutdownEvent::Term),
                    None => {
                        self.done = true;
                        None
                    }
                },
                recv = self.sighup.recv() => match recv {
                    Some(()) => Some(ShutdownEvent::Hangup),
                    None => {
                        self.done = true;
                        None
                    }
                },
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        ctrl_c: CtrlC,
        done: bool,
    }

    impl Signals {
        pub(super) fn new() -> Result<Self, SignalHandlerSetupError> {
            let ctrl_c = ctrl_c()?;
            Ok(Self {
                ctrl_c,
                done: false,
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            if self.done {
                return None;
            }
            match self.ctrl_c.recv().await {
                Some(()) => Some(ShutdownEvent::Interrupt),
                None => {
                    self.done = true;
                    None
                }
            }
        }
    }
}

/// A signal event that should drain the run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ShutdownEvent {
    /// An interactive interrupt (SIGINT / Ctrl-C).
    Interrupt,

    /// A termination request (SIGTERM).
    #[cfg(unix)]
    Term,

    /// The controlling terminal went away (SIGHUP).
    #[cfg(unix)]
    Hangup,
}
