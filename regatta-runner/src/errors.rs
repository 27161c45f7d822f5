// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by regatta.

use camino::Utf8PathBuf;
use regatta_metadata::EnvelopeError;
use std::io;
use thiserror::Error;

/// An error returned by the copy-with-override operations on
/// [`RunSpec`](crate::runspec::RunSpec).
///
/// Overrides supplied through the typed
/// [`RunSpecOverrides`](crate::runspec::RunSpecOverrides) struct cannot
/// produce this error; only the dynamic map-based path can.
#[derive(Debug, Error)]
pub enum InvalidOverrideError {
    /// An override key did not name a real `RunSpec` field.
    #[error("unknown RunSpec field `{field}` (known fields: {})", .known.join(", "))]
    UnknownField {
        /// The offending key.
        field: String,
        /// All valid field names.
        known: Vec<&'static str>,
    },

    /// An override value could not be interpreted as the field's type.
    #[error("invalid value for RunSpec field `{field}`")]
    InvalidValue {
        /// The field whose value was rejected.
        field: String,
        #[source]
        source: serde_json::Error,
    },
}

/// An error returned when a [`ResultChannel`](crate::channel::ResultChannel)
/// is asked for an operation its mode does not support.
#[derive(Clone, Debug, Error)]
pub enum UnsupportedChannelError {
    /// `open_for_write` was called on an inherited-stdout channel. Results
    /// for that mode go to the process's own standard output.
    #[error("an inherited-stdout channel cannot be opened; write to the process stdout instead")]
    StdoutChannel,

    /// The channel mode exists only on another platform.
    #[error("channel mode `{mode}` is not supported on this platform")]
    WrongPlatform {
        /// The unsupported mode.
        mode: &'static str,
    },
}

/// An error that occurred while setting up a result channel for a worker.
#[derive(Debug, Error)]
pub enum ChannelSetupError {
    /// Creating the OS pipe backing the channel failed.
    #[error("failed to create the result channel pipe")]
    CreatePipe(#[source] io::Error),

    /// Adjusting the inheritability of the channel handle failed.
    #[error("failed to change the inheritability of the channel handle")]
    SetInheritable(#[source] io::Error),

    /// This platform cannot pass descriptors or handles to children at all.
    #[error("descriptor and handle channels are not supported on this platform")]
    Unsupported,
}

/// An error decoding a serialized worker spec inside a worker process.
#[derive(Debug, Error)]
pub enum WorkerSpecDecodeError {
    /// The payload was well-formed JSON but did not carry the envelope
    /// marker; it is some other structure, not a worker spec.
    #[error("worker payload does not carry the envelope marker")]
    MissingMarker,

    /// The envelope itself failed to decode.
    #[error("failed to decode the worker payload")]
    Envelope(#[from] EnvelopeError),
}

/// An error raised by the worker-side execution loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The serialized spec handed to the worker did not decode.
    #[error(transparent)]
    SpecDecode(#[from] WorkerSpecDecodeError),

    /// The bound result channel could not be opened for writing.
    #[error(transparent)]
    Channel(#[from] UnsupportedChannelError),

    /// Writing a record to the result channel failed.
    #[error("failed to write a result record to the channel")]
    WriteRecord(#[source] io::Error),

    /// A result record failed to serialize.
    #[error("failed to serialize a result record")]
    EncodeRecord(#[source] serde_json::Error),

    /// Appending to the leak-hunt output file failed.
    #[error("failed to append to the leak-hunt file `{path}`")]
    HuntFileWrite {
        /// The leak-hunt output file.
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An error while building a [`Runner`](crate::runner::Runner).
#[derive(Debug, Error)]
pub enum RunnerBuildError {
    /// Creating the tokio runtime failed.
    #[error("failed to create the tokio runtime")]
    RuntimeCreate(#[source] io::Error),

    /// Setting up the signal handler failed.
    #[error(transparent)]
    SignalHandlerSetup(#[from] SignalHandlerSetupError),
}

/// An error occurred while setting up signal handlers.
#[derive(Debug, Error)]
#[error("error setting up signal handlers")]
pub struct SignalHandlerSetupError(#[from] io::Error);

/// An error while executing a test run.
#[derive(Debug, Error)]
pub enum RunnerExecuteError {
    /// The final report could not be written out.
    #[error(transparent)]
    WriteReport(#[from] WriteReportError),
}

/// An error while writing the final run report.
#[derive(Debug, Error)]
pub enum WriteReportError {
    /// Creating or writing the report file failed.
    #[error("error writing report to `{path}`")]
    Io {
        /// The report path.
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    /// Serializing the JUnit XML failed.
    #[error("error serializing JUnit report to `{path}`")]
    Junit {
        /// The report path.
        path: Utf8PathBuf,
        #[source]
        source: quick_junit::SerializeError,
    },
}
