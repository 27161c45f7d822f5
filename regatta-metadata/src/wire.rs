// Copyright (c) The regatta Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The versioned envelope regatta wraps its own wire messages in.
//!
//! Worker result records may share a stream with arbitrary test output (the
//! inherited-stdout channel mode), and the serialized worker spec travels
//! through generic process plumbing. A private marker key distinguishes
//! regatta's own payloads from any other structure that happens to be valid
//! JSON: decoding yields a typed payload only when the marker matches a
//! supported version, and classifies everything else as plain data.

use serde::{Serialize, de::DeserializeOwned};
use std::{error, fmt};

/// The private marker key carried by every enveloped message.
pub const ENVELOPE_MARKER: &str = "__regatta__";

/// The envelope version this build reads and writes.
pub const ENVELOPE_VERSION: u64 = 1;

#[derive(Serialize)]
struct BorrowedEnvelope<'a, T> {
    #[serde(rename = "__regatta__")]
    version: u64,
    payload: &'a T,
}

/// The classification of one decoded wire message.
#[derive(Debug)]
pub enum Decoded<T> {
    /// The marker was present with a supported version; here is the typed
    /// payload.
    Payload(T),

    /// The input was well-formed JSON without the marker: arbitrary
    /// untagged data, not ours.
    Untagged(serde_json::Value),
}

impl<T> Decoded<T> {
    /// Returns the typed payload, or `None` for untagged data.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Self::Payload(payload) => Some(payload),
            Self::Untagged(_) => None,
        }
    }
}

/// An error produced while decoding an enveloped message.
#[derive(Debug)]
pub enum EnvelopeError {
    /// The input was not valid JSON at all.
    Syntax(serde_json::Error),

    /// The marker was present but named a version this build does not
    /// support.
    UnsupportedVersion {
        /// The version found in the message.
        found: u64,
    },

    /// The marker was present but the payload did not match the expected
    /// shape.
    Payload(serde_json::Error),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(_) => write!(f, "message is not valid JSON"),
            Self::UnsupportedVersion { found } => write!(
                f,
                "unsupported envelope version {found} (supported: {ENVELOPE_VERSION})"
            ),
            Self::Payload(_) => write!(f, "envelope payload did not match the expected shape"),
        }
    }
}

impl error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Syntax(err) | Self::Payload(err) => Some(err),
            Self::UnsupportedVersion { .. } => None,
        }
    }
}

/// Encodes a payload into a single-line enveloped JSON string.
pub fn encode<T: Serialize>(payload: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&BorrowedEnvelope {
        version: ENVELOPE_VERSION,
        payload,
    })
}

/// Decodes one wire message.
///
/// Returns [`Decoded::Untagged`] for JSON that does not carry the marker;
/// fails only for non-JSON input, an unsupported version, or a marked
/// message whose payload does not deserialize as `T`.
pub fn decode<T: DeserializeOwned>(input: &str) -> Result<Decoded<T>, EnvelopeError> {
    let value: serde_json::Value = serde_json::from_str(input).map_err(EnvelopeError::Syntax)?;

    let Some(marker) = value.get(ENVELOPE_MARKER) else {
        return Ok(Decoded::Untagged(value));
    };
    match marker.as_u64() {
        Some(ENVELOPE_VERSION) => {}
        Some(found) => return Err(EnvelopeError::UnsupportedVersion { found }),
        // A non-numeric marker is someone else's key, not our envelope.
        None => return Ok(Decoded::Untagged(value)),
    }

    let payload = value
        .get("payload")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let payload = serde_json::from_value(payload).map_err(EnvelopeError::Payload)?;
    Ok(Decoded::Payload(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutcomeKind, TestResultRecord};
    use std::time::Duration;

    #[test]
    fn record_round_trips_through_envelope() {
        let record = TestResultRecord::new(
            "test_json".into(),
            OutcomeKind::Failed,
            Duration::from_millis(42),
        );
        let line = encode(&record).expect("record encodes");
        assert!(line.contains(ENVELOPE_MARKER));

        match decode::<TestResultRecord>(&line).expect("line decodes") {
            Decoded::Payload(back) => assert_eq!(back, record),
            Decoded::Untagged(value) => panic!("enveloped record decoded as untagged: {value}"),
        }
    }

    #[test]
    fn unmarked_json_is_classified_as_untagged() {
        let decoded =
            decode::<TestResultRecord>(r#"{"test": "test_json", "note": "just output"}"#)
                .expect("plain JSON decodes");
        assert!(matches!(decoded, Decoded::Untagged(_)));
        assert!(decoded.into_payload().is_none());
    }

    #[test]
    fn foreign_marker_value_is_untagged() {
        let decoded = decode::<TestResultRecord>(r#"{"__regatta__": "not-a-version"}"#)
            .expect("foreign marker decodes as untagged");
        assert!(matches!(decoded, Decoded::Untagged(_)));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err = decode::<TestResultRecord>(r#"{"__regatta__": 999, "payload": {}}"#)
            .expect_err("future version is rejected");
        assert!(matches!(
            err,
            EnvelopeError::UnsupportedVersion { found: 999 }
        ));
    }

    #[test]
    fn marked_message_with_bad_payload_is_an_error() {
        let err = decode::<TestResultRecord>(r#"{"__regatta__": 1, "payload": {"bogus": true}}"#)
            .expect_err("bad payload is rejected");
        assert!(matches!(err, EnvelopeError::Payload(_)));
    }

    #[test]
    fn non_json_is_a_syntax_error() {
        let err = decode::<TestResultRecord>("test_os passed in 1.5s")
            .expect_err("prose is not JSON");
        assert!(matches!(err, EnvelopeError::Syntax(_)));
    }
}
