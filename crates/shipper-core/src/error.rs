// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by the pipeline stages.
//!
//! Record-level errors ([`DeserializeError`], [`CoercionError`]) only ever affect the
//! offending record. [`TransportError`] is batch-level: the whole batch was either
//! delivered or it was not.

use std::fmt;

/// A raw record could not be turned into a structured event.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeserializeError {
    #[error("raw event does not match pattern")]
    NoMatch,

    #[error("failed to coerce record fields: {}", join_failures(.0))]
    Coercion(Vec<CoercionError>),
}

impl DeserializeError {
    /// Failures of individual fields, empty for a pattern mismatch.
    #[must_use]
    pub fn coercion_failures(&self) -> &[CoercionError] {
        match self {
            DeserializeError::NoMatch => &[],
            DeserializeError::Coercion(failures) => failures,
        }
    }
}

fn join_failures(failures: &[CoercionError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a captured value could not be converted to its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionReason {
    Empty,
    InvalidNumber,
    OutOfRange,
    NotFinite,
}

impl fmt::Display for CoercionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CoercionReason::Empty => "empty text",
            CoercionReason::InvalidNumber => "not a number",
            CoercionReason::OutOfRange => "number out of range",
            CoercionReason::NotFinite => "number is not finite",
        };
        f.write_str(reason)
    }
}

/// One field whose captured text does not parse as its declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field \"{field}\": cannot coerce \"{text}\" ({reason})")]
pub struct CoercionError {
    pub field: String,
    pub text: String,
    pub reason: CoercionReason,
}

/// A batch could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport failed after {attempts} tries: {last_failure}")]
    RetriesExhausted { attempts: u32, last_failure: String },

    #[error("transport failed with a non-retryable error after {attempts} tries: {reason}")]
    Fatal { attempts: u32, reason: String },

    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to compress payload: {0}")]
    Compression(#[from] std::io::Error),
}

impl TransportError {
    /// Number of HTTP attempts made before giving up. Zero when the batch never left
    /// the process.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            TransportError::RetriesExhausted { attempts, .. }
            | TransportError::Fatal { attempts, .. } => *attempts,
            TransportError::Serialize(_) | TransportError::Compression(_) => 0,
        }
    }
}

/// Configuration could not be loaded or a component could not be built from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid path expression \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("field \"{0}\" is declared more than once")]
    DuplicateField(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coercion_error_display_names_field() {
        let error = CoercionError {
            field: "n".to_string(),
            text: "xx".to_string(),
            reason: CoercionReason::InvalidNumber,
        };
        assert_eq!(
            error.to_string(),
            "field \"n\": cannot coerce \"xx\" (not a number)"
        );
    }

    #[test]
    fn test_deserialize_error_lists_every_failure() {
        let error = DeserializeError::Coercion(vec![
            CoercionError {
                field: "a".to_string(),
                text: "x".to_string(),
                reason: CoercionReason::InvalidNumber,
            },
            CoercionError {
                field: "b".to_string(),
                text: String::new(),
                reason: CoercionReason::Empty,
            },
        ]);
        let display = error.to_string();
        assert!(display.contains("field \"a\""));
        assert!(display.contains("field \"b\""));
        assert_eq!(error.coercion_failures().len(), 2);
        assert!(DeserializeError::NoMatch.coercion_failures().is_empty());
    }

    #[test]
    fn test_transport_error_attempts() {
        let exhausted = TransportError::RetriesExhausted {
            attempts: 4,
            last_failure: "boom".to_string(),
        };
        assert_eq!(exhausted.attempts(), 4);
        assert_eq!(
            exhausted.to_string(),
            "transport failed after 4 tries: boom"
        );

        let io = TransportError::Compression(std::io::Error::other("disk"));
        assert_eq!(io.attempts(), 0);
    }
}
