// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deserializers turn one raw line into a [`StructuredEvent`].
//!
//! A deserializer is built once from its configuration and then shared by every
//! invocation, so implementations hold only immutable state.
//!
//! # Configuration
//!
//! ```yaml
//! deserializer:
//!   type: regex
//!   regex: '^(\w+) (\d+) (.*)$'
//!   fields:
//!     - name: lvl
//!       type: BOOLEAN
//!     - name: n
//!       type: NUMBER
//!     - name: msg
//!       type: STRING
//! ```

pub mod regex;

use serde::Deserialize;

use crate::error::{ConfigError, DeserializeError};
use crate::event::StructuredEvent;

use self::regex::{FieldSpec, RegexDeserializer};

/// Converts raw text into a structured event.
///
/// Failures are per record: the caller counts them and moves on to the next record.
pub trait Deserializer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`DeserializeError::NoMatch`] when `raw` does not have the expected shape
    /// and [`DeserializeError::Coercion`] when a field cannot take its declared type.
    fn deserialize(&self, raw: &str) -> Result<StructuredEvent, DeserializeError>;
}

/// Declared deserializer variants, keyed by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeserializerConfig {
    Regex(RegexDeserializerConfig),
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RegexDeserializerConfig {
    pub regex: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl DeserializerConfig {
    /// Builds the configured deserializer.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile or a field name repeats.
    pub fn build(&self) -> Result<Box<dyn Deserializer>, ConfigError> {
        match self {
            DeserializerConfig::Regex(config) => Ok(Box::new(RegexDeserializer::new(
                &config.regex,
                config.fields.clone(),
            )?)),
        }
    }
}
