// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pattern-based field extraction.
//!
//! The whole raw line must match the pattern. Capture group `i` (1-indexed) is bound to
//! the field at position `i - 1`, coerced to that field's declared type:
//!
//! - **BOOLEAN**: `true` in any case is `true`, every other text is `false`. Never fails.
//! - **NUMBER**: decimal or `0x` hexadecimal integers, or floating point when the text has
//!   a fraction or exponent. Anything else is a [`CoercionError`].
//! - **STRING**: the captured text, unchanged.
//!
//! Groups beyond the field list are ignored and fields beyond the group count are
//! skipped. Groups that did not take part in the match bind nothing.

use std::collections::HashSet;
use std::num::IntErrorKind;

use regex::Regex;
use regex_syntax::ast::parse::Parser;
use regex_syntax::ast::print::Printer;
use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::deserializer::Deserializer;
use crate::error::{CoercionError, CoercionReason, ConfigError, DeserializeError};
use crate::event::StructuredEvent;

/// Declared type of an extracted field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FieldType {
    Boolean,
    Number,
    #[default]
    String,
}

impl FieldType {
    fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" => FieldType::Boolean,
            "NUMBER" => FieldType::Number,
            "STRING" => FieldType::String,
            other => {
                warn!("Unknown field type '{other}', treating it as STRING");
                FieldType::String
            }
        }
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(FieldType::from_name(&name))
    }
}

/// Name and type of one positional field.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSpec {
            name: name.into(),
            field_type,
        }
    }
}

#[derive(Debug)]
pub struct RegexDeserializer {
    pattern: Regex,
    fields: Vec<FieldSpec>,
}

impl RegexDeserializer {
    /// Compiles `pattern` for whole-line matching.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile or two fields share a name.
    pub fn new(pattern: &str, fields: Vec<FieldSpec>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::DuplicateField(field.name.clone()));
            }
        }

        let pattern = Regex::new(&format!(r"\A(?:{})\z", normalize(pattern)?))?;
        let groups = pattern.captures_len() - 1;
        if groups != fields.len() {
            debug!(
                "Pattern has {groups} capture groups for {} fields, extra entries are ignored",
                fields.len()
            );
        }

        Ok(RegexDeserializer { pattern, fields })
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

impl Deserializer for RegexDeserializer {
    fn deserialize(&self, raw: &str) -> Result<StructuredEvent, DeserializeError> {
        let captures = self
            .pattern
            .captures(raw)
            .ok_or(DeserializeError::NoMatch)?;

        let mut event = StructuredEvent::new();
        let mut failures = Vec::new();
        for (group, field) in captures.iter().skip(1).zip(&self.fields) {
            let Some(group) = group else {
                continue;
            };
            match coerce(group.as_str(), field.field_type) {
                Ok(value) => {
                    event.insert(field.name.as_str(), value);
                }
                Err(reason) => failures.push(CoercionError {
                    field: field.name.clone(),
                    text: group.as_str().to_string(),
                    reason,
                }),
            }
        }

        if failures.is_empty() {
            Ok(event)
        } else {
            Err(DeserializeError::Coercion(failures))
        }
    }
}

/// Reprints `pattern` from its syntax tree. Comments and insignificant whitespace of
/// verbose mode are gone, so a trailing `# comment` cannot swallow what is appended.
fn normalize(pattern: &str) -> Result<String, ConfigError> {
    let ast = Parser::new()
        .parse(pattern)
        .map_err(|e| regex::Error::Syntax(e.to_string()))?;
    let mut printed = String::with_capacity(pattern.len());
    Printer::new()
        .print(&ast, &mut printed)
        .map_err(|e| ConfigError::Invalid(format!("cannot print pattern: {e}")))?;
    Ok(printed)
}

/// Converts captured text to `field_type`.
///
/// # Errors
///
/// Only [`FieldType::Number`] can fail.
pub fn coerce(text: &str, field_type: FieldType) -> Result<Value, CoercionReason> {
    match field_type {
        // Non-boolean text is false, never an error.
        FieldType::Boolean => Ok(Value::Bool(text.eq_ignore_ascii_case("true"))),
        FieldType::Number => parse_number(text).map(Value::Number),
        FieldType::String => Ok(Value::String(text.to_string())),
    }
}

fn parse_number(text: &str) -> Result<Number, CoercionReason> {
    if text.is_empty() {
        return Err(CoercionReason::Empty);
    }

    let (negative, unsigned) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };

    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        return parse_hex(hex, negative);
    }

    if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return match text.parse::<i64>() {
            Ok(n) => Ok(Number::from(n)),
            Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow) => text
                .trim_start_matches('+')
                .parse::<u64>()
                .map(Number::from)
                .map_err(|_| CoercionReason::OutOfRange),
            Err(_) => Err(CoercionReason::OutOfRange),
        };
    }

    if unsigned.contains(['.', 'e', 'E']) {
        let float = text
            .parse::<f64>()
            .map_err(|_| CoercionReason::InvalidNumber)?;
        return Number::from_f64(float).ok_or(CoercionReason::NotFinite);
    }

    Err(CoercionReason::InvalidNumber)
}

fn parse_hex(digits: &str, negative: bool) -> Result<Number, CoercionReason> {
    // from_str_radix takes its own sign.
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoercionReason::InvalidNumber);
    }
    let magnitude = u64::from_str_radix(digits, 16).map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => CoercionReason::OutOfRange,
        _ => CoercionReason::InvalidNumber,
    })?;

    if negative {
        let value = -i128::from(magnitude);
        i64::try_from(value)
            .map(Number::from)
            .map_err(|_| CoercionReason::OutOfRange)
    } else {
        Ok(i64::try_from(magnitude).map_or_else(|_| Number::from(magnitude), Number::from))
    }
}
