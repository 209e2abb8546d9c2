// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Path expressions selecting a nested value inside an event.
//!
//! Syntax: an optional `$` root marker, dotted keys and `[n]` array indexes, e.g.
//! `$.detail.records[0]` or `detail.records`. The path must name at least one key.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl JsonPath {
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Value at this path, if every segment resolves.
    #[must_use]
    pub fn resolve<'a>(&self, fields: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.split_first()?;
        rest.iter()
            .try_fold(fields.get(first)?, |value, segment| match segment {
                PathSegment::Key(key) => value.as_object()?.get(key),
                PathSegment::Index(i) => value.as_array()?.get(*i),
            })
    }

    /// Mutable value at this path, if every segment resolves.
    pub fn resolve_mut<'a>(&self, fields: &'a mut Map<String, Value>) -> Option<&'a mut Value> {
        let (first, rest) = self.split_first()?;
        rest.iter()
            .try_fold(fields.get_mut(first)?, |value, segment| match segment {
                PathSegment::Key(key) => value.as_object_mut()?.get_mut(key),
                PathSegment::Index(i) => value.as_array_mut()?.get_mut(*i),
            })
    }

    fn split_first(&self) -> Option<(&str, &[PathSegment])> {
        match self.segments.split_first()? {
            (PathSegment::Key(key), rest) => Some((key.as_str(), rest)),
            (PathSegment::Index(_), _) => None,
        }
    }

    fn invalid(path: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for JsonPath {
    type Err = ConfigError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let body = path.trim();
        let body = match body.strip_prefix('$') {
            Some(rest) => rest.strip_prefix('.').unwrap_or(rest),
            None => body,
        };

        let mut segments = Vec::new();
        for part in body.split('.') {
            let (key, mut indexes) = match part.find('[') {
                Some(at) => (&part[..at], &part[at..]),
                None => (part, ""),
            };
            if key.is_empty() {
                if segments.is_empty() || indexes.is_empty() {
                    return Err(Self::invalid(path, "empty key"));
                }
            } else {
                segments.push(PathSegment::Key(key.to_string()));
            }

            while !indexes.is_empty() {
                let close = indexes
                    .find(']')
                    .ok_or_else(|| Self::invalid(path, "unclosed '['"))?;
                let index = indexes[1..close]
                    .parse::<usize>()
                    .map_err(|_| Self::invalid(path, "array index must be a non-negative integer"))?;
                segments.push(PathSegment::Index(index));
                indexes = &indexes[close + 1..];
                if !indexes.is_empty() && !indexes.starts_with('[') {
                    return Err(Self::invalid(path, "unexpected text after ']'"));
                }
            }
        }

        if !matches!(segments.first(), Some(PathSegment::Key(_))) {
            return Err(Self::invalid(path, "path must start with a key"));
        }

        Ok(JsonPath {
            raw: path.to_string(),
            segments,
        })
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
