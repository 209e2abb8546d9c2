// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Records and events flowing through the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Map;

pub use serde_json::Value;

/// Ordered provenance identifiers of the source subdivision a record came from,
/// e.g. a stream shard id or a source file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Partitions(Vec<(String, String)>);

impl Partitions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, keeping the position of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<K, V> FromIterator<(K, V)> for Partitions
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut partitions = Partitions::new();
        for (k, v) in iter {
            partitions.insert(k, v);
        }
        partitions
    }
}

/// One raw line as it arrived, plus where it came from. Consumed once by a deserializer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub payload: String,
    pub partitions: Partitions,
}

impl RawRecord {
    pub fn new(payload: impl Into<String>, partitions: Partitions) -> Self {
        RawRecord {
            payload: payload.into(),
            partitions,
        }
    }
}

/// Ordered mapping of unique field names to typed values.
///
/// Field order is insertion order and survives serialization, so events keep the
/// shape the deserializer gave them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredEvent {
    fields: Map<String, Value>,
}

impl StructuredEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `value`, returning the value it replaces.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(name.into(), value)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for StructuredEvent {
    fn from(fields: Map<String, Value>) -> Self {
        StructuredEvent { fields }
    }
}
