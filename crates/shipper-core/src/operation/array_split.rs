// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;
use tracing::debug;

use crate::event::StructuredEvent;
use crate::operation::path::JsonPath;
use crate::operation::{EventIter, Operation};

/// Fans an event out into one event per object element of the array at `path`.
///
/// Non-object elements are skipped. Events without an array at `path` pass through.
#[derive(Clone, Debug)]
pub struct ArraySplitOperation {
    path: JsonPath,
}

impl ArraySplitOperation {
    #[must_use]
    pub fn new(path: JsonPath) -> Self {
        ArraySplitOperation { path }
    }
}

impl Operation for ArraySplitOperation {
    fn apply(&self, event: StructuredEvent) -> EventIter {
        if !matches!(self.path.resolve(event.fields()), Some(Value::Array(_))) {
            debug!("No array at {}, passing event through", self.path);
            return Box::new(std::iter::once(event));
        }

        let mut fields = event.into_fields();
        let taken = self.path.resolve_mut(&mut fields).map(Value::take);
        let Some(Value::Array(elements)) = taken else {
            return Box::new(std::iter::once(StructuredEvent::from(fields)));
        };

        Box::new(elements.into_iter().filter_map(|element| match element {
            Value::Object(map) => Some(StructuredEvent::from(map)),
            _ => None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(path: &str, value: Value) -> Vec<Value> {
        let operation = ArraySplitOperation::new(path.parse().unwrap());
        let event: StructuredEvent = serde_json::from_value(value).unwrap();
        operation
            .apply(event)
            .map(|e| serde_json::to_value(e).unwrap())
            .collect()
    }

    #[test]
    fn test_splits_objects_in_order() {
        let out = apply(
            "$.records",
            json!({"records": [{"id": 1}, "skip", {"id": 2}, 3, {"id": 3}]}),
        );
        assert_eq!(out, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
    }

    #[test]
    fn test_empty_array_drops_event() {
        assert!(apply("records", json!({"records": []})).is_empty());
    }

    #[test]
    fn test_missing_array_passes_through() {
        let original = json!({"records": {"id": 1}});
        assert_eq!(apply("records", original.clone()), vec![original]);
    }
}
