// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;
use tracing::debug;

use crate::event::StructuredEvent;
use crate::operation::path::JsonPath;
use crate::operation::{EventIter, Operation};

/// Re-roots an event at the object found at `root_path`, dropping its siblings.
///
/// Events where the path does not lead to an object pass through unchanged.
#[derive(Clone, Debug)]
pub struct RootNodeOperation {
    root_path: JsonPath,
}

impl RootNodeOperation {
    #[must_use]
    pub fn new(root_path: JsonPath) -> Self {
        RootNodeOperation { root_path }
    }
}

impl Operation for RootNodeOperation {
    fn apply(&self, event: StructuredEvent) -> EventIter {
        if !matches!(self.root_path.resolve(event.fields()), Some(Value::Object(_))) {
            debug!("Root path {} not found, passing event through", self.root_path);
            return Box::new(std::iter::once(event));
        }

        let mut fields = event.into_fields();
        let taken = self.root_path.resolve_mut(&mut fields).map(Value::take);
        let node = match taken {
            Some(Value::Object(node)) => node,
            _ => fields,
        };
        Box::new(std::iter::once(StructuredEvent::from(node)))
    }
}
