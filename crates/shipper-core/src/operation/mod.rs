// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transform units applied to events between extraction and delivery.
//!
//! An operation consumes one event and yields zero or more: zero drops the event,
//! more than one fans it out. Operations are built once and shared by every
//! invocation, so they hold no per-call state. An operation that cannot find its
//! target passes the event through unchanged.
//!
//! ```yaml
//! operations:
//!   - type: json_root_node
//!     root_path: $.detail
//!   - type: json_array_split
//!     path: $.records
//! ```

pub mod array_split;
pub mod path;
pub mod root_node;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::event::StructuredEvent;

use self::array_split::ArraySplitOperation;
use self::root_node::RootNodeOperation;

/// Lazy, finite sequence of events produced by one [`Operation::apply`].
pub type EventIter = Box<dyn Iterator<Item = StructuredEvent> + Send>;

pub trait Operation: Send + Sync {
    fn apply(&self, event: StructuredEvent) -> EventIter;
}

/// Declared operation variants, keyed by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationConfig {
    JsonRootNode { root_path: String },
    JsonArraySplit { path: String },
}

impl OperationConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPath`] if the configured path does not parse.
    pub fn build(&self) -> Result<Box<dyn Operation>, ConfigError> {
        let operation: Box<dyn Operation> = match self {
            OperationConfig::JsonRootNode { root_path } => {
                Box::new(RootNodeOperation::new(root_path.parse()?))
            }
            OperationConfig::JsonArraySplit { path } => {
                Box::new(ArraySplitOperation::new(path.parse()?))
            }
        };
        Ok(operation)
    }
}

/// Runs `event` through `operations` in order, keeping the order of produced events.
#[must_use]
pub fn apply_all(operations: &[Box<dyn Operation>], event: StructuredEvent) -> Vec<StructuredEvent> {
    operations.iter().fold(vec![event], |events, operation| {
        events
            .into_iter()
            .flat_map(|event| operation.apply(event))
            .collect()
    })
}
