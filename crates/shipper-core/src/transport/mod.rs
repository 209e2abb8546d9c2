// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized batches to a remote sink.
//!
//! # Architecture
//!
//! ```text
//!   Batch (serialized events)
//!          │
//!          v
//!   ┌─────────────┐
//!   │  Compress   │ (gzip/zstd, optional)
//!   └──────┬──────┘
//!          │
//!          v
//!   ┌─────────────┐     ┌──────────────────┐
//!   │ HTTP POST   │<────│ Connection pool  │ (scoped acquire/release)
//!   └──────┬──────┘     └──────────────────┘
//!          │
//!          v
//!   ┌─────────────┐
//!   │  Classify   │ (Success / RetryableFailure / FatalFailure)
//!   └──────┬──────┘
//!          │
//!          v
//!   ┌─────────────┐
//!   │ RetryPolicy │ (exponential backoff, retries + 1 tries)
//!   └─────────────┘
//! ```
//!
//! A batch is delivered as a whole or not at all.

pub mod buffer;
pub mod compression;
pub mod http;
pub mod pool;
pub mod retry;

use async_trait::async_trait;
use serde::Deserialize;

use crate::elasticsearch::transport::{ElasticsearchTransport, ElasticsearchTransportConfig};
use crate::error::{ConfigError, TransportError};
use crate::event::{Partitions, StructuredEvent};

use self::buffer::Batch;
use self::http::{HttpTransport, HttpTransportConfig};

/// Terminal result of a single send attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    RetryableFailure(String),
    FatalFailure(String),
}

impl DeliveryOutcome {
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            DeliveryOutcome::Success => None,
            DeliveryOutcome::RetryableFailure(reason) | DeliveryOutcome::FatalFailure(reason) => {
                Some(reason)
            }
        }
    }
}

/// A batch made it to the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: u32,
}

/// Serializes events and delivers batches of them.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wire form of one event, as appended to a [`Batch`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Serialize`] if the event cannot be encoded.
    fn serialize(&self, event: &StructuredEvent) -> Result<Vec<u8>, TransportError>;

    /// Empty batch bounded by this transport's limits.
    fn new_batch(&self) -> Batch;

    /// Delivers `batch`, retrying per the configured policy.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the batch was not delivered.
    async fn send_batch(
        &self,
        batch: &Batch,
        partitions: &Partitions,
    ) -> Result<DeliveryReport, TransportError>;

    /// Tears down the connection pool. Later sends fail without retrying.
    fn close(&self);
}

/// Declared transport variants, keyed by `type`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Http(HttpTransportConfig),
    Elasticsearch(ElasticsearchTransportConfig),
}

impl TransportConfig {
    /// Builds the transport and its connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint, headers or limits are invalid.
    pub fn build(&self) -> Result<Box<dyn Transport>, ConfigError> {
        let transport: Box<dyn Transport> = match self {
            TransportConfig::Http(config) => Box::new(HttpTransport::from_config(config)?),
            TransportConfig::Elasticsearch(config) => {
                Box::new(ElasticsearchTransport::new(config)?)
            }
        };
        Ok(transport)
    }

    /// Checks the configuration without opening connections.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TransportConfig::Http(config) => {
                config.settings.validate()?;
                config.settings.base_url(None).map(|_| ())
            }
            TransportConfig::Elasticsearch(config) => config.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_reason() {
        assert_eq!(DeliveryOutcome::Success.reason(), None);
        assert_eq!(
            DeliveryOutcome::RetryableFailure("boom".to_string()).reason(),
            Some("boom")
        );
        assert_eq!(
            DeliveryOutcome::FatalFailure("closed".to_string()).reason(),
            Some("closed")
        );
    }

    #[test]
    fn test_transport_config_variants() {
        let http: TransportConfig = serde_json::from_value(json!({
            "type": "http",
            "hostname": "localhost",
            "port": 8080,
            "path": "/ingest"
        }))
        .unwrap();
        assert!(matches!(http, TransportConfig::Http(_)));
        assert!(http.validate().is_ok());

        let es: TransportConfig = serde_json::from_value(json!({
            "type": "elasticsearch",
            "hostname": "localhost",
            "index": "logs"
        }))
        .unwrap();
        assert!(matches!(es, TransportConfig::Elasticsearch(_)));
        assert!(es.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_limit() {
        let config: TransportConfig = serde_json::from_value(json!({
            "type": "http",
            "hostname": "localhost",
            "max_batch_entries": 0
        }))
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
