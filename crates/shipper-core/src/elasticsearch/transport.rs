// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk API transport for a search cluster.
//!
//! Each event is written as an action line followed by the document:
//!
//! ```text
//! {"index":{"_index":"logs-2024.03.07","_id":"ba78..."}}
//! {"lvl":true,"n":42,"msg":"hello world"}
//! ```
//!
//! A bulk response is only a success when it is HTTP 200 and reports no item errors.
//! Item errors fail the whole batch, which is then retried as a unit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::constants;
use crate::elasticsearch::resolver::DestinationResolver;
use crate::error::{ConfigError, TransportError};
use crate::event::{Partitions, StructuredEvent};
use crate::transport::buffer::Batch;
use crate::transport::http::{HttpSettings, HttpTransport, ResponseClassifier, StatusOk};
use crate::transport::{DeliveryOutcome, DeliveryReport, Transport};

const BULK_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ElasticsearchTransportConfig {
    #[serde(flatten)]
    pub settings: HttpSettings,
    pub index: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default = "default_bulk_api_path")]
    pub bulk_api_path: String,
    /// strftime format appended to `index`.
    #[serde(default)]
    pub index_time_format: Option<String>,
    #[serde(default)]
    pub use_hashid: bool,
    #[serde(default)]
    pub use_partitions_for_routing: bool,
}

fn default_bulk_api_path() -> String {
    constants::DEFAULT_BULK_API_PATH.to_string()
}

impl ElasticsearchTransportConfig {
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings.validate()?;
        self.resolver()?;
        self.bulk_url().map(|_| ())
    }

    fn resolver(&self) -> Result<DestinationResolver, ConfigError> {
        DestinationResolver::new(
            &self.index,
            self.index_time_format.as_deref(),
            self.use_hashid,
            self.use_partitions_for_routing,
        )
    }

    fn bulk_url(&self) -> Result<Url, ConfigError> {
        if !self.bulk_api_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "bulk_api_path must start with '/': {}",
                self.bulk_api_path
            )));
        }
        self.settings
            .endpoint_url(Some(constants::DEFAULT_ELASTICSEARCH_PORT), &self.bulk_api_path)
    }
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkActionMeta<'a>,
}

#[derive(Serialize)]
struct BulkActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
    document_type: Option<&'a str>,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    #[serde(default)]
    error: Option<Value>,
}

/// HTTP 200 without item errors is success. Everything else is retried.
#[derive(Clone, Copy, Debug, Default)]
pub struct BulkResponseClassifier;

impl ResponseClassifier for BulkResponseClassifier {
    fn check_response(&self, status: StatusCode, body: &str) -> DeliveryOutcome {
        if status != StatusCode::OK {
            return StatusOk.check_response(status, body);
        }

        let response: BulkResponse = match serde_json::from_str(body) {
            Ok(response) => response,
            Err(e) => {
                return DeliveryOutcome::RetryableFailure(format!(
                    "unable to parse bulk response: {e}"
                ))
            }
        };
        if !response.errors {
            return DeliveryOutcome::Success;
        }

        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        for item in response.items.iter().flat_map(HashMap::values) {
            if let Some(error) = &item.error {
                let kind = match error {
                    Value::Object(fields) => fields
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string(),
                    Value::String(kind) => kind.clone(),
                    _ => "unknown".to_string(),
                };
                *failures.entry(kind).or_default() += 1;
            }
        }

        let failed: usize = failures.values().sum();
        let summary = failures
            .iter()
            .map(|(kind, count)| format!("{kind} ({count})"))
            .collect::<Vec<_>>()
            .join(", ");
        DeliveryOutcome::RetryableFailure(format!(
            "bulk request failed for {failed} of {} items: {summary}",
            response.items.len()
        ))
    }
}

pub struct ElasticsearchTransport {
    http: HttpTransport,
    resolver: DestinationResolver,
    document_type: Option<String>,
}

impl ElasticsearchTransport {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the client cannot be built.
    pub fn new(config: &ElasticsearchTransportConfig) -> Result<Self, ConfigError> {
        let resolver = config.resolver()?;
        let http = HttpTransport::new(
            config.bulk_url()?,
            &config.settings,
            BULK_CONTENT_TYPE,
            Arc::new(BulkResponseClassifier),
        )?;
        Ok(ElasticsearchTransport {
            http,
            resolver,
            document_type: config.document_type.clone(),
        })
    }

    #[must_use]
    pub fn http(&self) -> &HttpTransport {
        &self.http
    }

    /// Bulk URL for a batch from `partitions`, with the routing key as the `routing`
    /// query parameter when routing applies.
    #[must_use]
    pub fn bulk_url(&self, partitions: &Partitions) -> Url {
        let mut url = self.http.url().clone();
        if let Some(routing) = self.resolver.routing_key(partitions) {
            url.query_pairs_mut().append_pair("routing", &routing);
        }
        url
    }
}

#[async_trait]
impl Transport for ElasticsearchTransport {
    fn serialize(&self, event: &StructuredEvent) -> Result<Vec<u8>, TransportError> {
        let document = serde_json::to_vec(event)?;
        let index = self.resolver.index_name(Utc::now());
        let action = BulkAction {
            index: BulkActionMeta {
                index: &index,
                document_type: self.document_type.as_deref(),
                id: self.resolver.document_id(&document),
            },
        };

        let mut entry = serde_json::to_vec(&action)?;
        entry.reserve(document.len() + 2);
        entry.push(b'\n');
        entry.extend_from_slice(&document);
        entry.push(b'\n');
        Ok(entry)
    }

    fn new_batch(&self) -> Batch {
        Batch::new(self.http.batch_limits())
    }

    async fn send_batch(
        &self,
        batch: &Batch,
        partitions: &Partitions,
    ) -> Result<DeliveryReport, TransportError> {
        let url = self.bulk_url(partitions);
        debug!("Sending bulk request of {} documents to {url}", batch.len());
        self.http.send_payload(batch.payload(), &url).await
    }

    fn close(&self) {
        self.http.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    fn config_for(server: &ServerGuard) -> ElasticsearchTransportConfig {
        let url = Url::parse(&server.url()).unwrap();
        ElasticsearchTransportConfig {
            settings: HttpSettings {
                hostname: url.host_str().unwrap().to_string(),
                port: url.port(),
                retry_delay_ms: 1,
                max_retry_delay_ms: 2,
                ..HttpSettings::default()
            },
            index: "logs".to_string(),
            document_type: None,
            bulk_api_path: default_bulk_api_path(),
            index_time_format: None,
            use_hashid: false,
            use_partitions_for_routing: false,
        }
    }

    fn event(value: Value) -> StructuredEvent {
        serde_json::from_value(value).unwrap()
    }

    fn partitions() -> Partitions {
        [("part1", "foo"), ("part2", "bar")].into_iter().collect()
    }

    #[test]
    fn test_config_defaults() {
        let config: ElasticsearchTransportConfig = serde_json::from_value(json!({
            "hostname": "search.internal",
            "index": "logs"
        }))
        .unwrap();

        assert_eq!(config.bulk_api_path, "/_bulk");
        assert!(!config.use_hashid);
        assert!(!config.use_partitions_for_routing);
        assert_eq!(
            config.bulk_url().unwrap().as_str(),
            "http://search.internal:9200/_bulk"
        );
    }

    #[test]
    fn test_config_requires_index() {
        let result: Result<ElasticsearchTransportConfig, _> =
            serde_json::from_value(json!({"hostname": "search.internal"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_action_and_document() {
        let config = ElasticsearchTransportConfig {
            settings: HttpSettings {
                hostname: "localhost".to_string(),
                ..HttpSettings::default()
            },
            index: "logs".to_string(),
            document_type: Some("event".to_string()),
            bulk_api_path: default_bulk_api_path(),
            index_time_format: None,
            use_hashid: true,
            use_partitions_for_routing: false,
        };
        let transport = ElasticsearchTransport::new(&config).unwrap();
        let entry = transport.serialize(&event(json!({"msg": "hi"}))).unwrap();

        let text = String::from_utf8(entry).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'));

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        let id = transport.resolver.document_id(lines[1].as_bytes()).unwrap();
        assert_eq!(
            action,
            json!({"index": {"_index": "logs", "_type": "event", "_id": id}})
        );
        assert_eq!(lines[1], r#"{"msg":"hi"}"#);
    }

    #[test]
    fn test_serialize_without_id_or_type() {
        let config: ElasticsearchTransportConfig =
            serde_json::from_value(json!({"hostname": "localhost", "index": "logs"})).unwrap();
        let transport = ElasticsearchTransport::new(&config).unwrap();

        let entry = transport.serialize(&event(json!({"a": 1}))).unwrap();
        assert_eq!(entry, b"{\"index\":{\"_index\":\"logs\"}}\n{\"a\":1}\n".to_vec());
    }

    #[test]
    fn test_bulk_url_routing() {
        let mut config: ElasticsearchTransportConfig =
            serde_json::from_value(json!({"hostname": "localhost", "index": "logs"})).unwrap();

        let plain = ElasticsearchTransport::new(&config).unwrap();
        assert_eq!(plain.bulk_url(&partitions()).query(), None);

        config.use_partitions_for_routing = true;
        let routed = ElasticsearchTransport::new(&config).unwrap();
        let url = routed.bulk_url(&partitions());
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![("routing".to_string(), "part1=foo/part2=bar".to_string())]
        );
        assert_eq!(routed.bulk_url(&Partitions::new()).query(), None);
    }

    #[test]
    fn test_bulk_path_with_query_string() {
        let mut config: ElasticsearchTransportConfig = serde_json::from_value(json!({
            "hostname": "localhost",
            "index": "logs",
            "bulk_api_path": "/_bulk?pipeline=geoip"
        }))
        .unwrap();

        let transport = ElasticsearchTransport::new(&config).unwrap();
        assert_eq!(
            transport.bulk_url(&Partitions::new()).as_str(),
            "http://localhost:9200/_bulk?pipeline=geoip"
        );

        config.use_partitions_for_routing = true;
        let routed = ElasticsearchTransport::new(&config).unwrap();
        assert_eq!(
            routed.bulk_url(&partitions()).as_str(),
            "http://localhost:9200/_bulk?pipeline=geoip&routing=part1%3Dfoo%2Fpart2%3Dbar"
        );
    }

    #[tokio::test]
    async fn test_send_batch_with_routing() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/_bulk")
            .match_query(Matcher::UrlEncoded(
                "routing".to_string(),
                "part1=foo/part2=bar".to_string(),
            ))
            .match_header("content-type", BULK_CONTENT_TYPE)
            .match_body(
                "{\"index\":{\"_index\":\"logs\"}}\n{\"n\":1}\n{\"index\":{\"_index\":\"logs\"}}\n{\"n\":2}\n",
            )
            .with_status(200)
            .with_body(r#"{"took":3,"errors":false,"items":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let config = ElasticsearchTransportConfig {
            use_partitions_for_routing: true,
            ..config_for(&server)
        };
        let transport = ElasticsearchTransport::new(&config).unwrap();
        let mut batch = transport.new_batch();
        for n in 1..=2 {
            let entry = transport.serialize(&event(json!({"n": n}))).unwrap();
            batch.try_push(entry).unwrap();
        }

        let report = transport.send_batch(&batch, &partitions()).await.unwrap();
        assert_eq!(report.attempts, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_item_errors_retry_whole_batch() {
        let mut server = Server::new_async().await;
        let rejected = server
            .mock("POST", "/_bulk")
            .with_status(200)
            .with_body(
                json!({
                    "errors": true,
                    "items": [
                        {"index": {"status": 201}},
                        {"index": {"status": 429, "error": {"type": "es_rejected_execution_exception", "reason": "queue full"}}}
                    ]
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/_bulk")
            .with_status(200)
            .with_body(r#"{"errors":false,"items":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let config = ElasticsearchTransportConfig {
            settings: HttpSettings {
                retry_count: 1,
                ..config_for(&server).settings
            },
            ..config_for(&server)
        };
        let transport = ElasticsearchTransport::new(&config).unwrap();
        let mut batch = transport.new_batch();
        batch
            .try_push(transport.serialize(&event(json!({"n": 1}))).unwrap())
            .unwrap();

        let report = transport
            .send_batch(&batch, &Partitions::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 2);
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[test]
    fn test_bulk_classifier() {
        let classifier = BulkResponseClassifier;
        assert_eq!(
            classifier.check_response(StatusCode::OK, r#"{"errors":false}"#),
            DeliveryOutcome::Success
        );
        assert!(matches!(
            classifier.check_response(StatusCode::OK, "<html>proxy</html>"),
            DeliveryOutcome::RetryableFailure(reason) if reason.starts_with("unable to parse bulk response")
        ));
        assert!(matches!(
            classifier.check_response(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            DeliveryOutcome::RetryableFailure(reason) if reason.contains("\"Service Unavailable\"")
        ));

        let body = json!({
            "errors": true,
            "items": [
                {"index": {"error": {"type": "mapper_parsing_exception"}}},
                {"index": {"error": {"type": "mapper_parsing_exception"}}},
                {"create": {"error": "version_conflict"}},
                {"index": {"status": 201}}
            ]
        })
        .to_string();
        assert_eq!(
            classifier.check_response(StatusCode::OK, &body),
            DeliveryOutcome::RetryableFailure(
                "bulk request failed for 3 of 4 items: mapper_parsing_exception (2), version_conflict (1)"
                    .to_string()
            )
        );
    }
}
