// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic HTTP transport.
//!
//! Every attempt borrows a connection from the [`ConnectionPool`], POSTs the
//! (optionally compressed) batch payload and reads the response body. The connection
//! is returned before the response is classified. Only HTTP 200 counts as delivered
//! unless a destination supplies its own [`ResponseClassifier`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE,
};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::constants;
use crate::error::{ConfigError, TransportError};
use crate::event::{Partitions, StructuredEvent};
use crate::transport::buffer::{Batch, BatchLimits};
use crate::transport::compression::{Codec, Compression};
use crate::transport::pool::ConnectionPool;
use crate::transport::retry::{RetryDecision, RetryPolicy};
use crate::transport::{DeliveryOutcome, DeliveryReport, Transport};

const COMPRESSED_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    Basic { username: String, password: String },
}

/// Connection, retry, compression and batching settings shared by HTTP based
/// transports.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub hostname: String,
    /// Scheme default (or the destination's default) when unset.
    pub port: Option<u16>,
    pub use_ssl: bool,
    #[serde(alias = "use_gzip")]
    pub use_compression: bool,
    pub compression: Compression,
    pub compression_level: Option<i32>,
    /// Additional tries after the first one.
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_connections: usize,
    pub max_batch_entries: usize,
    pub max_batch_bytes: usize,
    pub http_headers: BTreeMap<String, String>,
    pub auth: Option<AuthConfig>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            hostname: String::new(),
            port: None,
            use_ssl: false,
            use_compression: false,
            compression: Compression::default(),
            compression_level: None,
            retry_count: 0,
            retry_delay_ms: constants::DEFAULT_RETRY_DELAY_MS,
            max_retry_delay_ms: constants::DEFAULT_MAX_RETRY_DELAY_MS,
            timeout_ms: constants::DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: constants::DEFAULT_CONNECT_TIMEOUT_MS,
            max_connections: constants::DEFAULT_MAX_CONNECTIONS,
            max_batch_entries: constants::DEFAULT_MAX_BATCH_ENTRIES,
            max_batch_bytes: constants::DEFAULT_MAX_BATCH_BYTES,
            http_headers: BTreeMap::new(),
            auth: None,
        }
    }
}

impl HttpSettings {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("transport hostname is required".to_string()));
        }
        if self.port == Some(0) {
            return Err(ConfigError::Invalid("transport port must be at least 1".to_string()));
        }
        if self.max_batch_entries == 0 || self.max_batch_bytes == 0 {
            return Err(ConfigError::Invalid(
                "batch limits must be at least 1".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".to_string(),
            ));
        }
        self.static_headers().map(|_| ())
    }

    /// `http(s)://hostname:port` with no path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the hostname does not form a URL.
    pub fn base_url(&self, default_port: Option<u16>) -> Result<Url, ConfigError> {
        let scheme = if self.use_ssl { "https" } else { "http" };
        let mut url = Url::parse(&format!("{scheme}://{}", self.hostname.trim()))
            .map_err(|e| ConfigError::Invalid(format!("invalid hostname: {e}")))?;
        if url.path() != "/" || url.query().is_some() {
            return Err(ConfigError::Invalid(format!(
                "hostname must not carry a path: {}",
                self.hostname
            )));
        }
        if let Some(port) = self.port.or(default_port) {
            url.set_port(Some(port))
                .map_err(|()| ConfigError::Invalid(format!("cannot set port {port}")))?;
        }
        Ok(url)
    }

    /// [`HttpSettings::base_url`] with `path` appended. A `?` in `path` starts the query.
    ///
    /// # Errors
    ///
    /// Same as [`HttpSettings::base_url`].
    pub fn endpoint_url(&self, default_port: Option<u16>, path: &str) -> Result<Url, ConfigError> {
        let mut url = self.base_url(default_port)?;
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query).filter(|q| !q.is_empty())),
            None => (path, None),
        };
        url.set_path(path);
        url.set_query(query);
        Ok(url)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry_count,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms.max(self.retry_delay_ms)),
        }
    }

    #[must_use]
    pub fn codec(&self) -> Option<Codec> {
        self.use_compression.then_some(Codec {
            compression: self.compression,
            level: self.compression_level,
        })
    }

    #[must_use]
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_entries: self.max_batch_entries,
            max_bytes: self.max_batch_bytes,
        }
    }

    fn static_headers(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.http_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConfigError::Invalid(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConfigError::Invalid(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Headers attached to every request: configured headers, then content headers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a header that is not valid HTTP.
    pub fn request_headers(&self, content_type: &str) -> Result<HeaderMap, ConfigError> {
        let mut headers = self.static_headers()?;
        match self.codec() {
            Some(codec) => {
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(COMPRESSED_CONTENT_TYPE),
                );
                headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
                headers.insert(
                    CONTENT_ENCODING,
                    HeaderValue::from_static(codec.compression.content_encoding()),
                );
            }
            None => {
                let value = HeaderValue::from_str(content_type).map_err(|e| {
                    ConfigError::Invalid(format!("invalid content type {content_type}: {e}"))
                })?;
                headers.insert(CONTENT_TYPE, value);
            }
        }
        Ok(headers)
    }
}

/// Builds the pooled HTTP client for a transport.
///
/// # Errors
///
/// Returns [`ConfigError::Client`] if the TLS backend cannot be initialised.
pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(settings.timeout_ms))
        .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
        .pool_idle_timeout(Some(constants::POOL_IDLE_TIMEOUT))
        .pool_max_idle_per_host(settings.max_connections)
        // Detect dead connections.
        .tcp_keepalive(Some(constants::TCP_KEEPALIVE))
        .build()
        .map_err(|e| ConfigError::Client(e.to_string()))
}

/// Decides whether a response means the batch was delivered.
pub trait ResponseClassifier: Send + Sync {
    fn check_response(&self, status: StatusCode, body: &str) -> DeliveryOutcome;
}

/// Exactly HTTP 200 is success, every other status is retried.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusOk;

impl ResponseClassifier for StatusOk {
    fn check_response(&self, status: StatusCode, body: &str) -> DeliveryOutcome {
        if status == StatusCode::OK {
            return DeliveryOutcome::Success;
        }
        DeliveryOutcome::RetryableFailure(format!(
            "http transport call failed because \"{}\" payload response \"{body}\"",
            reason_phrase(status)
        ))
    }
}

#[must_use]
pub fn reason_phrase(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_string(), str::to_string)
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct HttpTransportConfig {
    #[serde(flatten)]
    pub settings: HttpSettings,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// The transport engine: compression, pooled POSTs, classification and retries.
pub struct HttpTransport {
    url: Url,
    pool: ConnectionPool,
    headers: HeaderMap,
    auth: Option<AuthConfig>,
    codec: Option<Codec>,
    retry: RetryPolicy,
    limits: BatchLimits,
    classifier: Arc<dyn ResponseClassifier>,
}

impl HttpTransport {
    /// Transport POSTing to `url` by default.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid settings or if the client cannot be built.
    pub fn new(
        url: Url,
        settings: &HttpSettings,
        content_type: &str,
        classifier: Arc<dyn ResponseClassifier>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let client = build_client(settings)?;
        Ok(HttpTransport {
            url,
            pool: ConnectionPool::new(client, settings.max_connections),
            headers: settings.request_headers(content_type)?,
            auth: settings.auth.clone(),
            codec: settings.codec(),
            retry: settings.retry_policy(),
            limits: settings.batch_limits(),
            classifier,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the endpoint or settings are invalid.
    pub fn from_config(config: &HttpTransportConfig) -> Result<Self, ConfigError> {
        let url = config.settings.endpoint_url(None, &config.path)?;
        HttpTransport::new(url, &config.settings, &config.content_type, Arc::new(StatusOk))
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    #[must_use]
    pub fn batch_limits(&self) -> BatchLimits {
        self.limits
    }

    /// Sends `payload` to `url` until it is delivered, a fatal failure occurs or the
    /// retry budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::RetriesExhausted`] carrying the last failure,
    /// [`TransportError::Fatal`] for a non-retryable failure, or
    /// [`TransportError::Compression`] if the payload could not be encoded.
    pub async fn send_payload(
        &self,
        payload: Bytes,
        url: &Url,
    ) -> Result<DeliveryReport, TransportError> {
        let raw_len = payload.len();
        let body = match &self.codec {
            Some(codec) => Bytes::from(codec.encode(&payload)?),
            None => payload,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = self.attempt(body.clone(), url).await;
            let reason = match &outcome {
                DeliveryOutcome::Success => {
                    debug!(
                        "Delivered {raw_len} bytes ({} on the wire) to {url} after {attempts} attempts",
                        body.len()
                    );
                    return Ok(DeliveryReport { attempts });
                }
                DeliveryOutcome::RetryableFailure(reason) | DeliveryOutcome::FatalFailure(reason) => {
                    reason.clone()
                }
            };

            match self.retry.next(attempts, &outcome) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "Attempt {attempts} to {url} failed: {reason}, retrying in {} ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Stop => {
                    if let DeliveryOutcome::FatalFailure(_) = outcome {
                        error!("Transport to {url} failed without retry: {reason}");
                        return Err(TransportError::Fatal { attempts, reason });
                    }
                    warn!("transport failed after {attempts} tries.");
                    return Err(TransportError::RetriesExhausted {
                        attempts,
                        last_failure: reason,
                    });
                }
            }
        }
    }

    /// One POST. The pooled connection is released before the response is classified.
    async fn attempt(&self, body: Bytes, url: &Url) -> DeliveryOutcome {
        let (status, text) = {
            let connection = match self.pool.acquire().await {
                Ok(connection) => connection,
                Err(e) => return DeliveryOutcome::FatalFailure(e.to_string()),
            };

            let mut request = connection
                .client()
                .post(url.clone())
                .headers(self.headers.clone())
                .body(body);
            if let Some(AuthConfig::Basic { username, password }) = &self.auth {
                request = request.basic_auth(username, Some(password));
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_builder() => {
                    return DeliveryOutcome::FatalFailure(format!("invalid request: {e}"));
                }
                Err(e) => {
                    return DeliveryOutcome::RetryableFailure(format!(
                        "http transport call failed because {e}"
                    ));
                }
            };

            let status = response.status();
            match response.text().await {
                Ok(text) => (status, text),
                Err(e) => {
                    debug!("Failed to read response body: {e}");
                    return DeliveryOutcome::RetryableFailure(format!(
                        "http transport call failed because {}",
                        reason_phrase(status)
                    ));
                }
            }
        };

        self.classifier.check_response(status, &text)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn serialize(&self, event: &StructuredEvent) -> Result<Vec<u8>, TransportError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        Ok(line)
    }

    fn new_batch(&self) -> Batch {
        Batch::new(self.limits)
    }

    async fn send_batch(
        &self,
        batch: &Batch,
        _partitions: &Partitions,
    ) -> Result<DeliveryReport, TransportError> {
        self.send_payload(batch.payload(), &self.url).await
    }

    fn close(&self) {
        self.pool.close();
    }
}
