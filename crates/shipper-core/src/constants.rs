// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Default limits for batching and delivery.

use std::time::Duration;

/// Maximum number of serialized events per batch.
pub const DEFAULT_MAX_BATCH_ENTRIES: usize = 500;

/// Maximum uncompressed payload size of one batch in bytes (5MB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 5 * 1_024 * 1_024;

/// Delay before the first retry. Later retries double it.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Upper bound for any single backoff interval.
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 60_000;

/// Overall per-request timeout handed to the HTTP client.
pub const DEFAULT_TIMEOUT_MS: u64 = 40_000;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Number of requests allowed in flight against one pool at the same time.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

pub const DEFAULT_ELASTICSEARCH_PORT: u16 = 9200;

pub const DEFAULT_BULK_API_PATH: &str = "/_bulk";

/// Idle pooled connections are closed after this long.
pub(crate) const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(270);

pub(crate) const TCP_KEEPALIVE: Duration = Duration::from_secs(120);
