// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration.
//!
//! Loaded from a YAML file, then overridden by `SHIPPER_` prefixed environment
//! variables. Nested keys are separated by `__`, so `SHIPPER_TRANSPORT__HOSTNAME`
//! overrides `transport.hostname`.
//!
//! ```yaml
//! log_level: info
//! deserializer:
//!   type: regex
//!   regex: '(\w+) (\d+)'
//!   fields:
//!     - name: word
//!       type: STRING
//!     - name: count
//!       type: NUMBER
//! operations:
//!   - type: json_array_split
//!     path: records
//! transport:
//!   type: elasticsearch
//!   hostname: search.internal
//!   index: logs-
//!   index_time_format: '%Y.%m.%d'
//!   retry_count: 3
//! ```

pub mod log_level;

use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;
use tracing::debug;

use crate::deserializer::DeserializerConfig;
use crate::error::ConfigError;
use crate::event::Partitions;
use crate::operation::OperationConfig;
use crate::transport::TransportConfig;

use self::log_level::LogLevel;

pub const ENV_PREFIX: &str = "SHIPPER_";

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevel,
    pub deserializer: DeserializerConfig,
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
    pub transport: TransportConfig,
}

impl Config {
    /// Loads `path` (a missing file contributes nothing) under the environment
    /// overrides, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when the sources do not form a configuration,
    /// or the first validation error.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        debug!("Loading configuration from {}", path.display());
        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Config::from_figment(&figment)
    }

    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn from_figment(figment: &Figment) -> Result<Config, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Builds every configured component once, without opening connections.
    ///
    /// # Errors
    ///
    /// Returns the first invalid pattern, field list, path or transport setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.deserializer.build()?;
        for operation in &self.operations {
            operation.build()?;
        }
        self.transport.validate()
    }
}

/// Parses `key=value` pairs separated by commas, keeping their order.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for a pair without `=` or with an empty key.
pub fn parse_partitions(value: &str) -> Result<Partitions, ConfigError> {
    let mut partitions = Partitions::new();
    for pair in value.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                partitions.insert(key.trim(), value.trim());
            }
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "invalid partition \"{pair}\", expected key=value"
                )))
            }
        }
    }
    Ok(partitions)
}
