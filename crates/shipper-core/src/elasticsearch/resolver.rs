// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where a document goes in the search cluster.
//!
//! - **Index name**: the configured base, followed by the current UTC time formatted
//!   with `index_time_format` (strftime syntax) when one is set. The format is appended
//!   as is, so a separator belongs in the format, e.g. `-%Y.%m.%d`.
//! - **Document id**: lowercase hex SHA-256 of the serialized document when hash ids
//!   are enabled, so re-delivering a batch overwrites instead of duplicating.
//! - **Routing key**: partition pairs as `key=value` joined with `/`, e.g.
//!   `part1=foo/part2=bar`. Routing on one source partition keeps its documents on one
//!   shard. Pair it with a low cardinality key (e.g. a 5 minute bucket) to avoid hot
//!   spots.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::event::Partitions;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestinationResolver {
    index: String,
    index_time_format: Option<String>,
    use_hashid: bool,
    use_partitions_for_routing: bool,
}

impl DestinationResolver {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty index or an unparsable time format.
    pub fn new(
        index: &str,
        index_time_format: Option<&str>,
        use_hashid: bool,
        use_partitions_for_routing: bool,
    ) -> Result<Self, ConfigError> {
        if index.trim().is_empty() {
            return Err(ConfigError::Invalid("index is required".to_string()));
        }
        if let Some(format) = index_time_format {
            validate_time_format(format)?;
        }
        Ok(DestinationResolver {
            index: index.to_string(),
            index_time_format: index_time_format.map(str::to_string),
            use_hashid,
            use_partitions_for_routing,
        })
    }

    #[must_use]
    pub fn index_name(&self, now: DateTime<Utc>) -> String {
        match &self.index_time_format {
            Some(format) => format!("{}{}", self.index, now.format(format)),
            None => self.index.clone(),
        }
    }

    #[must_use]
    pub fn document_id(&self, document: &[u8]) -> Option<String> {
        self.use_hashid
            .then(|| format!("{:x}", Sha256::digest(document)))
    }

    /// `None` when routing is off or there is nothing to route on.
    #[must_use]
    pub fn routing_key(&self, partitions: &Partitions) -> Option<String> {
        if !self.use_partitions_for_routing || partitions.is_empty() {
            return None;
        }
        Some(
            partitions
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

/// # Errors
///
/// Returns [`ConfigError::Invalid`] if `format` has an unknown or incomplete specifier.
pub fn validate_time_format(format: &str) -> Result<(), ConfigError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::Invalid(format!(
            "invalid index_time_format \"{format}\""
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_index_name_without_time_format() {
        let resolver = DestinationResolver::new("logs", None, false, false).unwrap();
        assert_eq!(resolver.index_name(at_noon()), "logs");
    }

    #[test]
    fn test_index_name_time_buckets() {
        let daily = DestinationResolver::new("logs-", Some("%Y.%m.%d"), false, false).unwrap();
        assert_eq!(daily.index_name(at_noon()), "logs-2024.03.07");

        let hourly = DestinationResolver::new("logs", Some("-%Y%m%d%H"), false, false).unwrap();
        assert_eq!(hourly.index_name(at_noon()), "logs-2024030712");
    }

    #[test]
    fn test_invalid_time_format_is_rejected() {
        assert!(matches!(
            DestinationResolver::new("logs", Some("%Q"), false, false),
            Err(ConfigError::Invalid(_))
        ));
        assert!(validate_time_format("%").is_err());
        assert!(validate_time_format("-%Y-%m").is_ok());
    }

    #[test]
    fn test_empty_index_is_rejected() {
        assert!(DestinationResolver::new(" ", None, false, false).is_err());
    }

    #[test]
    fn test_routing_key_joins_partitions() {
        let resolver = DestinationResolver::new("logs", None, false, true).unwrap();
        let partitions: Partitions = [("part1", "foo"), ("part2", "bar")].into_iter().collect();

        assert_eq!(
            resolver.routing_key(&partitions),
            Some("part1=foo/part2=bar".to_string())
        );
        assert_eq!(resolver.routing_key(&Partitions::new()), None);
    }

    #[test]
    fn test_routing_key_disabled() {
        let resolver = DestinationResolver::new("logs", None, false, false).unwrap();
        let partitions: Partitions = [("part1", "foo"), ("part2", "bar")].into_iter().collect();
        assert_eq!(resolver.routing_key(&partitions), None);
    }

    #[test]
    fn test_document_id_is_sha256_hex() {
        let hashing = DestinationResolver::new("logs", None, true, false).unwrap();
        assert_eq!(
            hashing.document_id(b"abc"),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string())
        );
        assert_eq!(hashing.document_id(b"abc"), hashing.document_id(b"abc"));

        let server_side = DestinationResolver::new("logs", None, false, false).unwrap();
        assert_eq!(server_side.document_id(b"abc"), None);
    }
}
