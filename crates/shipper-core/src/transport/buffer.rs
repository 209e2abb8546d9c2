// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Size and count bounded accumulation of serialized events.

use bytes::Bytes;
use tracing::warn;

use crate::constants;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            max_entries: constants::DEFAULT_MAX_BATCH_ENTRIES,
            max_bytes: constants::DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// Ordered serialized events plus their running byte size.
///
/// Owned by one pipeline invocation until it is sent or given up on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<Vec<u8>>,
    size_bytes: usize,
    limits: BatchLimits,
}

impl Batch {
    #[must_use]
    pub fn new(limits: BatchLimits) -> Self {
        Batch {
            entries: Vec::new(),
            size_bytes: 0,
            limits,
        }
    }

    /// Appends `entry` if it fits.
    ///
    /// An entry that would push the batch past its count or byte limit is handed back
    /// so it can open the next batch. An empty batch always accepts an entry, even an
    /// oversized one, so no entry is ever stuck.
    ///
    /// # Errors
    ///
    /// Returns the entry unchanged when the batch has no room for it.
    pub fn try_push(&mut self, entry: Vec<u8>) -> Result<(), Vec<u8>> {
        if !self.entries.is_empty()
            && (self.entries.len() >= self.limits.max_entries
                || self.size_bytes + entry.len() > self.limits.max_bytes)
        {
            return Err(entry);
        }

        if entry.len() > self.limits.max_bytes {
            warn!(
                "Entry of {} bytes exceeds the {} byte batch limit, sending it alone",
                entry.len(),
                self.limits.max_bytes
            );
        }

        self.size_bytes += entry.len();
        self.entries.push(entry);
        Ok(())
    }

    /// True once no further entry can be added.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.limits.max_entries || self.size_bytes >= self.limits.max_bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    #[must_use]
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn entries(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(Vec::as_slice)
    }

    /// Entries concatenated in order.
    #[must_use]
    pub fn payload(&self) -> Bytes {
        let mut payload = Vec::with_capacity(self.size_bytes);
        for entry in &self.entries {
            payload.extend_from_slice(entry);
        }
        Bytes::from(payload)
    }
}
