// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drives one invocation's records end to end.
//!
//! Records are grouped by partitions in the order each partition set is first seen.
//! Within a group every record is deserialized, run through the operations and
//! serialized into batches, and each batch is sent as soon as it is full. Events keep
//! their order within a group. Record level failures are counted and skipped. A batch
//! that cannot be delivered is handed back in the report, and later batches are still
//! attempted.

use tracing::{debug, debug_span, warn, Instrument};

use crate::config::Config;
use crate::deserializer::Deserializer;
use crate::error::{ConfigError, TransportError};
use crate::event::{Partitions, RawRecord};
use crate::operation::{apply_all, Operation};
use crate::transport::buffer::Batch;
use crate::transport::Transport;

/// A batch the transport gave up on, for the driver to drop or dead-letter.
#[derive(Debug)]
pub struct UndeliveredBatch {
    pub partitions: Partitions,
    pub batch: Batch,
    pub error: TransportError,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub records: usize,
    pub deserialize_failures: usize,
    /// Records whose operations produced no event.
    pub dropped: usize,
    pub serialize_failures: usize,
    /// Events in delivered batches.
    pub shipped: usize,
    pub batches_delivered: usize,
    /// Send attempts over all batches, delivered or not.
    pub send_attempts: u32,
    pub undelivered: Vec<UndeliveredBatch>,
}

impl PipelineReport {
    /// True when every batch was delivered.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.undelivered.is_empty()
    }

    #[must_use]
    pub fn undelivered_events(&self) -> usize {
        self.undelivered.iter().map(|u| u.batch.len()).sum()
    }
}

pub struct Pipeline {
    deserializer: Box<dyn Deserializer>,
    operations: Vec<Box<dyn Operation>>,
    transport: Box<dyn Transport>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        deserializer: Box<dyn Deserializer>,
        operations: Vec<Box<dyn Operation>>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Pipeline {
            deserializer,
            operations,
            transport,
        }
    }

    /// Builds every component, including the transport's connection pool.
    ///
    /// # Errors
    ///
    /// Returns the first component that fails to build.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let deserializer = config.deserializer.build()?;
        let operations = config
            .operations
            .iter()
            .map(|operation| operation.build())
            .collect::<Result<Vec<_>, _>>()?;
        let transport = config.transport.build()?;
        Ok(Pipeline::new(deserializer, operations, transport))
    }

    pub async fn process<I>(&self, records: I) -> PipelineReport
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut groups: Vec<(Partitions, Vec<String>)> = Vec::new();
        for record in records {
            match groups.iter_mut().find(|(p, _)| *p == record.partitions) {
                Some((_, payloads)) => payloads.push(record.payload),
                None => groups.push((record.partitions, vec![record.payload])),
            }
        }

        let mut report = PipelineReport::default();
        for (partitions, payloads) in groups {
            let span = debug_span!("partition", partitions = ?partitions);
            self.process_group(partitions, payloads, &mut report)
                .instrument(span)
                .await;
        }

        debug!(
            "Processed {} records: {} shipped in {} batches, {} failed to deserialize, {} dropped, {} undelivered",
            report.records,
            report.shipped,
            report.batches_delivered,
            report.deserialize_failures,
            report.dropped,
            report.undelivered_events()
        );
        report
    }

    async fn process_group(
        &self,
        partitions: Partitions,
        payloads: Vec<String>,
        report: &mut PipelineReport,
    ) {
        let mut batch = self.transport.new_batch();

        for payload in payloads {
            report.records += 1;
            let event = match self.deserializer.deserialize(&payload) {
                Ok(event) => event,
                Err(e) => {
                    debug!("Skipping record: {e}");
                    report.deserialize_failures += 1;
                    continue;
                }
            };

            let events = apply_all(&self.operations, event);
            if events.is_empty() {
                report.dropped += 1;
                continue;
            }

            for event in events {
                let entry = match self.transport.serialize(&event) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Failed to serialize event: {e}");
                        report.serialize_failures += 1;
                        continue;
                    }
                };

                // An empty batch always takes the entry, so this runs at most twice.
                let mut pending = Some(entry);
                while let Some(entry) = pending.take() {
                    if let Err(entry) = batch.try_push(entry) {
                        self.flush(&mut batch, &partitions, report).await;
                        pending = Some(entry);
                    }
                }
                if batch.is_full() {
                    self.flush(&mut batch, &partitions, report).await;
                }
            }
        }

        self.flush(&mut batch, &partitions, report).await;
    }

    async fn flush(&self, batch: &mut Batch, partitions: &Partitions, report: &mut PipelineReport) {
        if batch.is_empty() {
            return;
        }
        let batch = std::mem::replace(batch, self.transport.new_batch());
        debug!(
            "Flushing batch of {} entries ({} bytes)",
            batch.len(),
            batch.size_bytes()
        );

        match self.transport.send_batch(&batch, partitions).await {
            Ok(delivery) => {
                report.send_attempts += delivery.attempts;
                report.batches_delivered += 1;
                report.shipped += batch.len();
            }
            Err(error) => {
                report.send_attempts += error.attempts();
                warn!("Batch of {} events not delivered: {error}", batch.len());
                report.undelivered.push(UndeliveredBatch {
                    partitions: partitions.clone(),
                    batch,
                    error,
                });
            }
        }
    }

    /// Closes the transport's connection pool.
    pub fn shutdown(&self) {
        self.transport.close();
    }
}
