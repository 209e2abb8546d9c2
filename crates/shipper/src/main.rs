// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use shipper_core::config::{self, log_level::LogLevel, Config};
use shipper_core::event::{Partitions, RawRecord};
use shipper_core::logger::Formatter;
use shipper_core::pipeline::{Pipeline, PipelineReport};

const DEFAULT_CONFIG_PATH: &str = "shipper.yaml";

/// Records handed to the pipeline per invocation.
const RECORDS_PER_INVOCATION: usize = 10_000;

#[tokio::main]
pub async fn main() -> ExitCode {
    let config_path = env::var("SHIPPER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let loaded = Config::load(&config_path);

    // The environment still decides the level when the configuration is unusable.
    let log_level = match &loaded {
        Ok(config) => config.log_level,
        Err(_) => env::var("SHIPPER_LOG_LEVEL")
            .ok()
            .and_then(|val| LogLevel::from_str(&val).ok())
            .unwrap_or_default(),
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level.env_filter_directive())
                .expect("could not parse log level in configuration"),
        )
        .event_format(Formatter)
        .with_writer(std::io::stderr)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration in {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    let partitions = match env::var("SHIPPER_PARTITIONS") {
        Ok(value) => match config::parse_partitions(&value) {
            Ok(partitions) => partitions,
            Err(e) => {
                error!("Invalid SHIPPER_PARTITIONS: {e}");
                return ExitCode::FAILURE;
            }
        },
        Err(_) => Partitions::new(),
    };

    let pipeline = match Pipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Unable to start pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("Shipper started, reading records from stdin");

    let mut totals = Totals::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut records = Vec::with_capacity(RECORDS_PER_INVOCATION);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                records.push(RawRecord::new(line, partitions.clone()));
                if records.len() >= RECORDS_PER_INVOCATION {
                    let batch = std::mem::take(&mut records);
                    totals.add(&pipeline.process(batch).await);
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {e}");
                totals.read_failed = true;
                break;
            }
        }
    }
    if !records.is_empty() {
        totals.add(&pipeline.process(records).await);
    }

    pipeline.shutdown();
    info!(
        "Shipper done: {} records, {} shipped, {} failed, {} dropped, {} undelivered",
        totals.records, totals.shipped, totals.failed, totals.dropped, totals.undelivered
    );

    if totals.undelivered > 0 || totals.read_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[derive(Default)]
struct Totals {
    records: usize,
    shipped: usize,
    failed: usize,
    dropped: usize,
    undelivered: usize,
    read_failed: bool,
}

impl Totals {
    fn add(&mut self, report: &PipelineReport) {
        self.records += report.records;
        self.shipped += report.shipped;
        self.failed += report.deserialize_failures + report.serialize_failures;
        self.dropped += report.dropped;
        self.undelivered += report.undelivered_events();
        for undelivered in &report.undelivered {
            warn!(
                "Dropping {} events for partitions {:?}: {}",
                undelivered.batch.len(),
                undelivered.partitions,
                undelivered.error
            );
        }
    }
}
