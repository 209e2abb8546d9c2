// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Shipper Core
//!
//! Turns raw text records into structured events, optionally transforms them,
//! batches the serialized events and delivers each batch to a remote sink over
//! HTTP with bounded, exponentially backed-off retries.
//!
//! ## Architecture
//!
//! ```text
//!   RawRecord ──> Deserializer ──> Operation(s) ──> Transport::serialize
//!                                                         │
//!                                                         v
//!                                                  ┌─────────────┐
//!                                                  │    Batch    │ (count/size bound)
//!                                                  └──────┬──────┘
//!                                                         v
//!                                                  ┌─────────────┐
//!                                                  │  Transport  │ (compress, POST, retry)
//!                                                  └─────────────┘
//! ```
//!
//! - [`deserializer`]: raw line to [`event::StructuredEvent`]
//! - [`operation`]: pluggable transform units
//! - [`transport`]: batch buffer, retry policy, connection pool, HTTP transport
//! - [`elasticsearch`]: index naming, document ids and routing for a search cluster
//! - [`pipeline`]: drives one invocation's records end to end

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod constants;
pub mod deserializer;
pub mod elasticsearch;
pub mod error;
pub mod event;
pub mod logger;
pub mod operation;
pub mod pipeline;
pub mod transport;
