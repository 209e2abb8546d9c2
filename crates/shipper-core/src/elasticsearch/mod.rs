// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Search cluster destination: index naming, document ids and partition routing on
//! top of the HTTP transport.

pub mod resolver;
pub mod transport;
