// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Standalone agent wrapping the usage connector.
//!
//! Exposes the connector to a host pipeline over HTTP: `POST /v1/ingest`
//! accepts a JSON array of events, `GET /health` is the liveness probe, and
//! `GET /metrics` serves the delivery counters for scraping.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod http_utils;
pub mod server;
