// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! # Flexprice Usage Connector
//!
//! Batching, retrying output connector that delivers usage events to the
//! Flexprice ingestion API (`POST /v1/events/bulk`) with at-least-once
//! semantics under partial failure, backpressure, and bounded memory.
//!
//! ## Architecture
//!
//! ```text
//!   producers ──> ConnectorHandle::add
//!                      │ bounded channel (backpressure)
//!                      v
//!               ┌──────────────┐
//!               │   Batcher    │ seal on count or age
//!               └──────┬───────┘
//!                      │ semaphore slot (max in flight)
//!                      v
//!               ┌──────────────┐     retry w/ backoff
//!               │   Delivery   │ <──────────┐
//!               └──────┬───────┘            │
//!                      ├── 2xx ── ack       │
//!                      ├── 5xx / transport ─┘ (until attempts exhausted)
//!                      └── 4xx / exhausted ──> Dead-Letter Sink
//! ```
//!
//! The library is organized into several key modules:
//! - [`connector`]: service lifecycle and the `{add, flush, close}` handle
//! - [`batcher`]: count/age bounded batch accumulation
//! - [`delivery`]: the HTTP delivery client and outcome classification
//! - [`retry`]: backoff policy and per-attempt decisions
//! - [`dead_letter`]: terminal-failure routing to a secondary sink
//! - [`metrics`]: injected delivery counters for external scraping
//! - [`config`]: environment-driven configuration with validated defaults
//!
//! A batch is resolved to exactly one of delivered or dead-lettered; the
//! only error the connector ever raises to its host beyond per-event
//! validation is an unreachable dead-letter sink.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batcher;
pub mod config;
pub mod connector;
pub mod dead_letter;
pub mod delivery;
pub mod error;
pub mod event;
pub mod metrics;
pub mod retry;

pub use config::{ConnectorConfig, DeadLetterTarget};
pub use connector::{ConnectorHandle, UsageConnector};
pub use error::ConnectorError;
pub use event::UsageEvent;
pub use metrics::{ConnectorMetrics, MetricsSnapshot};

/// Connector version reported by the agent's health endpoint.
pub const CONNECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");
