// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Delivery counters, shared by `Arc` between the connector service and
//! whatever scrapes them. Injected at construction; there is no global
//! metrics state, and the counters live and die with the connector.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ConnectorMetrics {
    events_received: AtomicU64,
    events_sent: AtomicU64,
    batches_sent: AtomicU64,
    batch_send_errors: AtomicU64,
    batches_dead_lettered: AtomicU64,
}

impl ConnectorMetrics {
    /// Counts events accepted into a batch (post-validation).
    pub fn record_received(&self, events: u64) {
        self.events_received.fetch_add(events, Ordering::Relaxed);
    }

    /// Counts one delivered batch and the events it carried.
    pub fn record_sent(&self, events: u64) {
        self.events_sent.fetch_add(events, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one failed delivery attempt (transient or terminal).
    pub fn record_send_error(&self) {
        self.batch_send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one batch handed to the dead-letter sink.
    pub fn record_dead_lettered(&self) {
        self.batches_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batch_send_errors: self.batch_send_errors.load(Ordering::Relaxed),
            batches_dead_lettered: self.batches_dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters, serializable for scraping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub events_sent: u64,
    pub batches_sent: u64,
    pub batch_send_errors: u64,
    pub batches_dead_lettered: u64,
}
