// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Usage-event wire model and sealed batches.
//!
//! A [`UsageEvent`] is serialized verbatim into the bulk-events payload, so
//! the field names here are the intake's field names. Events with a missing
//! `event_name` or `external_customer_id` are rejected before they reach a
//! batch; everything else is the producer's business.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// A single usage event bound for the `/v1/events/bulk` intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Billing meter this event feeds.
    pub event_name: String,

    /// Customer the usage is attributed to.
    pub external_customer_id: String,

    /// Free-form string properties. Numeric values must already be
    /// stringified by the producer; the intake rejects anything else.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,

    /// ISO-8601 event time. Stamped with the ingestion time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Origin of the event (e.g. the producing service).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Idempotency key for the intake's deduplication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl UsageEvent {
    /// Creates an event with just the required fields set.
    pub fn new(event_name: impl Into<String>, external_customer_id: impl Into<String>) -> Self {
        UsageEvent {
            event_name: event_name.into(),
            external_customer_id: external_customer_id.into(),
            properties: HashMap::new(),
            timestamp: None,
            source: None,
            event_id: None,
        }
    }

    /// Rejects events the intake would refuse on every attempt.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.event_name.trim().is_empty() {
            return Err(ConnectorError::InvalidEvent {
                field: "event_name",
            });
        }
        if self.external_customer_id.trim().is_empty() {
            return Err(ConnectorError::InvalidEvent {
                field: "external_customer_id",
            });
        }
        Ok(())
    }

    /// Fills in the event time with "now" if the producer left it unset.
    ///
    /// Called once when the event is accepted, so retries do not shift the
    /// event time.
    pub(crate) fn stamp_ingestion_time(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        }
    }
}

/// An ordered batch of events sealed by the batcher.
///
/// Immutable once constructed; event order is preserved in the serialized
/// payload. Success and failure are tracked at this granularity: the whole
/// batch is delivered, retried, or dead-lettered together.
#[derive(Debug, Clone)]
pub struct Batch {
    seq: u64,
    events: Vec<UsageEvent>,
}

impl Batch {
    pub(crate) fn new(seq: u64, events: Vec<UsageEvent>) -> Self {
        Batch { seq, events }
    }

    /// Sequence number assigned at seal time. Diagnostic only; batches may
    /// resolve out of order when deliveries run concurrently.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[UsageEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<UsageEvent> {
        self.events
    }
}
