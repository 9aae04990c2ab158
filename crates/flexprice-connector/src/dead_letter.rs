// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Routing of terminally failed batches to a secondary sink.
//!
//! A batch lands here in exactly two cases: the intake rejected it (4xx), or
//! its retry budget was exhausted on transient failures. The record keeps
//! the full event payload plus failure metadata so an operator can inspect
//! or replay it later. Losing a record here is the one outcome this design
//! exists to avoid, so a sink failure is reported upward as fatal rather
//! than logged and dropped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

use crate::config::DeadLetterTarget;
use crate::delivery::build_client;
use crate::event::{Batch, UsageEvent};

/// Terminal failure classification carried on a dead-letter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The intake rejected the batch; retrying would repeat the failure.
    Rejected,
    /// The retry budget was exhausted on transient failures.
    RetriesExhausted,
}

/// A failed batch plus failure metadata, handed to the secondary sink.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterRecord {
    pub batch_seq: u64,
    pub failure: FailureKind,
    /// Last HTTP status seen, when the final failure carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<u16>,
    pub attempts: u32,
    /// RFC-3339 instant at which the batch was given up on.
    pub failed_at: String,
    pub events: Vec<UsageEvent>,
}

impl DeadLetterRecord {
    pub(crate) fn from_batch(
        batch: Batch,
        failure: FailureKind,
        last_status: Option<u16>,
        attempts: u32,
    ) -> Self {
        DeadLetterRecord {
            batch_seq: batch.seq(),
            failure,
            last_status,
            attempts,
            failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            events: batch.into_events(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("dead-letter endpoint returned status {status}")]
    Endpoint { status: u16 },

    #[error("dead-letter endpoint unreachable: {0}")]
    Transport(String),

    #[error("dead-letter file write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("dead-letter record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Secondary sink for batches that exhausted normal delivery.
///
/// Implementations own the record after a successful `route`; nothing else
/// reads it afterwards.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn route(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError>;
}

/// Builds the sink selected by configuration.
pub fn sink_for(
    target: &DeadLetterTarget,
    https_proxy: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn DeadLetterSink>> {
    match target {
        DeadLetterTarget::Http { url } => Ok(Arc::new(HttpDeadLetterSink::new(
            url.clone(),
            build_client(https_proxy, timeout)?,
        ))),
        DeadLetterTarget::File { path } => Ok(Arc::new(FileDeadLetterSink::new(path.clone()))),
    }
}

/// POSTs dead-letter records to a secondary HTTP endpoint, one request per
/// record.
pub struct HttpDeadLetterSink {
    client: reqwest::Client,
    url: String,
}

impl HttpDeadLetterSink {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        HttpDeadLetterSink { client, url }
    }
}

#[async_trait]
impl DeadLetterSink for HttpDeadLetterSink {
    async fn route(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        let response = self
            .client
            .post(&self.url)
            .json(&record)
            .send()
            .await
            .map_err(|e| DeadLetterError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(batch = record.batch_seq, "dead-letter record routed");
            return Ok(());
        }
        error!(
            batch = record.batch_seq,
            status = status.as_u16(),
            "dead-letter endpoint refused record"
        );
        Err(DeadLetterError::Endpoint {
            status: status.as_u16(),
        })
    }
}

/// Appends dead-letter records to a local NDJSON spill file, one record per
/// line, fsync'd before reporting success.
pub struct FileDeadLetterSink {
    path: PathBuf,
}

impl FileDeadLetterSink {
    pub fn new(path: PathBuf) -> Self {
        FileDeadLetterSink { path }
    }
}

#[async_trait]
impl DeadLetterSink for FileDeadLetterSink {
    async fn route(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;

        debug!(
            batch = record.batch_seq,
            path = %self.path.display(),
            "dead-letter record spilled"
        );
        Ok(())
    }
}
