// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery client for the bulk-events intake.
//!
//! One POST per call, per-request timeout, no retry logic: the client
//! classifies the outcome and the caller decides what happens next.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error};

use crate::config::ConnectorConfig;
use crate::event::Batch;

const API_KEY_HEADER: &str = "x-api-key";

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx: the intake accepted the batch.
    Accepted,
    /// 4xx: the intake rejected the payload (malformed event, unconvertible
    /// property, unknown customer or meter). Retrying repeats the failure.
    Rejected { status: u16 },
    /// 5xx: transient server failure.
    ServerError { status: u16 },
    /// Connection, DNS, or timeout failure before a status line was read.
    Transport { message: String },
}

impl DeliveryOutcome {
    /// The last HTTP status carried by this outcome, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryOutcome::Accepted => None,
            DeliveryOutcome::Rejected { status } | DeliveryOutcome::ServerError { status } => {
                Some(*status)
            }
            DeliveryOutcome::Transport { .. } => None,
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Accepted => write!(f, "accepted"),
            DeliveryOutcome::Rejected { status } => write!(f, "rejected with status {status}"),
            DeliveryOutcome::ServerError { status } => {
                write!(f, "server error with status {status}")
            }
            DeliveryOutcome::Transport { message } => write!(f, "transport error: {message}"),
        }
    }
}

/// Thin client around the bulk-events endpoint.
#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl DeliveryClient {
    pub fn new(config: &ConnectorConfig) -> anyhow::Result<Self> {
        let client = build_client(config.https_proxy.as_deref(), config.request_timeout)?;
        Ok(DeliveryClient {
            client,
            endpoint: config.bulk_events_url(),
            api_key: config.api_key.clone(),
            timeout: config.request_timeout,
        })
    }

    /// Sends one batch. Exactly one POST; the caller owns retry decisions.
    pub async fn send(&self, batch: &Batch) -> DeliveryOutcome {
        let response = self
            .client
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
            .json(batch.events())
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(
                        batch = batch.seq(),
                        events = batch.len(),
                        "intake accepted batch"
                    );
                    return DeliveryOutcome::Accepted;
                }
                let body = response.text().await.unwrap_or_default();
                if status.is_client_error() {
                    error!(
                        batch = batch.seq(),
                        status = status.as_u16(),
                        "intake rejected batch: {body}"
                    );
                    DeliveryOutcome::Rejected {
                        status: status.as_u16(),
                    }
                } else {
                    // 5xx, and anything else the intake should not return
                    // (redirects are not followed to a different host).
                    DeliveryOutcome::ServerError {
                        status: status.as_u16(),
                    }
                }
            }
            Err(e) => DeliveryOutcome::Transport {
                message: e.to_string(),
            },
        }
    }
}

/// Builds a reqwest client with optional proxy configuration and timeout.
/// Uses rustls TLS via the crate's default feature.
pub(crate) fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}
