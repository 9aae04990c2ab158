// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

/// Errors the connector surfaces to its host.
///
/// Transient delivery failures are handled internally by the retry policy and
/// never appear here; batches that exhaust their retries are absorbed into
/// dead-lettering and acknowledged. The one unrecoverable condition is an
/// unreachable dead-letter sink.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    /// The event failed structural validation. Terminal for that event,
    /// never retried.
    #[error("invalid event: field `{field}` must be non-empty")]
    InvalidEvent { field: &'static str },

    /// The connector has been closed and no longer accepts events.
    #[error("connector is closed")]
    Closed,

    /// The dead-letter sink could not take a failed batch. Data would be
    /// lost if ingestion continued, so the host must stop or pause.
    #[error("dead-letter sink unavailable: {message}")]
    DeadLetterUnavailable { message: String },
}
