// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Retry policy for failed deliveries.
//!
//! Rejections (4xx) are terminal: the payload fails identically on every
//! attempt, so it goes straight to the dead-letter sink. Server errors and
//! transport failures are retried with exponential backoff (base delay
//! doubling per attempt, capped, with ±25% jitter so concurrent batches do
//! not retry in lockstep) up to a mandatory attempt limit.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::delivery::DeliveryOutcome;

/// What the dispatcher should do with a batch after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The batch was accepted; nothing left to do.
    Done,
    /// Try again after the given delay.
    RetryAfter(Duration),
    /// Stop. The failure is terminal for this batch.
    GiveUp(GiveUpReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The intake rejected the payload.
    Rejected,
    /// The retry budget was spent on transient failures.
    AttemptsExhausted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts delivery attempts, not retries: 3 means at most
    /// three POSTs. Bounds are validated at config load; a zero here is
    /// clamped to one so a hand-built policy can never retry forever.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Decides the fate of a batch whose `attempt`-th delivery (1-based)
    /// produced `outcome`.
    pub fn decide(&self, outcome: &DeliveryOutcome, attempt: u32) -> RetryDecision {
        match outcome {
            DeliveryOutcome::Accepted => RetryDecision::Done,
            DeliveryOutcome::Rejected { .. } => RetryDecision::GiveUp(GiveUpReason::Rejected),
            DeliveryOutcome::ServerError { .. } | DeliveryOutcome::Transport { .. } => {
                if attempt >= self.max_attempts {
                    RetryDecision::GiveUp(GiveUpReason::AttemptsExhausted)
                } else {
                    RetryDecision::RetryAfter(self.backoff(attempt))
                }
            }
        }
    }

    /// Backoff before attempt `attempt + 1`: `base * 2^(attempt-1)`, capped
    /// at the max delay, with ±25% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = 1u64
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let cap_ms = self.max_delay.as_millis() as u64;
        let capped = base_ms.saturating_mul(exp).min(cap_ms);

        let spread = capped / 4;
        let jitter = if spread > 0 {
            // Clock-seeded; enough to decorrelate batches without an RNG.
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            seed % (spread * 2)
        } else {
            0
        };

        let with_jitter = capped
            .saturating_sub(spread)
            .saturating_add(jitter)
            .min(cap_ms);
        Duration::from_millis(with_jitter)
    }
}
