// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Accumulation of individual events into bounded batches.
//!
//! A batch seals when either its event count reaches the configured maximum
//! or the time since its first event reaches the configured maximum age,
//! whichever comes first. The count trigger fires inside [`Batcher::add`];
//! the age trigger is driven by the connector service, which sleeps until
//! [`Batcher::deadline`] and then calls [`Batcher::take`], so that a
//! low-volume stream is flushed even when no new events arrive.
//!
//! The batcher is not synchronized. The connector service owns it and
//! serializes all access through its command channel.

use std::time::Duration;

use tokio::time::Instant;

use crate::event::{Batch, UsageEvent};

pub struct Batcher {
    max_events: usize,
    max_age: Duration,
    open: Vec<UsageEvent>,
    /// Set when the first event lands in the open batch.
    opened_at: Option<Instant>,
    next_seq: u64,
}

impl Batcher {
    pub fn new(max_events: usize, max_age: Duration) -> Self {
        Batcher {
            max_events,
            max_age,
            open: Vec::with_capacity(max_events),
            opened_at: None,
            next_seq: 0,
        }
    }

    /// Adds one event to the open batch.
    ///
    /// Returns the sealed batch when this event hits the count threshold; a
    /// fresh empty batch starts accumulating immediately. An event is never
    /// split across batches.
    pub fn add(&mut self, event: UsageEvent) -> Option<Batch> {
        if self.open.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.open.push(event);

        if self.open.len() >= self.max_events {
            return Some(self.seal());
        }
        None
    }

    /// Force-seals the open batch, if it holds at least one event.
    ///
    /// Used by the age timer, explicit flushes, and shutdown.
    pub fn take(&mut self) -> Option<Batch> {
        if self.open.is_empty() {
            return None;
        }
        Some(self.seal())
    }

    /// Instant at which the open batch reaches its maximum age.
    ///
    /// `None` while the open batch is empty: there is nothing to flush and
    /// therefore nothing to wake up for.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|at| at + self.max_age)
    }

    /// Number of events in the open batch.
    pub fn open_len(&self) -> usize {
        self.open.len()
    }

    fn seal(&mut self) -> Batch {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.opened_at = None;
        let events = std::mem::replace(&mut self.open, Vec::with_capacity(self.max_events));
        Batch::new(seq, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(i: usize) -> UsageEvent {
        UsageEvent::new(format!("meter_{i}"), "cust_42")
    }

    fn batcher(max_events: usize) -> Batcher {
        Batcher::new(max_events, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_add_below_threshold_returns_none() {
        let mut batcher = batcher(3);

        assert!(batcher.add(event(0)).is_none());
        assert!(batcher.add(event(1)).is_none());
        assert_eq!(batcher.open_len(), 2);
    }

    #[tokio::test]
    async fn test_nth_event_seals_exactly_at_threshold() {
        let mut batcher = batcher(3);

        assert!(batcher.add(event(0)).is_none());
        assert!(batcher.add(event(1)).is_none());
        let sealed = batcher.add(event(2)).unwrap();

        assert_eq!(sealed.len(), 3);
        assert_eq!(batcher.open_len(), 0);
    }

    #[tokio::test]
    async fn test_fresh_batch_starts_after_seal() {
        let mut batcher = batcher(2);

        batcher.add(event(0));
        let first = batcher.add(event(1)).unwrap();
        let second = batcher.add(event(2));

        assert_eq!(first.len(), 2);
        assert!(second.is_none());
        assert_eq!(batcher.open_len(), 1);
    }

    #[tokio::test]
    async fn test_sealed_batches_get_increasing_seq() {
        let mut batcher = batcher(1);

        let a = batcher.add(event(0)).unwrap();
        let b = batcher.add(event(1)).unwrap();

        assert_eq!(a.seq(), 0);
        assert_eq!(b.seq(), 1);
    }

    #[tokio::test]
    async fn test_event_order_preserved_within_batch() {
        let mut batcher = batcher(3);

        batcher.add(event(0));
        batcher.add(event(1));
        let sealed = batcher.add(event(2)).unwrap();

        let names: Vec<&str> = sealed
            .events()
            .iter()
            .map(|e| e.event_name.as_str())
            .collect();
        assert_eq!(names, vec!["meter_0", "meter_1", "meter_2"]);
    }

    #[tokio::test]
    async fn test_take_on_empty_batch_returns_none() {
        let mut batcher = batcher(10);
        assert!(batcher.take().is_none());
    }

    #[tokio::test]
    async fn test_take_seals_partial_batch() {
        let mut batcher = batcher(10);

        batcher.add(event(0));
        batcher.add(event(1));
        let sealed = batcher.take().unwrap();

        assert_eq!(sealed.len(), 2);
        assert_eq!(batcher.open_len(), 0);
        assert!(batcher.take().is_none());
    }

    #[tokio::test]
    async fn test_no_deadline_while_empty() {
        let batcher = batcher(10);
        assert!(batcher.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_first_event_plus_max_age() {
        let mut batcher = Batcher::new(10, Duration::from_secs(5));

        let before = Instant::now();
        batcher.add(event(0));
        tokio::time::advance(Duration::from_secs(2)).await;
        batcher.add(event(1));

        let deadline = batcher.deadline().unwrap();
        assert_eq!(deadline, before + Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_clears_after_seal() {
        let mut batcher = batcher(2);

        batcher.add(event(0));
        assert!(batcher.deadline().is_some());
        batcher.add(event(1)).unwrap();
        assert!(batcher.deadline().is_none());
    }

    #[tokio::test]
    async fn test_every_event_lands_in_exactly_one_batch() {
        let mut batcher = batcher(4);
        let mut sealed_events = 0usize;

        for i in 0..10 {
            if let Some(batch) = batcher.add(event(i)) {
                sealed_events += batch.len();
            }
        }
        if let Some(batch) = batcher.take() {
            sealed_events += batch.len();
        }

        assert_eq!(sealed_events, 10);
    }
}
