// Copyright 2025-Present Flexprice, Inc. https://flexprice.io/
// SPDX-License-Identifier: Apache-2.0

//! Connector service and the handle its host drives it with.
//!
//! The service is a single actor task that owns the open batch, the seal
//! timer, the in-flight semaphore, and the set of running delivery tasks.
//! Producers talk to it through a bounded command channel, which both
//! serializes access to the batcher and carries backpressure: when every
//! in-flight slot is taken the service parks on the semaphore, the channel
//! fills, and `add` callers block instead of queueing unbounded work.
//!
//! Per batch the lifecycle is strict: sealed → in flight → delivered or
//! dead-lettered, holding one semaphore slot from dispatch to resolution.
//! Batches may resolve out of order when `max_in_flight > 1`; that is the
//! price of concurrent delivery and the intake does not care.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batcher::Batcher;
use crate::config::ConnectorConfig;
use crate::dead_letter::{self, DeadLetterRecord, DeadLetterSink, FailureKind};
use crate::delivery::DeliveryClient;
use crate::error::ConnectorError;
use crate::event::{Batch, UsageEvent};
use crate::metrics::{ConnectorMetrics, MetricsSnapshot};
use crate::retry::{GiveUpReason, RetryDecision, RetryPolicy};

/// Commands queued ahead of the service loop. The capacity bounds how many
/// acknowledged-but-unbatched events can exist while the loop is parked on
/// the in-flight semaphore.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

enum Command {
    Add(UsageEvent, oneshot::Sender<Result<(), ConnectorError>>),
    Flush(oneshot::Sender<Result<(), ConnectorError>>),
}

/// How a batch left the pipeline.
enum Resolution {
    Delivered,
    DeadLettered,
    /// The dead-letter sink itself failed; the error latches the connector.
    Failed(ConnectorError),
}

/// Entry point: builds and spawns the connector service.
pub struct UsageConnector;

impl UsageConnector {
    pub fn start(config: ConnectorConfig) -> anyhow::Result<ConnectorHandle> {
        let sink = dead_letter::sink_for(
            &config.dead_letter,
            config.https_proxy.as_deref(),
            config.request_timeout,
        )?;
        Self::start_with_sink(config, sink)
    }

    /// Starts the connector with a caller-provided dead-letter sink.
    pub fn start_with_sink(
        config: ConnectorConfig,
        sink: Arc<dyn DeadLetterSink>,
    ) -> anyhow::Result<ConnectorHandle> {
        config.validate()?;

        let client = Arc::new(DeliveryClient::new(&config)?);
        let metrics = Arc::new(ConnectorMetrics::default());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let service = ConnectorService {
            rx,
            batcher: Batcher::new(config.batch_max_events, config.batch_max_age),
            client,
            policy: RetryPolicy::new(
                config.retry_max_attempts,
                config.retry_base_delay,
                config.retry_max_delay,
            ),
            sink,
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            metrics: Arc::clone(&metrics),
            cancel: cancel.clone(),
            drain_timeout: config.drain_timeout,
            inflight: JoinSet::new(),
            pending: Vec::new(),
            fatal: None,
        };
        let task = tokio::spawn(service.run());

        Ok(ConnectorHandle {
            tx,
            cancel,
            metrics,
            service: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Cloneable handle to a running connector.
///
/// This is the whole surface a host composes against: `add`, `flush`,
/// `close`, and the metrics accessors.
#[derive(Clone)]
pub struct ConnectorHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    metrics: Arc<ConnectorMetrics>,
    service: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConnectorHandle {
    /// Hands one event to the connector.
    ///
    /// Resolves once the event is validated and buffered into the open
    /// batch. Blocks while the pipeline is saturated; validation failures
    /// are terminal for the event and reported immediately.
    pub async fn add(&self, event: UsageEvent) -> Result<(), ConnectorError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Add(event, reply))
            .await
            .map_err(|_| ConnectorError::Closed)?;
        response.await.map_err(|_| ConnectorError::Closed)?
    }

    /// Seals the open batch and waits until every sealed batch has resolved
    /// to delivered or dead-lettered.
    ///
    /// This is the host's acknowledgment point: a successful flush means
    /// everything handed over so far has been durably handled. The error
    /// case is an unreachable dead-letter sink.
    pub async fn flush(&self) -> Result<(), ConnectorError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply))
            .await
            .map_err(|_| ConnectorError::Closed)?;
        response.await.map_err(|_| ConnectorError::Closed)?
    }

    /// Stops intake, flushes the open batch, and waits for in-flight
    /// deliveries, bounded by the configured drain timeout. Batches still
    /// unresolved past the timeout are abandoned with a warning.
    pub async fn close(&self) -> Result<(), ConnectorError> {
        self.cancel.cancel();
        let task = self.service.lock().await.take();
        if let Some(task) = task {
            if task.await.is_err() {
                error!("connector service task panicked during shutdown");
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<ConnectorMetrics> {
        Arc::clone(&self.metrics)
    }
}

struct ConnectorService {
    rx: mpsc::Receiver<Command>,
    batcher: Batcher,
    client: Arc<DeliveryClient>,
    policy: RetryPolicy,
    sink: Arc<dyn DeadLetterSink>,
    permits: Arc<Semaphore>,
    metrics: Arc<ConnectorMetrics>,
    cancel: CancellationToken,
    drain_timeout: Duration,
    inflight: JoinSet<Resolution>,
    /// Batches sealed but not dispatched when shutdown interrupted the
    /// slot wait; drained before exit.
    pending: Vec<Batch>,
    /// Latched on dead-letter sink failure; every later command is refused
    /// with this error so the host stops pushing.
    fatal: Option<ConnectorError>,
}

impl ConnectorService {
    async fn run(mut self) {
        debug!("connector service started");

        loop {
            let deadline = self.batcher.deadline();
            let age_timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                // The open batch reached its maximum age.
                _ = age_timer => {
                    if let Some(batch) = self.batcher.take() {
                        if let Some(batch) = self.dispatch(batch).await {
                            self.pending.push(batch);
                            break;
                        }
                    }
                }

                command = self.rx.recv() => match command {
                    None => break,
                    Some(Command::Add(event, reply)) => match self.accept(event) {
                        Ok(None) => {
                            let _ = reply.send(Ok(()));
                        }
                        Ok(Some(batch)) => {
                            let _ = reply.send(Ok(()));
                            if let Some(batch) = self.dispatch(batch).await {
                                self.pending.push(batch);
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                        }
                    },
                    Some(Command::Flush(reply)) => {
                        if let Some(batch) = self.batcher.take() {
                            if let Some(batch) = self.dispatch(batch).await {
                                self.pending.push(batch);
                                let _ = reply.send(Err(ConnectorError::Closed));
                                break;
                            }
                        }
                        // Quiesce: wait for everything currently in flight.
                        while let Some(result) = self.inflight.join_next().await {
                            self.on_resolved(result);
                        }
                        let result = match &self.fatal {
                            Some(e) => Err(e.clone()),
                            None => Ok(()),
                        };
                        let _ = reply.send(result);
                    }
                },

                Some(result) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    self.on_resolved(result);
                }
            }
        }

        self.drain().await;
    }

    /// Validates, stamps, and buffers one event; returns the sealed batch
    /// when this event filled it.
    fn accept(&mut self, mut event: UsageEvent) -> Result<Option<Batch>, ConnectorError> {
        if let Some(fatal) = &self.fatal {
            return Err(fatal.clone());
        }
        event.validate()?;
        event.stamp_ingestion_time();
        self.metrics.record_received(1);
        Ok(self.batcher.add(event))
    }

    /// Acquires an in-flight slot and spawns the delivery task.
    ///
    /// While the service is parked here it does not drain the command
    /// channel, and upstream `add` calls block once the channel fills. Returns
    /// the batch untouched when shutdown interrupts the wait.
    async fn dispatch(&mut self, batch: Batch) -> Option<Batch> {
        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Some(batch),
            },
            _ = self.cancel.cancelled() => return Some(batch),
        };

        let client = Arc::clone(&self.client);
        let policy = self.policy.clone();
        let sink = Arc::clone(&self.sink);
        let metrics = Arc::clone(&self.metrics);
        self.inflight.spawn(async move {
            let resolution = deliver_batch(client, policy, sink, metrics, batch).await;
            // Slot released exactly once per batch, at its terminal state.
            drop(permit);
            resolution
        });
        None
    }

    /// Like [`dispatch`](Self::dispatch) but bounded by the drain deadline;
    /// returns whether the batch made it into flight.
    async fn dispatch_by(&mut self, batch: Batch, deadline: Instant) -> bool {
        let seq = batch.seq();
        let events = batch.len();
        match timeout_at(deadline, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => {
                let client = Arc::clone(&self.client);
                let policy = self.policy.clone();
                let sink = Arc::clone(&self.sink);
                let metrics = Arc::clone(&self.metrics);
                self.inflight.spawn(async move {
                    let resolution = deliver_batch(client, policy, sink, metrics, batch).await;
                    drop(permit);
                    resolution
                });
                true
            }
            Ok(Err(_)) | Err(_) => {
                warn!(
                    batch = seq,
                    events, "drain timeout: abandoning undispatched batch"
                );
                false
            }
        }
    }

    fn on_resolved(&mut self, result: Result<Resolution, JoinError>) {
        match result {
            Ok(Resolution::Delivered) | Ok(Resolution::DeadLettered) => {}
            Ok(Resolution::Failed(error)) => {
                // Keep the first fatal error; later ones repeat it.
                if self.fatal.is_none() {
                    self.fatal = Some(error);
                }
            }
            Err(e) if e.is_panic() => {
                error!("delivery task panicked: {e:?}");
            }
            Err(_) => {}
        }
    }

    /// Shutdown path: buffer queued commands, flush the open batch, and wait
    /// for in-flight deliveries bounded by the drain timeout.
    async fn drain(mut self) {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Add(event, reply) => match self.accept(event) {
                    Ok(sealed) => {
                        let _ = reply.send(Ok(()));
                        if let Some(batch) = sealed {
                            self.pending.push(batch);
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
                Command::Flush(reply) => {
                    let _ = reply.send(Err(ConnectorError::Closed));
                }
            }
        }
        if let Some(batch) = self.batcher.take() {
            self.pending.push(batch);
        }

        let deadline = Instant::now() + self.drain_timeout;
        let pending = std::mem::take(&mut self.pending);
        for batch in pending {
            self.dispatch_by(batch, deadline).await;
        }

        while !self.inflight.is_empty() {
            match timeout_at(deadline, self.inflight.join_next()).await {
                Ok(Some(result)) => self.on_resolved(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        batches = self.inflight.len(),
                        "drain timeout: abandoning in-flight batches"
                    );
                    self.inflight.abort_all();
                    break;
                }
            }
        }

        if let Some(error) = &self.fatal {
            error!("connector stopped after fatal error: {error}");
        }
        debug!("connector service stopped");
    }
}

/// Drives one batch to a terminal state: attempt, classify, back off, and
/// eventually deliver or dead-letter.
async fn deliver_batch(
    client: Arc<DeliveryClient>,
    policy: RetryPolicy,
    sink: Arc<dyn DeadLetterSink>,
    metrics: Arc<ConnectorMetrics>,
    batch: Batch,
) -> Resolution {
    let seq = batch.seq();
    let events = batch.len() as u64;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome = client.send(&batch).await;
        match policy.decide(&outcome, attempt) {
            RetryDecision::Done => {
                metrics.record_sent(events);
                debug!(batch = seq, events, attempts = attempt, "batch delivered");
                return Resolution::Delivered;
            }
            RetryDecision::RetryAfter(delay) => {
                metrics.record_send_error();
                warn!(
                    batch = seq,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "delivery failed ({outcome}), retrying"
                );
                sleep(delay).await;
            }
            RetryDecision::GiveUp(reason) => {
                metrics.record_send_error();
                let failure = match reason {
                    GiveUpReason::Rejected => FailureKind::Rejected,
                    GiveUpReason::AttemptsExhausted => FailureKind::RetriesExhausted,
                };
                error!(
                    batch = seq,
                    attempts = attempt,
                    "giving up on batch ({outcome}), dead-lettering"
                );
                let record =
                    DeadLetterRecord::from_batch(batch, failure, outcome.status(), attempt);
                return match sink.route(record).await {
                    Ok(()) => {
                        metrics.record_dead_lettered();
                        Resolution::DeadLettered
                    }
                    Err(e) => {
                        error!(batch = seq, "dead-letter sink failed: {e}");
                        Resolution::Failed(ConnectorError::DeadLetterUnavailable {
                            message: e.to_string(),
                        })
                    }
                };
            }
        }
    }
}
