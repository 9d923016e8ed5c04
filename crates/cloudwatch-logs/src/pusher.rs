// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-destination batching and delivery task.
//!
//! ```text
//!   producers ──(bounded mpsc)──> Pusher task ──> Batch ──> LogsClient
//!                                     │                        │
//!                                     └──── retry / backoff <──┘
//! ```
//!
//! Each destination runs exactly one pusher. The task owns the receiving end
//! of the queue and the batch under construction, and delivers one batch at
//! a time: while a batch is in flight nothing is read from the queue, so
//! producers feel the backpressure. Blocking producers wait for room,
//! non-blocking producers drop their event.
//!
//! A batch is sent when the flush interval has passed since the previous
//! send, or as soon as the next event would not fit.
//!
//! Stopping closes the queue. Events already queued are still batched and
//! sent once, without retries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{truncate_message, Batch};
use crate::client::{InputLogEvent, LogsClient, PutLogEventsRequest, PutLogEventsResponse};
use crate::constants;
use crate::errors::{DeliveryError, OutputError};
use crate::event::Event;
use crate::mode::ModeSwitch;
use crate::retry::RetryState;
use crate::target::Target;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PusherConfig {
    pub flush_interval: Duration,
    pub retry_duration: Duration,
    pub queue_capacity: usize,
}

impl Default for PusherConfig {
    fn default() -> Self {
        PusherConfig {
            flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
            retry_duration: constants::MAX_RETRY_DURATION,
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Counters of one destination. Monotonic for the lifetime of the process.
#[derive(Debug, Default)]
pub struct DestinationStats {
    delivered_events: AtomicU64,
    delivered_batches: AtomicU64,
    dropped_events: AtomicU64,
    rejected_batches: AtomicU64,
    abandoned_batches: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered_events: u64,
    pub delivered_batches: u64,
    pub dropped_events: u64,
    pub rejected_batches: u64,
    pub abandoned_batches: u64,
}

impl DestinationStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered_events: self.delivered_events.load(Ordering::Relaxed),
            delivered_batches: self.delivered_batches.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            rejected_batches: self.rejected_batches.load(Ordering::Relaxed),
            abandoned_batches: self.abandoned_batches.load(Ordering::Relaxed),
        }
    }

    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct Shared {
    retry_duration_ms: AtomicU64,
    stats: DestinationStats,
}

impl Shared {
    fn retry_duration(&self) -> Duration {
        Duration::from_millis(self.retry_duration_ms.load(Ordering::Relaxed))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Rejected,
    Abandoned,
}

/// Producer side of a pusher.
#[derive(Debug)]
pub struct PusherHandle {
    tx: mpsc::Sender<Event>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PusherHandle {
    /// Enqueues the event, waiting for room in the queue.
    pub async fn add_event(&self, event: Event) -> Result<(), OutputError> {
        if self.cancel.is_cancelled() {
            return Err(OutputError::OutputStopped);
        }
        tokio::select! {
            sent = self.tx.send(event) => sent.map_err(|_| OutputError::OutputStopped),
            () = self.cancel.cancelled() => Err(OutputError::OutputStopped),
        }
    }

    /// Enqueues the event without waiting. On a full queue the event is
    /// dropped and the call still succeeds.
    pub fn add_event_non_blocking(&self, event: Event) -> Result<(), OutputError> {
        if self.cancel.is_cancelled() {
            return Err(OutputError::OutputStopped);
        }
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                DestinationStats::add(&self.shared.stats.dropped_events, 1);
                warn!("Event queue is full, dropping newest event");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(OutputError::OutputStopped),
        }
    }

    pub fn retry_duration(&self) -> Duration {
        self.shared.retry_duration()
    }

    /// Applies to batches whose delivery starts after the call.
    pub fn set_retry_duration(&self, retry_duration: Duration) {
        self.shared
            .retry_duration_ms
            .store(as_millis(retry_duration), Ordering::Relaxed);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signals the task and waits for its final flush. Concurrent callers
    /// all return once the flush is over.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!("Pusher task failed: {e}");
            }
        }
    }
}

pub struct Pusher {
    target: Target,
    client: Arc<dyn LogsClient>,
    mode: Arc<ModeSwitch>,
    rx: mpsc::Receiver<Event>,
    batch: Batch,
    flush_interval: Duration,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Pusher {
    /// Starts the pusher of `target` on the current runtime.
    pub fn spawn(
        target: Target,
        client: Arc<dyn LogsClient>,
        mode: Arc<ModeSwitch>,
        config: &PusherConfig,
        cancel: CancellationToken,
    ) -> PusherHandle {
        Self::spawn_with_batch(target, client, mode, config, cancel, Batch::default())
    }

    pub(crate) fn spawn_with_batch(
        target: Target,
        client: Arc<dyn LogsClient>,
        mode: Arc<ModeSwitch>,
        config: &PusherConfig,
        cancel: CancellationToken,
        batch: Batch,
    ) -> PusherHandle {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            retry_duration_ms: AtomicU64::new(as_millis(config.retry_duration)),
            stats: DestinationStats::default(),
        });

        let pusher = Pusher {
            target,
            client,
            mode,
            rx,
            batch,
            flush_interval: config.flush_interval,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(pusher.run());

        PusherHandle {
            tx,
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self) {
        debug!("Pusher for {} started", self.target);
        let mut last_send = Instant::now();

        loop {
            let deadline = last_send + self.flush_interval;
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                received = self.rx.recv() => {
                    let Some(event) = received else { break };
                    if self.add_event(event).await {
                        last_send = Instant::now();
                    }
                    // A steady stream of events must not starve the timer.
                    if !self.batch.is_empty() && Instant::now() >= deadline {
                        self.send().await;
                        last_send = Instant::now();
                    }
                }
                () = sleep_until(deadline), if !self.batch.is_empty() => {
                    self.send().await;
                    last_send = Instant::now();
                }
            }
        }

        // Whatever was queued before the stop gets one last attempt. Backoff
        // waits end at once, so failures are abandoned instead of retried.
        self.rx.close();
        let mut drained = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.add_event(event).await;
            drained += 1;
        }
        self.send().await;
        if drained > 0 {
            debug!(
                "Pusher for {} flushed {} queued events on stop",
                self.target, drained
            );
        }
        debug!("Pusher for {} stopped", self.target);
    }

    /// Adds the event to the current batch, sending first when it does not
    /// fit. Returns whether a batch was sent.
    async fn add_event(&mut self, mut event: Event) -> bool {
        if event.message().is_empty() {
            debug!("Skipping empty event for {}", self.target);
            event.done();
            return false;
        }
        if truncate_message(event.message_mut(), constants::MAX_MESSAGE_SIZE_BYTES) {
            warn!(
                "Event for {} exceeds {} bytes and was truncated",
                self.target,
                constants::MAX_MESSAGE_SIZE_BYTES
            );
        }

        let mut sent = false;
        if let Err(event) = self.batch.try_push(event) {
            self.send().await;
            sent = true;
            if let Err(event) = self.batch.try_push(event) {
                error!("Event does not fit an empty batch, dropping it");
                event.done();
            }
        }
        if self.batch.is_full() {
            self.send().await;
            sent = true;
        }
        sent
    }

    async fn send(&mut self) {
        let events = self.batch.take();
        if events.is_empty() {
            return;
        }

        let mut request = PutLogEventsRequest {
            target: self.target.clone(),
            events: events.iter().map(InputLogEvent::from).collect(),
            emf: self.mode.is_emf(),
        };
        let stats = &self.shared.stats;
        match self.deliver(&mut request).await {
            Outcome::Delivered => {
                DestinationStats::add(&stats.delivered_batches, 1);
                DestinationStats::add(&stats.delivered_events, events.len());
            }
            Outcome::Rejected => DestinationStats::add(&stats.rejected_batches, 1),
            Outcome::Abandoned => DestinationStats::add(&stats.abandoned_batches, 1),
        }

        for event in events {
            event.done();
        }
    }

    async fn deliver(&self, request: &mut PutLogEventsRequest) -> Outcome {
        let mut retry = RetryState::new(self.shared.retry_duration());
        let mut stream_created = false;

        loop {
            // The mode may switch while a batch is backing off.
            request.emf = self.mode.is_emf();
            match self.client.put_log_events(request).await {
                Ok(response) => {
                    debug!(
                        "Pushed {} events to {}",
                        request.events.len(),
                        self.target
                    );
                    self.log_rejected_events(&response);
                    return Outcome::Delivered;
                }
                Err(DeliveryError::DataAlreadyAccepted(message)) => {
                    debug!(
                        "Batch for {} was already accepted: {}",
                        self.target, message
                    );
                    return Outcome::Delivered;
                }
                Err(DeliveryError::ResourceNotFound(message)) => {
                    info!(
                        "Log stream {} not found ({}), creating it",
                        self.target, message
                    );
                    // One immediate resend once the stream exists, so a
                    // final flush on stop still lands.
                    if self.create_log_stream().await && !stream_created {
                        stream_created = true;
                        continue;
                    }
                }
                Err(e) if !e.is_retriable() => {
                    error!(
                        "Dropping batch of {} events for {}: {}",
                        request.events.len(),
                        self.target,
                        e
                    );
                    return Outcome::Rejected;
                }
                Err(e) => {
                    warn!(
                        "Attempt {} to push {} events to {} failed: {}",
                        retry.attempts() + 1,
                        request.events.len(),
                        self.target,
                        e
                    );
                }
            }

            let Some(wait) = retry.next_wait() else {
                error!(
                    "All {} retries to {} failed for {} events over {:?}, giving up",
                    retry.attempts(),
                    self.target,
                    request.events.len(),
                    retry.elapsed()
                );
                return Outcome::Abandoned;
            };

            tokio::select! {
                () = sleep(wait) => {}
                () = self.cancel.cancelled() => {
                    warn!(
                        "Stop requested while retrying {}, abandoning {} events",
                        self.target,
                        request.events.len()
                    );
                    return Outcome::Abandoned;
                }
            }
        }
    }

    /// Creates the stream, and its group when that is missing too. Returns
    /// whether the stream exists afterwards.
    async fn create_log_stream(&self) -> bool {
        match self.client.create_log_stream(&self.target).await {
            Ok(()) | Err(DeliveryError::ResourceAlreadyExists(_)) => return true,
            Err(DeliveryError::ResourceNotFound(_)) => {}
            Err(e) => {
                error!("Failed to create log stream {}: {}", self.target, e);
                return false;
            }
        }

        info!("Log group {} not found, creating it", self.target.group);
        match self.client.create_log_group(&self.target.group).await {
            Ok(()) | Err(DeliveryError::ResourceAlreadyExists(_)) => {}
            Err(e) => {
                error!("Failed to create log group {}: {}", self.target.group, e);
                return false;
            }
        }
        match self.client.create_log_stream(&self.target).await {
            Ok(()) | Err(DeliveryError::ResourceAlreadyExists(_)) => true,
            Err(e) => {
                error!("Failed to create log stream {}: {}", self.target, e);
                false
            }
        }
    }

    fn log_rejected_events(&self, response: &PutLogEventsResponse) {
        let Some(info) = &response.rejected_log_events_info else {
            return;
        };
        if let Some(index) = info.too_old_log_event_end_index {
            warn!(
                "{} log events for {} are too old",
                index + 1,
                self.target
            );
        }
        if let Some(index) = info.too_new_log_event_start_index {
            warn!(
                "Log events for {} starting at index {} are too new",
                self.target, index
            );
        }
        if let Some(index) = info.expired_log_event_end_index {
            warn!("{} log events for {} are expired", index + 1, self.target);
        }
    }
}
