// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::{LogsClient, RetryStrategy};
use crate::errors::OutputError;
use crate::event::Event;
use crate::mode::{DestinationMode, ModeSwitch};
use crate::pusher::{Pusher, PusherConfig, PusherHandle, StatsSnapshot};
use crate::target::Target;

/// Key every EMF document carries at its top level.
const EMF_MARKER: &str = "\"CloudWatchMetrics\"";

/// Whether a message looks like an embedded metric format document.
pub fn is_emf_message(message: &str) -> bool {
    message.starts_with('{') && message.ends_with('}') && message.contains(EMF_MARKER)
}

/// The pipeline of one (group, stream).
///
/// Plain destinations enqueue with backpressure. Once switched to EMF, events
/// are enqueued without waiting and dropped when the queue is full.
pub struct Destination {
    target: Target,
    client: Arc<dyn LogsClient>,
    mode: Arc<ModeSwitch>,
    pusher: PusherHandle,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("target", &self.target)
            .field("mode", &self.mode())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Destination {
    /// Spawns the destination's pusher on the current runtime.
    pub fn new(
        target: Target,
        client: Arc<dyn LogsClient>,
        config: &PusherConfig,
        cancel: CancellationToken,
    ) -> Self {
        let mode = Arc::new(ModeSwitch::default());
        let pusher = Pusher::spawn(
            target.clone(),
            Arc::clone(&client),
            Arc::clone(&mode),
            config,
            cancel,
        );
        Destination {
            target,
            client,
            mode,
            pusher,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn mode(&self) -> DestinationMode {
        self.mode.current()
    }

    /// Switches the destination to EMF for good.
    pub fn mark_emf(&self) {
        if self.mode.mark_emf() {
            info!("Destination {} switched to EMF", self.target);
        }
    }

    pub async fn add_event(&self, event: Event) -> Result<(), OutputError> {
        if self.is_stopped() {
            return Err(OutputError::OutputStopped);
        }
        match self.mode() {
            DestinationMode::Emf => self.pusher.add_event_non_blocking(event),
            DestinationMode::Plain => self.pusher.add_event(event).await,
        }
    }

    /// Enqueues pre-formatted log events in order. A message shaped like an
    /// EMF document switches the destination to EMF before it is enqueued.
    pub async fn publish(&self, events: Vec<Event>) -> Result<(), OutputError> {
        for event in events {
            if self.mode() == DestinationMode::Plain && is_emf_message(event.message()) {
                self.mark_emf();
            }
            self.add_event(event).await?;
        }
        Ok(())
    }

    pub fn retry_duration(&self) -> Duration {
        self.pusher.retry_duration()
    }

    pub fn set_retry_duration(&self, retry_duration: Duration) {
        self.pusher.set_retry_duration(retry_duration);
    }

    /// Forwards to the delivery client's transport retries.
    pub fn set_retry_strategy(&self, strategy: RetryStrategy) {
        self.client.set_retry_strategy(strategy);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pusher.stats()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire) || self.pusher.is_stopped()
    }

    /// Stops the pusher after its final flush.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.pusher.stop().await;
    }
}
