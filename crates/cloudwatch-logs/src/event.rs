// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Callback fired once the pipeline releases an event.
pub type DoneCallback = Box<dyn FnOnce() + Send + Sync + 'static>;

/// A log message ready for delivery.
///
/// Once enqueued the event belongs to the destination's pusher. The done
/// callback runs exactly once, when the batch holding the event is delivered,
/// rejected or abandoned.
pub struct Event {
    message: String,
    timestamp: DateTime<Utc>,
    done: Option<DoneCallback>,
}

impl Event {
    pub fn new(message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Event {
            message: message.into(),
            timestamp,
            done: None,
        }
    }

    /// Attaches an acknowledgment hook, e.g. to advance a tailer's offset.
    #[must_use]
    pub fn with_done_callback(mut self, done: DoneCallback) -> Self {
        self.done = Some(done);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Milliseconds since the Unix epoch, as the service expects them.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub(crate) fn message_mut(&mut self) -> &mut String {
        &mut self.message
    }

    /// Releases the event, firing its callback.
    pub fn done(mut self) {
        if let Some(done) = self.done.take() {
            done();
        }
    }
}

impl Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("message", &self.message)
            .field("timestamp", &self.timestamp)
            .field("has_done_callback", &self.done.is_some())
            .finish()
    }
}
