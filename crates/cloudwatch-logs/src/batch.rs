// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Packing of events into `PutLogEvents` batches.
//!
//! A batch closes when the next event would break one of the service limits:
//! 1. **Count**: at most [`constants::MAX_BATCH_EVENTS`] events
//! 2. **Size**: at most [`constants::MAX_BATCH_SIZE_BYTES`], counting
//!    [`constants::EVENT_HEADER_SIZE_BYTES`] of overhead per event
//! 3. **Span**: all timestamps within [`constants::MAX_BATCH_SPAN`]
//!
//! Events keep their enqueue order. An event that does not fit is handed
//! back to the caller, which sends the current batch and starts a new one
//! with it.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::constants;
use crate::event::Event;

#[derive(Debug)]
pub struct Batch {
    events: Vec<Event>,
    size_bytes: usize,
    oldest: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
    max_events: usize,
    max_size_bytes: usize,
    max_span: Duration,
}

impl Default for Batch {
    fn default() -> Self {
        Batch::new(
            constants::MAX_BATCH_EVENTS,
            constants::MAX_BATCH_SIZE_BYTES,
            constants::MAX_BATCH_SPAN,
        )
    }
}

impl Batch {
    /// Creates a batch with custom limits. Prefer [`Batch::default()`]
    /// outside of tests.
    pub fn new(max_events: usize, max_size_bytes: usize, max_span: Duration) -> Self {
        Batch {
            events: Vec::new(),
            size_bytes: 0,
            oldest: None,
            newest: None,
            max_events,
            max_size_bytes,
            max_span,
        }
    }

    /// Size an event occupies in a batch.
    pub fn event_size(event: &Event) -> usize {
        event.message().len() + constants::EVENT_HEADER_SIZE_BYTES
    }

    /// Appends the event, or returns it when it would break a limit. An
    /// empty batch accepts any event.
    pub fn try_push(&mut self, event: Event) -> Result<(), Event> {
        let size = Self::event_size(&event);
        let timestamp = event.timestamp();

        if !self.events.is_empty()
            && (self.events.len() >= self.max_events
                || self.size_bytes + size > self.max_size_bytes
                || !self.within_span(timestamp))
        {
            return Err(event);
        }

        self.oldest = Some(self.oldest.map_or(timestamp, |t| t.min(timestamp)));
        self.newest = Some(self.newest.map_or(timestamp, |t| t.max(timestamp)));
        self.size_bytes += size;
        self.events.push(event);
        Ok(())
    }

    fn within_span(&self, timestamp: DateTime<Utc>) -> bool {
        let (Some(oldest), Some(newest)) = (self.oldest, self.newest) else {
            return true;
        };
        let span = newest.max(timestamp) - oldest.min(timestamp);
        span.to_std().map_or(true, |span| span < self.max_span)
    }

    /// True once no further event can be added.
    pub fn is_full(&self) -> bool {
        self.events.len() >= self.max_events || self.size_bytes >= self.max_size_bytes
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Drains the batch, keeping its limits for reuse.
    pub fn take(&mut self) -> Vec<Event> {
        self.size_bytes = 0;
        self.oldest = None;
        self.newest = None;
        std::mem::take(&mut self.events)
    }
}

/// Truncates `message` to at most `limit` bytes, ending it with
/// [`constants::TRUNCATED_SUFFIX`]. The cut lands on a character boundary.
/// Returns whether the message was truncated.
pub fn truncate_message(message: &mut String, limit: usize) -> bool {
    if message.len() <= limit {
        return false;
    }
    let mut cut = limit.saturating_sub(constants::TRUNCATED_SUFFIX.len());
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message.truncate(cut);
    message.push_str(constants::TRUNCATED_SUFFIX);
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(message: &str) -> Event {
        Event::new(message, ts(0))
    }

    #[test]
    fn test_batch_default() {
        let batch = Batch::default();

        assert_eq!(batch.max_events, constants::MAX_BATCH_EVENTS);
        assert_eq!(batch.max_size_bytes, constants::MAX_BATCH_SIZE_BYTES);
        assert!(batch.is_empty());
        assert!(!batch.is_full());
    }

    #[test]
    fn test_size_counts_event_overhead() {
        let mut batch = Batch::default();
        batch.try_push(event("hello")).unwrap();
        batch.try_push(event("world!")).unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.size_bytes(),
            5 + 6 + 2 * constants::EVENT_HEADER_SIZE_BYTES
        );
    }

    #[test]
    fn test_count_limit() {
        let mut batch = Batch::new(2, 1024, constants::MAX_BATCH_SPAN);
        batch.try_push(event("a")).unwrap();
        batch.try_push(event("b")).unwrap();

        assert!(batch.is_full());
        let rejected = batch.try_push(event("c")).unwrap_err();
        assert_eq!(rejected.message(), "c");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_size_limit() {
        // Room for two 4-byte messages plus overhead.
        let limit = 2 * (4 + constants::EVENT_HEADER_SIZE_BYTES);
        let mut batch = Batch::new(100, limit, constants::MAX_BATCH_SPAN);
        batch.try_push(event("aaaa")).unwrap();
        batch.try_push(event("bbbb")).unwrap();

        assert!(batch.try_push(event("c")).is_err());
        assert!(batch.is_full());
    }

    #[test]
    fn test_empty_batch_accepts_anything() {
        let mut batch = Batch::new(1, 1, constants::MAX_BATCH_SPAN);
        batch.try_push(event("much larger than the limit")).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_span_limit() {
        let mut batch = Batch::default();
        batch.try_push(Event::new("first", ts(0))).unwrap();
        batch.try_push(Event::new("later", ts(23 * 3600))).unwrap();

        let rejected = batch
            .try_push(Event::new("next day", ts(24 * 3600)))
            .unwrap_err();
        assert_eq!(rejected.message(), "next day");

        // Earlier timestamps count as well.
        assert!(batch
            .try_push(Event::new("yesterday", ts(-3600)))
            .is_err());
        batch.try_push(Event::new("in between", ts(3600))).unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_take_preserves_order_and_resets() {
        let mut batch = Batch::new(2, 1024, constants::MAX_BATCH_SPAN);
        batch.try_push(event("1")).unwrap();
        batch.try_push(event("2")).unwrap();

        let events = batch.take();
        let messages: Vec<&str> = events.iter().map(Event::message).collect();
        assert_eq!(messages, vec!["1", "2"]);

        assert!(batch.is_empty());
        assert_eq!(batch.size_bytes(), 0);
        batch.try_push(Event::new("far away", ts(10 * 24 * 3600))).unwrap();
        batch.try_push(event("3")).unwrap_err();
    }

    #[test]
    fn test_truncate_message() {
        let mut short = "short".to_string();
        assert!(!truncate_message(&mut short, 10));
        assert_eq!(short, "short");

        let mut long = "x".repeat(constants::MAX_MESSAGE_SIZE_BYTES + 1);
        assert!(truncate_message(
            &mut long,
            constants::MAX_MESSAGE_SIZE_BYTES
        ));
        assert_eq!(long.len(), constants::MAX_MESSAGE_SIZE_BYTES);
        assert!(long.ends_with(constants::TRUNCATED_SUFFIX));
    }

    #[test]
    fn test_truncate_message_respects_char_boundaries() {
        let mut message = "é".repeat(20);
        assert!(truncate_message(&mut message, 25));
        assert!(message.len() <= 25);
        assert!(message.ends_with(constants::TRUNCATED_SUFFIX));
        assert!(message.starts_with("éééé"));
    }

    proptest! {
        #[test]
        fn prop_truncated_messages_fit(message in ".{0,300}", limit in 15usize..200) {
            let mut truncated = message.clone();
            if truncate_message(&mut truncated, limit) {
                prop_assert!(truncated.len() <= limit);
                prop_assert!(truncated.ends_with(constants::TRUNCATED_SUFFIX));
                let kept = &truncated[..truncated.len() - constants::TRUNCATED_SUFFIX.len()];
                prop_assert!(message.starts_with(kept));
            } else {
                prop_assert_eq!(truncated, message);
            }
        }
    }
}
