// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The seam between the pipeline and the ingestion service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::DeliveryError;
use crate::event::Event;
use crate::target::Target;

/// Transport-level retries of a single request, below the batch retry
/// window of the pusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Number of attempts, no delay between them.
    Immediate(u64),
    /// Number of attempts and the delay in milliseconds between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    pub fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    pub fn delay(&self) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Immediate(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputLogEvent {
    pub timestamp: i64,
    pub message: String,
}

impl From<&Event> for InputLogEvent {
    fn from(event: &Event) -> Self {
        InputLogEvent {
            timestamp: event.timestamp_millis(),
            message: event.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutLogEventsRequest {
    pub target: Target,
    pub events: Vec<InputLogEvent>,
    /// Marks the payload as embedded metric format.
    pub emf: bool,
}

/// Indices of events the service accepted the batch without.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedLogEventsInfo {
    pub too_new_log_event_start_index: Option<i64>,
    pub too_old_log_event_end_index: Option<i64>,
    pub expired_log_event_end_index: Option<i64>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutLogEventsResponse {
    pub next_sequence_token: Option<String>,
    pub rejected_log_events_info: Option<RejectedLogEventsInfo>,
}

#[async_trait]
pub trait LogsClient: Send + Sync {
    async fn put_log_events(
        &self,
        request: &PutLogEventsRequest,
    ) -> Result<PutLogEventsResponse, DeliveryError>;

    async fn create_log_group(&self, group: &str) -> Result<(), DeliveryError>;

    async fn create_log_stream(&self, target: &Target) -> Result<(), DeliveryError>;

    /// Swaps the transport retry strategy at runtime.
    fn set_retry_strategy(&self, _strategy: RetryStrategy) {}
}

/// Builds the delivery client of a destination on its first use.
pub trait ClientFactory: Send + Sync {
    fn build(&self, target: &Target) -> Arc<dyn LogsClient>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn test_retry_strategy() {
        assert_eq!(RetryStrategy::Immediate(3).attempts(), 3);
        assert_eq!(RetryStrategy::Immediate(0).attempts(), 1);
        assert_eq!(RetryStrategy::Immediate(3).delay(), Duration::ZERO);
        assert_eq!(
            RetryStrategy::LinearBackoff(2, 150).delay(),
            Duration::from_millis(150)
        );
        assert_eq!(RetryStrategy::default(), RetryStrategy::Immediate(1));
    }

    #[test]
    fn test_input_log_event_from_event() {
        let ts = DateTime::from_timestamp(1_700_000_000, 5_000_000).unwrap();
        let input = InputLogEvent::from(&Event::new("hello", ts));

        assert_eq!(input.timestamp, 1_700_000_000_005);
        assert_eq!(
            serde_json::to_string(&input).unwrap(),
            r#"{"timestamp":1700000000005,"message":"hello"}"#
        );
    }

    #[test]
    fn test_response_deserialization() {
        let response: PutLogEventsResponse = serde_json::from_str(
            r#"{"nextSequenceToken":"abc","rejectedLogEventsInfo":{"tooOldLogEventEndIndex":2}}"#,
        )
        .unwrap();

        assert_eq!(response.next_sequence_token.as_deref(), Some("abc"));
        assert_eq!(
            response.rejected_log_events_info,
            Some(RejectedLogEventsInfo {
                too_old_log_event_end_index: Some(2),
                ..Default::default()
            })
        );

        let empty: PutLogEventsResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, PutLogEventsResponse::default());
    }
}
