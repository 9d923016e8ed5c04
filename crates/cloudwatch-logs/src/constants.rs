// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Service limits of the CloudWatch Logs `PutLogEvents` API and the retry
//! windows applied to each traffic class.
//!
//! Batch sizes are computed the way the service computes them: the sum of
//! all message sizes in UTF-8 bytes plus [`EVENT_HEADER_SIZE_BYTES`] for
//! every event.

use std::time::Duration;

/// Fixed overhead the service charges for every event in a batch.
pub const EVENT_HEADER_SIZE_BYTES: usize = 26;

/// Maximum size of one `PutLogEvents` batch, overhead included.
pub const MAX_BATCH_SIZE_BYTES: usize = 1_024 * 1_024;

/// Maximum number of events in one `PutLogEvents` batch.
pub const MAX_BATCH_EVENTS: usize = 10_000;

/// Maximum size of a single message. Longer messages are truncated and end
/// with [`TRUNCATED_SUFFIX`].
pub const MAX_MESSAGE_SIZE_BYTES: usize = 256 * 1_024 - EVENT_HEADER_SIZE_BYTES;

/// Marker appended to truncated messages.
pub const TRUNCATED_SUFFIX: &str = "[Truncated...]";

/// The events of one batch must not span more than this.
pub const MAX_BATCH_SPAN: Duration = Duration::from_secs(24 * 60 * 60);

/// Default flush interval of a destination's pusher.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Default retry window for log traffic. Long enough to ride out extended
/// outages without losing operational logs.
pub const MAX_RETRY_DURATION: Duration = Duration::from_secs(14 * 24 * 60 * 60 + 10 * 60);

/// Retry window for metric-derived traffic. Stale metrics are worthless.
pub const METRIC_RETRY_DURATION: Duration = Duration::from_secs(2 * 60);

/// Default number of events a destination queues before producers feel
/// backpressure.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default timeout of a single HTTP request to the service.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First backoff wait between delivery attempts.
pub const MIN_RETRY_WAIT: Duration = Duration::from_millis(200);

/// Upper bound of a single backoff wait.
pub const MAX_RETRY_WAIT: Duration = Duration::from_secs(60);
