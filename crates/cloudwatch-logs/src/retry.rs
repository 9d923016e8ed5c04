// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded-duration retry of one batch.
//!
//! Waits grow exponentially from [`constants::MIN_RETRY_WAIT`] up to
//! [`constants::MAX_RETRY_WAIT`], jittered to half..full of the ceiling.
//! Once the next wait would end past the retry window the batch is given up.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants;

#[derive(Debug)]
pub struct RetryState {
    attempts: u32,
    started: Instant,
    max_duration: Duration,
}

impl RetryState {
    /// Starts the window at the first attempt.
    pub fn new(max_duration: Duration) -> Self {
        RetryState {
            attempts: 0,
            started: Instant::now(),
            max_duration,
        }
    }

    /// Number of failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Records a failed attempt. Returns how long to wait before the next
    /// one, or `None` when the retry window is exhausted.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let wait = jittered(backoff_ceiling(self.attempts));
        self.attempts = self.attempts.saturating_add(1);
        if self.elapsed() + wait > self.max_duration {
            None
        } else {
            Some(wait)
        }
    }
}

/// Largest wait after `attempt` failures.
pub fn backoff_ceiling(attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt);
    constants::MIN_RETRY_WAIT
        .saturating_mul(factor)
        .min(constants::MAX_RETRY_WAIT)
}

#[allow(clippy::cast_possible_truncation)]
fn jittered(ceiling: Duration) -> Duration {
    let half = ceiling / 2;
    let spread = half.as_nanos() as u64;
    half + Duration::from_nanos(rand::thread_rng().gen_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_ceiling_grows_and_caps() {
        assert_eq!(backoff_ceiling(0), Duration::from_millis(200));
        assert_eq!(backoff_ceiling(1), Duration::from_millis(400));
        assert_eq!(backoff_ceiling(4), Duration::from_millis(3_200));
        assert_eq!(backoff_ceiling(9), constants::MAX_RETRY_WAIT);
        assert_eq!(backoff_ceiling(u32::MAX), constants::MAX_RETRY_WAIT);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for attempt in 0..12 {
            let ceiling = backoff_ceiling(attempt);
            let wait = jittered(ceiling);
            assert!(wait >= ceiling / 2, "{wait:?} below half of {ceiling:?}");
            assert!(wait <= ceiling, "{wait:?} above {ceiling:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_exhausted() {
        let mut state = RetryState::new(Duration::from_secs(1));

        let first = state.next_wait().expect("first retry fits");
        tokio::time::advance(first).await;
        assert_eq!(state.attempts(), 1);

        let mut waits = 1;
        while let Some(wait) = state.next_wait() {
            tokio::time::advance(wait).await;
            waits += 1;
        }

        assert!(state.elapsed() <= Duration::from_secs(1));
        assert!(waits >= 2, "expected a few retries, got {waits}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_gives_up_immediately() {
        let mut state = RetryState::new(Duration::ZERO);
        assert_eq!(state.next_wait(), None);
    }
}
