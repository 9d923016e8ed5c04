// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer};
use std::env;
use std::time::Duration;

use crate::constants;
use crate::errors::ConfigError;
use crate::pusher::PusherConfig;

/// Credential parameters handed to the request signer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub token: Option<String>,
    pub role_arn: Option<String>,
    pub profile: Option<String>,
    pub shared_credential_file: Option<String>,
}

impl Credentials {
    /// Whether any credential parameter is set.
    pub fn is_configured(&self) -> bool {
        [
            &self.access_key,
            &self.secret_key,
            &self.token,
            &self.role_arn,
            &self.profile,
            &self.shared_credential_file,
        ]
        .iter()
        .any(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

/// Static settings of the CloudWatch Logs output
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AWS region of the ingestion endpoint
    pub region: String,
    /// Replaces `https://logs.<region>.amazonaws.com`
    pub endpoint_override: Option<String>,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Group of the direct log-forwarding path
    pub log_group_name: String,
    /// Stream used when a record does not name one
    pub log_stream_name: String,
    /// Longest time a non-empty batch waits before it is sent
    #[serde(deserialize_with = "duration_from_secs")]
    pub force_flush_interval: Duration,
    /// Retry window of log traffic
    #[serde(deserialize_with = "duration_from_secs")]
    pub max_retry_duration: Duration,
    /// Events buffered per destination
    pub queue_capacity: usize,
    /// Per-request transport timeout
    #[serde(deserialize_with = "duration_from_secs")]
    pub request_timeout: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_override: None,
            credentials: Credentials::default(),
            log_group_name: String::new(),
            log_stream_name: "default".to_string(),
            force_flush_interval: constants::DEFAULT_FLUSH_INTERVAL,
            max_retry_duration: constants::MAX_RETRY_DURATION,
            queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            request_timeout: constants::DEFAULT_REQUEST_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    lookup(key)
        .map(|val| {
            val.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| {
                ConfigError::Invalid(format!("{key} must be a number of seconds, got '{val}'"))
            })
        })
        .transpose()
}

impl Config {
    /// Create configuration from `CWLOGS_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        let region = non_empty("CWLOGS_REGION")
            .or_else(|| non_empty("AWS_REGION"))
            .unwrap_or(defaults.region);
        let credentials = Credentials {
            access_key: non_empty("CWLOGS_ACCESS_KEY"),
            secret_key: non_empty("CWLOGS_SECRET_KEY"),
            token: non_empty("CWLOGS_TOKEN"),
            role_arn: non_empty("CWLOGS_ROLE_ARN"),
            profile: non_empty("CWLOGS_PROFILE"),
            shared_credential_file: non_empty("CWLOGS_SHARED_CREDENTIAL_FILE"),
        };
        let queue_capacity = match non_empty("CWLOGS_QUEUE_CAPACITY") {
            Some(val) => val.trim().parse::<usize>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "CWLOGS_QUEUE_CAPACITY must be a number, got '{val}'"
                ))
            })?,
            None => defaults.queue_capacity,
        };
        let log_level = lookup("CWLOGS_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            region,
            endpoint_override: non_empty("CWLOGS_ENDPOINT_URL"),
            credentials,
            log_group_name: lookup("CWLOGS_LOG_GROUP_NAME").unwrap_or_default(),
            log_stream_name: non_empty("CWLOGS_LOG_STREAM_NAME")
                .unwrap_or(defaults.log_stream_name),
            force_flush_interval: parse_secs(&non_empty, "CWLOGS_FORCE_FLUSH_INTERVAL")?
                .unwrap_or(defaults.force_flush_interval),
            max_retry_duration: parse_secs(&non_empty, "CWLOGS_MAX_RETRY_DURATION")?
                .unwrap_or(defaults.max_retry_duration),
            queue_capacity,
            request_timeout: parse_secs(&non_empty, "CWLOGS_REQUEST_TIMEOUT")?
                .unwrap_or(defaults.request_timeout),
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() && self.endpoint_override.is_none() {
            return Err(ConfigError::Invalid(
                "a region or an endpoint override is required".to_string(),
            ));
        }

        if let Some(endpoint) = &self.endpoint_override {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "endpoint override '{endpoint}' must be an http(s) URL"
                )));
            }
        }

        if self.credentials.access_key.is_some() != self.credentials.secret_key.is_some() {
            return Err(ConfigError::Invalid(
                "access_key and secret_key must be set together".to_string(),
            ));
        }

        if self.log_stream_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default log stream name cannot be empty".to_string(),
            ));
        }

        if self.force_flush_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "force flush interval must be greater than 0".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Settings of the per-destination pushers. Metric traffic overrides the
    /// retry window at routing time.
    pub fn pusher_config(&self) -> PusherConfig {
        PusherConfig {
            flush_interval: self.force_flush_interval,
            retry_duration: self.max_retry_duration,
            queue_capacity: self.queue_capacity,
        }
    }

    /// Base URL of the ingestion endpoint.
    pub fn endpoint(&self) -> String {
        match &self.endpoint_override {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://logs.{}.amazonaws.com", self.region),
        }
    }
}
