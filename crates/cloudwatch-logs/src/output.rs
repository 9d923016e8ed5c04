// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle surface of the CloudWatch Logs output.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::classifier::Classifier;
use crate::client::ClientFactory;
use crate::config::Config;
use crate::constants;
use crate::destination::Destination;
use crate::errors::OutputError;
use crate::pusher::StatsSnapshot;
use crate::record::Record;
use crate::router::Router;
use crate::target::Target;

const SAMPLE_CONFIG: &str = r#"
  ## Amazon REGION
  region = "us-east-1"

  ## Amazon Credentials
  ## Credentials are loaded in the following order
  ## 1) Assumed credentials via STS if role_arn is specified
  ## 2) explicit credentials from 'access_key' and 'secret_key'
  ## 3) shared profile from 'profile'
  ## 4) environment variables
  ## 5) shared credentials file
  ## 6) EC2 Instance Profile
  #access_key = ""
  #secret_key = ""
  #token = ""
  #role_arn = ""
  #profile = ""
  #shared_credential_file = ""

  ## Endpoint to make requests against, the correct endpoint is
  ## automatically determined from the region.
  #endpoint_override = ""

  ## The log group and stream of the direct log forwarding path.
  #log_group_name = "<log_group_name>"
  log_stream_name = "<log_stream_name>"

  ## Seconds a non-empty batch waits before it is sent.
  #force_flush_interval = 5

  ## Seconds a log batch is retried before it is dropped.
  #max_retry_duration = 1210200
"#;

pub struct CloudWatchLogs {
    config: Config,
    classifier: Classifier,
    router: Router,
}

impl CloudWatchLogs {
    pub fn new(config: Config, factory: Arc<dyn ClientFactory>) -> Self {
        let classifier = Classifier::new(config.log_stream_name.clone());
        let router = Router::new(factory, config.pusher_config());
        CloudWatchLogs {
            config,
            classifier,
            router,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Nothing to connect ahead of time. Destinations come up on first use.
    pub fn connect(&self) -> Result<(), OutputError> {
        Ok(())
    }

    /// Classifies and routes each record. Records that cannot be classified
    /// are logged and dropped.
    pub async fn write(&self, records: Vec<Record>) -> Result<(), OutputError> {
        for record in records {
            let classified = match self.classifier.classify(record) {
                Ok(classified) => classified,
                Err(e) => {
                    error!("Dropping record: {e}");
                    continue;
                }
            };

            let destination = self.router.resolve(&classified.target)?;
            if classified.metric_derived {
                destination.mark_emf();
                destination.set_retry_duration(constants::METRIC_RETRY_DURATION);
            }
            destination.add_event(classified.event).await?;
        }
        Ok(())
    }

    /// Destination of the direct log-forwarding path. Empty names fall back
    /// to the configured ones.
    pub fn create_dest(&self, group: &str, stream: &str) -> Result<Arc<Destination>, OutputError> {
        let group = if group.is_empty() {
            self.config.log_group_name.as_str()
        } else {
            group
        };
        let stream = if stream.is_empty() {
            self.config.log_stream_name.as_str()
        } else {
            stream
        };
        if group.is_empty() {
            return Err(OutputError::MissingLogGroup);
        }

        debug!("Creating direct destination {group}/{stream}");
        self.router.resolve(&Target::new(group, stream))
    }

    /// Stops every destination after a best-effort flush.
    pub async fn close(&self) {
        info!("Closing CloudWatch Logs output");
        self.router.close().await;
        for (target, stats) in self.router.stats() {
            info!(
                "{}: delivered {} events in {} batches, dropped {} events, {} batches rejected, {} abandoned",
                target,
                stats.delivered_events,
                stats.delivered_batches,
                stats.dropped_events,
                stats.rejected_batches,
                stats.abandoned_batches
            );
        }
    }

    pub fn stats(&self) -> Vec<(Target, StatsSnapshot)> {
        self.router.stats()
    }

    pub fn destinations(&self) -> usize {
        self.router.len()
    }

    pub fn description() -> &'static str {
        "Configuration for AWS CloudWatch Logs output."
    }

    pub fn sample_config() -> &'static str {
        SAMPLE_CONFIG
    }
}
