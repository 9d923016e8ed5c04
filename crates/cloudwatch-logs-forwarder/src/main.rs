// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod input;

use chrono::Utc;
use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cloudwatch_logs::{
    destination::Destination, http::HttpClientFactory, CloudWatchLogs, Config, Event, OutputError,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("CWLOGS_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return;
        }
    };

    let factory = Arc::new(HttpClientFactory::new(&config, None));
    let output = CloudWatchLogs::new(config, factory);
    if let Err(e) = output.connect() {
        error!("Unable to connect output: {e}");
        return;
    }

    let direct = match output.create_dest("", "") {
        Ok(destination) => Some(destination),
        Err(e) => {
            debug!("Raw lines will be dropped: {e}");
            None
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received interrupt, shutting down");
                    shutdown.cancel();
                }
                Err(e) => error!("Unable to listen for shutdown signal: {e}"),
            }
        });
    }

    info!("Forwarding records from stdin to {}", output.config().endpoint());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = forward_line(&output, direct.as_ref(), &line).await {
                        error!("Stopped forwarding: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("End of input");
                    break;
                }
                Err(e) => {
                    error!("Unable to read from stdin: {e}");
                    break;
                }
            },
        }
    }

    output.close().await;
}

/// Writes a record line through the output, or publishes a raw line to the
/// direct destination.
async fn forward_line(
    output: &CloudWatchLogs,
    direct: Option<&Arc<Destination>>,
    line: &str,
) -> Result<(), OutputError> {
    let line = line.trim_end();
    if line.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    match input::parse_record(line, now) {
        Ok(record) => output.write(vec![record]).await,
        Err(input::InputError::NotARecord(_)) => match direct {
            Some(destination) => destination.publish(vec![Event::new(line, now)]).await,
            None => {
                warn!("Dropping raw line, no log group configured");
                Ok(())
            }
        },
        Err(e) => {
            warn!("Dropping record: {e}");
            Ok(())
        }
    }
}
