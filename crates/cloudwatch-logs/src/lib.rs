// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # CloudWatch Logs output
//!
//! Egress of telemetry records to Amazon CloudWatch Logs.
//!
//! ```text
//!   Record ──> Classifier ──> Router ──> Destination ──> Pusher ──> LogsClient
//!              (target,        (one per    (plain/EMF,    (batches,   (HTTP)
//!               event)          target)     enqueue)       retries)
//! ```
//!
//! Records with a string `value` field are log lines. Every other record is a
//! metric, flattened into a JSON document and shipped as embedded metric
//! format (EMF). A destination that has seen EMF traffic stays EMF.
//!
//! Each destination delivers one batch at a time, in order, and retries
//! transient failures with exponential backoff inside a bounded window.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod classifier;
pub mod client;
pub mod config;
pub mod constants;
pub mod destination;
pub mod errors;
pub mod event;
pub mod http;
pub mod mode;
pub mod output;
pub mod pusher;
pub mod record;
pub mod retry;
pub mod router;
pub mod target;

pub use client::{ClientFactory, LogsClient, RetryStrategy};
pub use config::Config;
pub use errors::{ClassifyError, ConfigError, DeliveryError, OutputError};
pub use event::Event;
pub use output::CloudWatchLogs;
pub use record::{FieldValue, Record};
pub use target::Target;
