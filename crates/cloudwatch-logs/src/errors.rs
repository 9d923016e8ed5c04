// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Reasons a record cannot be turned into an event. The defect is in the
/// input shape, so these are never retried.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ClassifyError {
    #[error("record '{0}' has no log group name")]
    MissingLogGroup(String),
    #[error("log entry field of record '{0}' is not a string")]
    NonStringLogEntry(String),
    #[error("field '{field}' has unsupported type {kind}")]
    UnsupportedFieldType { field: String, kind: &'static str },
    #[error("unable to encode structured log content: {0}")]
    Encode(String),
    #[error("record '{0}' produced an empty message")]
    EmptyMessage(String),
}

/// Errors reported to producers enqueueing into a destination.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OutputError {
    #[error("output stopped")]
    OutputStopped,
    #[error("no log group name configured")]
    MissingLogGroup,
}

/// Failure of a single call to the ingestion service.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("request throttled: {0}")]
    Throttled(String),
    #[error("service unavailable ({status:?}): {message}")]
    ServiceUnavailable {
        status: Option<StatusCode>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    #[error("resource already exists: {0}")]
    ResourceAlreadyExists(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("data already accepted: {0}")]
    DataAlreadyAccepted(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("failed to prepare payload: {0}")]
    Payload(String),
    #[error("unexpected service error ({status:?}) {code}: {message}")]
    Unknown {
        status: Option<StatusCode>,
        code: String,
        message: String,
    },
}

impl DeliveryError {
    /// Whether sending the same batch again can succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            DeliveryError::Throttled(_)
            | DeliveryError::ServiceUnavailable { .. }
            | DeliveryError::Transport(_)
            | DeliveryError::ResourceNotFound(_)
            | DeliveryError::Unknown { .. } => true,
            DeliveryError::ResourceAlreadyExists(_)
            | DeliveryError::InvalidParameter(_)
            | DeliveryError::DataAlreadyAccepted(_)
            | DeliveryError::AccessDenied(_)
            | DeliveryError::Payload(_) => false,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            DeliveryError::Payload(err.to_string())
        } else {
            DeliveryError::Transport(err.to_string())
        }
    }
}

/// Invalid static settings of the output.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
