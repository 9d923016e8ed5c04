// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns telemetry records into routed log events.
//!
//! A record carrying a string `value` field is a log line and its value is
//! used verbatim. Every other record is a metric: its tags and fields are
//! flattened into one JSON object that CloudWatch ingests as a structured
//! (EMF) log event.

use chrono::SecondsFormat;
use serde_json::{Map, Number, Value};

use crate::errors::ClassifyError;
use crate::event::Event;
use crate::record::{FieldValue, Record};
use crate::target::Target;

pub const LOG_GROUP_NAME_TAG: &str = "log_group_name";
pub const LOG_STREAM_NAME_TAG: &str = "log_stream_name";
/// Field holding a pre-formatted log line.
pub const LOG_ENTRY_FIELD: &str = "value";
/// Comma-separated names of fields copied into the content without
/// normalization.
pub const ATTRIBUTES_IN_FIELDS_TAG: &str = "attributesInFields";

/// Outcome of classifying one record.
#[derive(Debug)]
pub struct Classified {
    pub target: Target,
    pub event: Event,
    /// True when the event is a structured rendering of a metric.
    pub metric_derived: bool,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    default_stream: String,
}

impl Classifier {
    pub fn new(default_stream: impl Into<String>) -> Self {
        Classifier {
            default_stream: default_stream.into(),
        }
    }

    pub fn classify(&self, mut record: Record) -> Result<Classified, ClassifyError> {
        let target = self.target_from_record(&mut record)?;

        let (message, metric_derived) = match record.fields.get(LOG_ENTRY_FIELD) {
            Some(FieldValue::String(line)) => (line.clone(), false),
            Some(_) => return Err(ClassifyError::NonStringLogEntry(record.name)),
            None => (structured_content(&mut record)?, true),
        };

        if message.is_empty() {
            return Err(ClassifyError::EmptyMessage(record.name));
        }

        Ok(Classified {
            target,
            event: Event::new(message, record.timestamp),
            metric_derived,
        })
    }

    /// Resolves the destination and strips the routing tags from the record.
    pub fn target_from_record(&self, record: &mut Record) -> Result<Target, ClassifyError> {
        let group = match record.remove_tag(LOG_GROUP_NAME_TAG) {
            Some(group) if !group.is_empty() => group,
            _ => return Err(ClassifyError::MissingLogGroup(record.name.clone())),
        };

        let stream = match record.remove_tag(LOG_STREAM_NAME_TAG) {
            Some(stream) if !stream.is_empty() => stream,
            _ => self.default_stream.clone(),
        };

        Ok(Target { group, stream })
    }
}

fn structured_content(record: &mut Record) -> Result<String, ClassifyError> {
    let mut content = Map::new();

    if let Some(attributes) = record.remove_tag(ATTRIBUTES_IN_FIELDS_TAG) {
        for attribute in attributes.split(',') {
            if let Some(value) = record.remove_field(attribute) {
                content.insert(attribute.to_string(), verbatim(&value)?);
            }
        }
    }

    for (key, value) in &record.tags {
        content.insert(key.clone(), Value::String(value.clone()));
    }

    // Reject the whole record before converting anything.
    if let Some((field, value)) = record.fields.iter().find(|(_, v)| !is_supported(v)) {
        return Err(ClassifyError::UnsupportedFieldType {
            field: field.clone(),
            kind: value.type_name(),
        });
    }

    for (key, value) in &record.fields {
        content.insert(key.clone(), normalized(value)?);
    }

    serde_json::to_string(&Value::Object(content)).map_err(|e| ClassifyError::Encode(e.to_string()))
}

fn is_supported(value: &FieldValue) -> bool {
    matches!(
        value,
        FieldValue::I32(_)
            | FieldValue::I64(_)
            | FieldValue::U32(_)
            | FieldValue::U64(_)
            | FieldValue::F64(_)
            | FieldValue::Bool(_)
            | FieldValue::String(_)
            | FieldValue::Timestamp(_)
    )
}

/// Numeric values become `f64` on purpose, precision loss included.
#[allow(clippy::cast_precision_loss)]
fn normalized(value: &FieldValue) -> Result<Value, ClassifyError> {
    match value {
        FieldValue::I32(v) => float(f64::from(*v)),
        FieldValue::I64(v) => float(*v as f64),
        FieldValue::U32(v) => float(f64::from(*v)),
        FieldValue::U64(v) => float(*v as f64),
        FieldValue::F64(v) => float(*v),
        FieldValue::Bool(v) => Ok(Value::Bool(*v)),
        FieldValue::String(v) => Ok(Value::String(v.clone())),
        FieldValue::Timestamp(t) => float(t.timestamp() as f64),
        other => Err(ClassifyError::Encode(format!(
            "unsupported type {}",
            other.type_name()
        ))),
    }
}

fn verbatim(value: &FieldValue) -> Result<Value, ClassifyError> {
    match value {
        FieldValue::I8(v) => Ok(Value::from(*v)),
        FieldValue::I16(v) => Ok(Value::from(*v)),
        FieldValue::I32(v) => Ok(Value::from(*v)),
        FieldValue::I64(v) => Ok(Value::from(*v)),
        FieldValue::U8(v) => Ok(Value::from(*v)),
        FieldValue::U16(v) => Ok(Value::from(*v)),
        FieldValue::U32(v) => Ok(Value::from(*v)),
        FieldValue::U64(v) => Ok(Value::from(*v)),
        FieldValue::F32(v) => float(f64::from(*v)),
        FieldValue::F64(v) => float(*v),
        FieldValue::Bool(v) => Ok(Value::Bool(*v)),
        FieldValue::String(v) => Ok(Value::String(v.clone())),
        FieldValue::Timestamp(t) => Ok(Value::String(
            t.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        )),
    }
}

// serde_json would quietly write NaN and infinities as null.
fn float(v: f64) -> Result<Value, ClassifyError> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| ClassifyError::Encode(format!("unsupported value: {v}")))
}
