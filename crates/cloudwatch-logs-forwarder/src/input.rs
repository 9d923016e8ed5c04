// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline-delimited JSON records read from stdin.
//!
//! ```text
//! {"name":"cpu","tags":{"log_group_name":"g"},"fields":{"usage_idle":99.5},"timestamp":"2023-11-14T22:13:20Z"}
//! ```
//!
//! Lines without a `fields` object are not records and go to the direct
//! log-forwarding path as they are.

use chrono::{DateTime, Utc};
use cloudwatch_logs::{FieldValue, Record};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("not a record: {0}")]
    NotARecord(#[from] serde_json::Error),
    #[error("field '{0}' must be a number, a string or a boolean")]
    UnsupportedValue(String),
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, Value>,
    timestamp: Option<DateTime<Utc>>,
}

/// Parses one line into a record, stamping it with `now` when it carries no
/// timestamp.
pub fn parse_record(line: &str, now: DateTime<Utc>) -> Result<Record, InputError> {
    let input: InputRecord = serde_json::from_str(line)?;

    let mut record = Record::new(input.name, input.timestamp.unwrap_or(now));
    record.tags = input.tags;
    for (key, value) in input.fields {
        let value =
            field_value(&value).ok_or_else(|| InputError::UnsupportedValue(key.clone()))?;
        record.fields.insert(key, value);
    }
    Ok(record)
}

fn field_value(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Bool(b) => Some(FieldValue::Bool(*b)),
        Value::String(s) => Some(FieldValue::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(FieldValue::I64)
            .or_else(|| n.as_u64().map(FieldValue::U64))
            .or_else(|| n.as_f64().map(FieldValue::F64)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_parse_metric_record() {
        let record = parse_record(
            r#"{"name":"cpu","tags":{"log_group_name":"g","host":"a"},"fields":{"idle":99.5,"cores":8,"big":18446744073709551615,"up":true},"timestamp":"2024-01-01T00:00:00Z"}"#,
            now(),
        )
        .unwrap();

        assert_eq!(record.name, "cpu");
        assert_eq!(record.tags.get("host").map(String::as_str), Some("a"));
        assert_eq!(record.fields.get("idle"), Some(&FieldValue::F64(99.5)));
        assert_eq!(record.fields.get("cores"), Some(&FieldValue::I64(8)));
        assert_eq!(record.fields.get("big"), Some(&FieldValue::U64(u64::MAX)));
        assert_eq!(record.fields.get("up"), Some(&FieldValue::Bool(true)));
        assert_eq!(
            record.timestamp,
            DateTime::from_timestamp(1_704_067_200, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_log_record_defaults() {
        let record = parse_record(r#"{"fields":{"value":"hello"}}"#, now()).unwrap();

        assert_eq!(record.name, "");
        assert!(record.tags.is_empty());
        assert_eq!(
            record.fields.get("value").and_then(FieldValue::as_str),
            Some("hello")
        );
        assert_eq!(record.timestamp, now());
    }

    #[test]
    fn test_non_records_are_rejected() {
        assert!(matches!(
            parse_record("plain text line", now()),
            Err(InputError::NotARecord(_))
        ));
        assert!(matches!(
            parse_record(r#"{"_aws":{"CloudWatchMetrics":[]},"latency":3}"#, now()),
            Err(InputError::NotARecord(_))
        ));
    }

    #[test]
    fn test_nested_values_are_rejected() {
        let err = parse_record(r#"{"fields":{"list":[1,2]}}"#, now()).unwrap_err();
        assert!(matches!(err, InputError::UnsupportedValue(field) if field == "list"));
    }
}
