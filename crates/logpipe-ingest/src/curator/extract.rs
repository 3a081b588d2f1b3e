//! Field extraction: total functions from a raw payload to typed columns
//!
//! Every extractor returns `None` instead of failing; a `None` becomes SQL
//! NULL in the curated store.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::store::CuratedFields;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Payload path for each curated column.
///
/// Paths are dotted (`http.status`); a key that literally contains dots is
/// matched first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPaths {
    pub time: String,
    pub service: String,
    pub level: String,
    pub event_type: String,
    pub host: String,
    pub status_code: String,
    pub latency_ms: String,
    pub message: String,
}

impl Default for FieldPaths {
    fn default() -> Self {
        Self {
            time: "time".to_string(),
            service: "service".to_string(),
            level: "level".to_string(),
            event_type: "event_type".to_string(),
            host: "host".to_string(),
            status_code: "status_code".to_string(),
            latency_ms: "latency_ms".to_string(),
            message: "message".to_string(),
        }
    }
}

impl FieldPaths {
    pub fn validate(&self) -> Result<()> {
        let paths = [
            ("time", &self.time),
            ("service", &self.service),
            ("level", &self.level),
            ("event_type", &self.event_type),
            ("host", &self.host),
            ("status_code", &self.status_code),
            ("latency_ms", &self.latency_ms),
            ("message", &self.message),
        ];

        for (field, path) in paths {
            if path.trim().is_empty() || path.split('.').any(str::is_empty) {
                return Err(PipelineError::config(format!(
                    "Invalid payload path '{path}' for field {field}"
                )));
            }
        }
        Ok(())
    }

    /// Project a payload onto the curated columns
    pub fn project(&self, payload: &Value) -> CuratedFields {
        CuratedFields {
            event_ts: lookup(payload, &self.time).and_then(extract_timestamp),
            service: lookup(payload, &self.service).and_then(extract_text),
            level: lookup(payload, &self.level).and_then(extract_text),
            event_type: lookup(payload, &self.event_type).and_then(extract_text),
            host: lookup(payload, &self.host).and_then(extract_text),
            status_code: lookup(payload, &self.status_code).and_then(extract_integer),
            latency_ms: lookup(payload, &self.latency_ms).and_then(extract_float),
            message: lookup(payload, &self.message).and_then(extract_text),
        }
    }
}

/// Resolve a dotted path; array elements are addressed by index
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(value) = payload.as_object().and_then(|obj| obj.get(path)) {
        return Some(value);
    }

    path.split('.').try_fold(payload, |current, segment| match current {
        Value::Object(obj) => obj.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Epoch seconds (number or numeric string, fractions allowed) to UTC
pub fn extract_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let secs = extract_float(value)?;

    let whole = secs.floor();
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let nanos = (((secs - whole) * NANOS_PER_SEC).round() as u32).min(999_999_999);

    Utc.timestamp_opt(whole as i64, nanos).single()
}

/// Text projection; `null` is absent, containers render as compact JSON
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

/// Finite number from a JSON number or a numeric string
pub fn extract_float(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Integral number; fractional values are rejected
pub fn extract_integer(value: &Value) -> Option<i64> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
    }
    if let Value::String(s) = value {
        if let Ok(i) = s.trim().parse::<i64>() {
            return Some(i);
        }
    }

    let number = extract_float(value)?;
    if number.fract() != 0.0 || number < i64::MIN as f64 || number >= i64::MAX as f64 {
        return None;
    }
    Some(number as i64)
}
