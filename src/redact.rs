// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Redaction helpers for anything that ends up in log output

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use crate::record::{FieldValue, Fields};

pub const REDACTED: &str = "********";

/// Default number of bytes of record content written to logs
pub const DEFAULT_SUMMARY_LIMIT: usize = 512;

const SENSITIVE_MARKERS: [&str; 5] = ["pass", "secret", "key", "hash", "token"];

/// Whether a field or config key name looks like it holds a credential
pub fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn redact<'a>(name: &str, value: &'a str) -> Cow<'a, str> {
    if is_sensitive(name) {
        Cow::Borrowed(REDACTED)
    } else {
        Cow::Borrowed(value)
    }
}

/// Truncated, redacted rendering of record fields for log lines
pub struct RecordSummary<'a> {
    source: Source<'a>,
    limit: usize,
}

enum Source<'a> {
    Fields(&'a Fields),
    Msgpack(&'a rmpv::Value),
}

impl<'a> RecordSummary<'a> {
    pub fn new(fields: &'a Fields) -> Self {
        Self::with_limit(fields, DEFAULT_SUMMARY_LIMIT)
    }

    pub fn with_limit(fields: &'a Fields, limit: usize) -> Self {
        Self {
            source: Source::Fields(fields),
            limit,
        }
    }

    /// Summary of a field map that could not be decoded into [`Fields`]
    pub fn from_msgpack(value: &'a rmpv::Value) -> Self {
        Self {
            source: Source::Msgpack(value),
            limit: DEFAULT_SUMMARY_LIMIT,
        }
    }
}

impl fmt::Display for RecordSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = match self.source {
            Source::Fields(fields) => Value::Object(redacted_object(fields)),
            Source::Msgpack(value) => redacted_msgpack(value),
        }
        .to_string();
        if rendered.len() <= self.limit {
            return f.write_str(&rendered);
        }

        let mut cut = self.limit;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        write!(
            f,
            "{}...({} bytes truncated)",
            &rendered[..cut],
            rendered.len() - cut
        )
    }
}

/// `key=value` rendering of message attributes, sorted by key
pub struct AttributeSummary<'a>(pub &'a HashMap<String, String>);

impl fmt::Display for AttributeSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        for (i, key) in keys.into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, redact(key, &self.0[key]))?;
        }
        Ok(())
    }
}

fn redacted_object(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| {
            let rendered = if is_sensitive(key) {
                Value::String(REDACTED.to_string())
            } else {
                redacted_value(value)
            };
            (key.clone(), rendered)
        })
        .collect()
}

fn redacted_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Mapping(inner) => Value::Object(redacted_object(inner)),
        FieldValue::Sequence(items) => Value::Array(items.iter().map(redacted_value).collect()),
        other => other.to_json_lossy(),
    }
}

fn redacted_msgpack(value: &rmpv::Value) -> Value {
    use rmpv::Value as Msgpack;

    match value {
        Msgpack::Nil => Value::Null,
        Msgpack::Boolean(b) => Value::Bool(*b),
        Msgpack::Integer(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => Value::from(i),
            (None, Some(u)) => Value::from(u),
            (None, None) => Value::String(n.to_string()),
        },
        Msgpack::F32(f) => serde_json::Number::from_f64(f64::from(*f))
            .map_or_else(|| Value::String(f.to_string()), Value::Number),
        Msgpack::F64(f) => serde_json::Number::from_f64(*f)
            .map_or_else(|| Value::String(f.to_string()), Value::Number),
        Msgpack::String(s) => Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        Msgpack::Binary(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        Msgpack::Array(items) => Value::Array(items.iter().map(redacted_msgpack).collect()),
        Msgpack::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| {
                    let key = match key {
                        Msgpack::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
                        other => other.to_string(),
                    };
                    let rendered = if is_sensitive(&key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redacted_msgpack(value)
                    };
                    (key, rendered)
                })
                .collect(),
        ),
        Msgpack::Ext(tag, data) => Value::String(format!("ext({}, {} bytes)", tag, data.len())),
    }
}
