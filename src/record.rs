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

//! Typed log records produced by the decoder
//!
//! Record fields arrive from the log shipper as arbitrarily typed msgpack
//! values. They are modelled as a closed set of variants so the message
//! builder can turn them into JSON and attribute strings without dynamic
//! dispatch.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Field mapping of a single record
pub type Fields = BTreeMap<String, FieldValue>;

/// A decoded log record
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub fields: Fields,
}

impl Record {
    pub fn new(timestamp: DateTime<Utc>, fields: Fields) -> Self {
        Self { timestamp, fields }
    }
}

/// Dynamically typed record value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    /// Covers both the signed and unsigned 64-bit msgpack ranges
    Integer(i128),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Mapping(Fields),
    Sequence(Vec<FieldValue>),
}

/// A float that has no JSON representation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonFiniteFloat(pub f64);

impl FieldValue {
    /// Rewrite the value into a JSON-safe tree
    ///
    /// Byte sequences become strings verbatim (invalid UTF-8 is replaced),
    /// so JSON encoding never falls back to base64. Mappings and sequences
    /// are normalized recursively; every other scalar passes through.
    pub fn normalize(self) -> FieldValue {
        match self {
            FieldValue::Bytes(bytes) => FieldValue::String(bytes_to_string(bytes)),
            FieldValue::Mapping(map) => FieldValue::Mapping(normalize_fields(map)),
            FieldValue::Sequence(items) => {
                FieldValue::Sequence(items.into_iter().map(FieldValue::normalize).collect())
            }
            other => other,
        }
    }

    /// Convert to a `serde_json::Value`, failing on non-finite floats
    pub fn to_json(&self) -> Result<Value, NonFiniteFloat> {
        Ok(match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Integer(n) => integer_to_json(*n),
            FieldValue::Float(f) => Value::Number(Number::from_f64(*f).ok_or(NonFiniteFloat(*f))?),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            FieldValue::Mapping(map) => Value::Object(fields_to_json(map)?),
            FieldValue::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(FieldValue::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    /// Same as [`FieldValue::to_json`] but maps non-finite floats to `null`
    pub(crate) fn to_json_lossy(&self) -> Value {
        match self {
            FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            FieldValue::Mapping(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json_lossy()))
                    .collect(),
            ),
            FieldValue::Sequence(items) => {
                Value::Array(items.iter().map(FieldValue::to_json_lossy).collect())
            }
            other => other.to_json().unwrap_or(Value::Null),
        }
    }
}

/// Attribute representation of a value
///
/// Strings are written verbatim, scalars through their `Display` impl and
/// containers as compact JSON.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(n) => write!(f, "{}", n),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Bytes(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            FieldValue::Mapping(_) | FieldValue::Sequence(_) => {
                write!(f, "{}", self.to_json_lossy())
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value as i128)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Normalize every value of a field mapping
pub fn normalize_fields(fields: Fields) -> Fields {
    fields.into_iter().map(|(k, v)| (k, v.normalize())).collect()
}

/// Convert a field mapping into a JSON object
pub fn fields_to_json(fields: &Fields) -> Result<Map<String, Value>, NonFiniteFloat> {
    let mut object = Map::with_capacity(fields.len());
    for (key, value) in fields {
        object.insert(key.clone(), value.to_json()?);
    }
    Ok(object)
}

fn bytes_to_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

fn integer_to_json(n: i128) -> Value {
    if let Ok(v) = i64::try_from(n) {
        Value::from(v)
    } else if let Ok(v) = u64::try_from(n) {
        Value::from(v)
    } else {
        // Outside the msgpack range; only reachable for hand-built values
        Value::String(n.to_string())
    }
}
