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

//! Msgpack record decoder for log shipper chunks
//!
//! A chunk is a concatenation of record units. Each unit is a two element
//! msgpack array:
//!
//! ```text
//! [ event_time, { "key": value, ... } ]
//! [ [event_time, { metadata }], { "key": value, ... } ]   (header form)
//! ```
//!
//! # Event time wire format
//!
//! `event_time` is msgpack extension type `0` carrying exactly 8 bytes:
//!
//! ```text
//! +----------------+----------------+
//! | seconds (u32)  | micros (u32)   |   both big-endian
//! +----------------+----------------+
//! ```
//!
//! The decoder owns one buffer that is cleared and refilled on every
//! [`RecordDecoder::reset`], so its allocation is reused across flushes.

use chrono::{DateTime, SecondsFormat, Utc};
use rmpv::Value;
use thiserror::Error;

use crate::record::{FieldValue, Fields, Record};

/// Extension type reserved for event timestamps
pub const EVENT_TIME_EXT: i8 = 0;

/// Size of an encoded event timestamp payload
pub const EVENT_TIME_LEN: usize = 8;

const MICROS_PER_SECOND: u32 = 1_000_000;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The msgpack stream itself is broken; nothing after `offset` can be trusted
    #[error("invalid msgpack at offset {offset}: {source}")]
    Msgpack {
        offset: usize,
        #[source]
        source: rmpv::decode::Error,
    },

    #[error("malformed record unit at offset {offset}: {reason}")]
    Layout { offset: usize, reason: String },

    #[error("invalid event time at offset {offset}: {reason}")]
    EventTime { offset: usize, reason: String },

    /// The unit is well formed but its field map is not; `fields` is the raw map
    #[error("invalid record fields: {reason}")]
    Fields {
        timestamp: DateTime<Utc>,
        reason: String,
        fields: Value,
    },
}

impl DecodeError {
    /// Timestamp of the rejected record, when it could be decoded
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            DecodeError::Fields { timestamp, .. } => Some(*timestamp),
            _ => None,
        }
    }
}

/// Decoder over one chunk of record units
///
/// Iterating yields `Ok(Record)` for every well formed unit and
/// `Err(DecodeError)` for every rejected one, then `None` once every byte
/// of the chunk has been consumed.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    offset: usize,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            offset: 0,
        }
    }

    /// Discard decoding state and arm the decoder over a complete chunk
    pub fn reset(&mut self, data: &[u8]) {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.offset = 0;
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    /// Allocated size of the reusable decode buffer
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn decode_next(&mut self) -> Result<Record, DecodeError> {
        let start = self.offset;
        let mut rd = &self.buffer[start..];
        let value = match rmpv::decode::read_value(&mut rd) {
            Ok(value) => value,
            Err(source) => {
                // Framing is lost; the rest of the chunk cannot be resynchronized
                self.offset = self.buffer.len();
                return Err(DecodeError::Msgpack {
                    offset: start,
                    source,
                });
            }
        };
        self.offset = self.buffer.len() - rd.len();

        decode_unit(value, start, &self.buffer[start..self.offset])
    }
}

impl Iterator for RecordDecoder {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_exhausted() {
            return None;
        }
        Some(self.decode_next())
    }
}

fn decode_unit(value: Value, offset: usize, raw: &[u8]) -> Result<Record, DecodeError> {
    let mut items = match value {
        Value::Array(items) if items.len() == 2 => items,
        Value::Array(items) => {
            return Err(DecodeError::Layout {
                offset,
                reason: format!("expected a 2 element array, found {} elements", items.len()),
            })
        }
        other => {
            return Err(DecodeError::Layout {
                offset,
                reason: format!("expected a 2 element array, found {}", kind_of(&other)),
            })
        }
    };

    let body = items.pop().unwrap_or(Value::Nil);
    let head = items.pop().unwrap_or(Value::Nil);

    let timestamp = decode_head(head).map_err(|reason| DecodeError::EventTime { offset, reason })?;

    let entries = match body {
        Value::Map(entries) => entries,
        other => {
            return Err(DecodeError::Layout {
                offset,
                reason: format!("expected a field map at position 1, found {}", kind_of(&other)),
            })
        }
    };

    let fields = convert_map(entries).map_err(|reason| DecodeError::Fields {
        timestamp,
        reason,
        fields: raw_fields(raw),
    })?;

    Ok(Record::new(timestamp, fields))
}

/// Re-read the field map of a rejected unit from its encoded bytes
fn raw_fields(mut raw: &[u8]) -> Value {
    match rmpv::decode::read_value(&mut raw) {
        Ok(Value::Array(mut items)) if items.len() == 2 => items.pop().unwrap_or(Value::Nil),
        _ => Value::Nil,
    }
}

/// Decode position 0 of a unit: a bare event time or a `[event_time, metadata]` header
fn decode_head(head: Value) -> Result<DateTime<Utc>, String> {
    match head {
        Value::Ext(tag, data) => decode_event_time(tag, &data),
        Value::Array(mut header) if header.len() == 2 => match header.swap_remove(0) {
            Value::Ext(tag, data) => decode_event_time(tag, &data),
            other => Err(format!(
                "expected event time in record header, found {}",
                kind_of(&other)
            )),
        },
        other => Err(format!("expected event time, found {}", kind_of(&other))),
    }
}

/// Decode an event time extension payload
pub fn decode_event_time(tag: i8, data: &[u8]) -> Result<DateTime<Utc>, String> {
    if tag != EVENT_TIME_EXT {
        return Err(format!("unknown extension type {}", tag));
    }
    let raw: [u8; EVENT_TIME_LEN] = data
        .try_into()
        .map_err(|_| format!("expected {} bytes, found {}", EVENT_TIME_LEN, data.len()))?;

    let seconds = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let micros = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if micros >= MICROS_PER_SECOND {
        return Err(format!("microseconds out of range: {}", micros));
    }

    DateTime::from_timestamp(i64::from(seconds), micros * 1_000)
        .ok_or_else(|| format!("timestamp out of range: {}.{:06}", seconds, micros))
}

/// Encode an event time extension payload
pub fn encode_event_time(timestamp: DateTime<Utc>) -> [u8; EVENT_TIME_LEN] {
    let seconds = timestamp.timestamp() as u32;
    let micros = timestamp.timestamp_subsec_micros();
    let mut out = [0u8; EVENT_TIME_LEN];
    out[..4].copy_from_slice(&seconds.to_be_bytes());
    out[4..].copy_from_slice(&micros.to_be_bytes());
    out
}

fn convert_map(entries: Vec<(Value, Value)>) -> Result<Fields, String> {
    let mut fields = Fields::new();
    for (key, value) in entries {
        let key = match key {
            Value::String(s) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
            other => return Err(format!("key is a {}, expected a string", kind_of(&other))),
        };
        fields.insert(key, convert_value(value)?.normalize());
    }
    Ok(fields)
}

fn convert_value(value: Value) -> Result<FieldValue, String> {
    Ok(match value {
        Value::Nil => FieldValue::Null,
        Value::Boolean(b) => FieldValue::Bool(b),
        Value::Integer(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .map(FieldValue::Integer)
            .ok_or_else(|| format!("integer out of range: {}", n))?,
        Value::F32(f) => FieldValue::Float(f64::from(f)),
        Value::F64(f) => FieldValue::Float(f),
        Value::String(s) => match String::from_utf8(s.into_bytes()) {
            Ok(s) => FieldValue::String(s),
            Err(e) => FieldValue::Bytes(e.into_bytes()),
        },
        Value::Binary(bytes) => FieldValue::Bytes(bytes),
        Value::Array(items) => FieldValue::Sequence(
            items
                .into_iter()
                .map(convert_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Map(entries) => FieldValue::Mapping(convert_map(entries)?),
        Value::Ext(tag, data) => match decode_event_time(tag, &data) {
            Ok(ts) => FieldValue::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Err(_) => FieldValue::Bytes(data),
        },
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(_, _) => "extension",
    }
}
