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

// Record to Pub/Sub message conversion

use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::OutputSettings;
use crate::record::{fields_to_json, FieldValue, Record};

/// Attribute always carrying the routing tag
pub const TAG_ATTRIBUTE: &str = "tag";

/// A message ready to be handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub attributes: HashMap<String, String>,
    pub data: Bytes,
}

impl OutboundMessage {
    /// Approximate request size used for batching thresholds
    pub fn size(&self) -> usize {
        self.data.len()
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("field '{field}' holds a non-finite float ({value}) that cannot be encoded as JSON")]
    NonFiniteFloat { field: String, value: f64 },

    #[error("failed to encode message body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Builds outbound messages from decoded records
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    timestamp_field: Option<String>,
    attribute_fields: Vec<String>,
    keep_attribute_fields: bool,
}

impl MessageBuilder {
    pub fn new(settings: &OutputSettings) -> Self {
        Self {
            timestamp_field: settings
                .timestamp_field
                .clone()
                .filter(|field| !field.is_empty()),
            attribute_fields: settings.attribute_fields.clone(),
            keep_attribute_fields: settings.keep_attribute_fields,
        }
    }

    /// Build a message from `record`
    ///
    /// The record's fields are mutated in place (timestamp injection and
    /// attribute removal) so the caller can still log them if encoding fails.
    pub fn build(&self, record: &mut Record, tag: &str) -> Result<OutboundMessage, BuildError> {
        if let Some(field) = &self.timestamp_field {
            record.fields.insert(
                field.clone(),
                FieldValue::Integer(i128::from(record.timestamp.timestamp_micros())),
            );
        }

        let mut attributes = HashMap::with_capacity(self.attribute_fields.len() + 1);
        attributes.insert(TAG_ATTRIBUTE.to_string(), tag.to_string());

        for field in &self.attribute_fields {
            if self.keep_attribute_fields {
                if let Some(value) = record.fields.get(field) {
                    attributes.insert(field.clone(), value.to_string());
                }
            } else if let Some(value) = record.fields.remove(field) {
                attributes.insert(field.clone(), value.to_string());
            }
        }

        let body = fields_to_json(&record.fields).map_err(|nan| BuildError::NonFiniteFloat {
            field: offending_field(record),
            value: nan.0,
        })?;
        let data = serde_json::to_vec(&body)?;

        Ok(OutboundMessage {
            attributes,
            data: Bytes::from(data),
        })
    }
}

/// Top-level field holding the first value that failed to encode
fn offending_field(record: &Record) -> String {
    record
        .fields
        .iter()
        .find(|(_, v)| v.to_json().is_err())
        .map(|(k, _)| k.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Fields;
    use chrono::DateTime;
    use serde_json::json;

    fn settings(fields: &[&str], keep: bool, ts: Option<&str>) -> OutputSettings {
        OutputSettings {
            timestamp_field: ts.map(str::to_string),
            attribute_fields: fields.iter().map(|s| s.to_string()).collect(),
            keep_attribute_fields: keep,
            ..OutputSettings::default()
        }
    }

    fn record(pairs: &[(&str, FieldValue)]) -> Record {
        let fields: Fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Record::new(DateTime::from_timestamp(1_700_000_000, 500_000_000).unwrap(), fields)
    }

    fn body(message: &OutboundMessage) -> serde_json::Value {
        serde_json::from_slice(&message.data).unwrap()
    }

    #[test]
    fn test_tag_attribute_always_set() {
        let builder = MessageBuilder::new(&settings(&[], false, None));
        let mut rec = record(&[("msg", "hi".into())]);
        let message = builder.build(&mut rec, "app.logs").unwrap();
        assert_eq!(message.attributes.len(), 1);
        assert_eq!(message.attributes[TAG_ATTRIBUTE], "app.logs");
        assert_eq!(body(&message), json!({"msg": "hi"}));
    }

    #[test]
    fn test_timestamp_overwrites_existing_field() {
        let builder = MessageBuilder::new(&settings(&[], false, Some("ts")));
        let mut rec = record(&[("ts", "old".into())]);
        let message = builder.build(&mut rec, "t").unwrap();
        assert_eq!(body(&message), json!({"ts": 1_700_000_000_500_000i64}));
    }

    #[test]
    fn test_empty_timestamp_field_is_disabled() {
        let builder = MessageBuilder::new(&settings(&[], false, Some("")));
        let mut rec = record(&[("msg", "hi".into())]);
        let message = builder.build(&mut rec, "t").unwrap();
        assert_eq!(body(&message), json!({"msg": "hi"}));
    }

    #[test]
    fn test_non_string_attributes_are_stringified() {
        let builder = MessageBuilder::new(&settings(&["code", "ok", "ratio"], false, None));
        let mut rec = record(&[
            ("code", FieldValue::Integer(404)),
            ("ok", FieldValue::Bool(true)),
            ("ratio", FieldValue::Float(0.5)),
        ]);
        let message = builder.build(&mut rec, "t").unwrap();
        assert_eq!(message.attributes["code"], "404");
        assert_eq!(message.attributes["ok"], "true");
        assert_eq!(message.attributes["ratio"], "0.5");
        assert_eq!(body(&message), json!({}));
    }

    #[test]
    fn test_non_finite_float_is_build_error() {
        let builder = MessageBuilder::new(&settings(&[], false, None));
        let mut rec = record(&[("bad", FieldValue::Float(f64::NAN)), ("msg", "hi".into())]);
        let err = builder.build(&mut rec, "t").unwrap_err();
        match err {
            BuildError::NonFiniteFloat { field, .. } => assert_eq!(field, "bad"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_float_lifted_to_attribute_is_not_an_error() {
        let builder = MessageBuilder::new(&settings(&["bad"], false, None));
        let mut rec = record(&[("bad", FieldValue::Float(f64::INFINITY))]);
        let message = builder.build(&mut rec, "t").unwrap();
        assert_eq!(message.attributes["bad"], "inf");
    }

    #[test]
    fn test_message_size() {
        let mut attributes = HashMap::new();
        attributes.insert("tag".to_string(), "abc".to_string());
        let message = OutboundMessage {
            attributes,
            data: Bytes::from_static(b"{}"),
        };
        assert_eq!(message.size(), 8);
    }
}
