// Shared helpers for integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use fluent_pubsub::decoder::{encode_event_time, EVENT_TIME_EXT};
use fluent_pubsub::pubsub::{PublishError, PublishHandle, Publisher, StatusCode};
use fluent_pubsub::OutboundMessage;
use async_trait::async_trait;
use rmpv::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn ts(seconds: i64, micros: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, micros * 1_000).unwrap()
}

pub fn event_time(timestamp: DateTime<Utc>) -> Value {
    Value::Ext(EVENT_TIME_EXT, encode_event_time(timestamp).to_vec())
}

/// `[event_time, {k: v, ...}]`
pub fn unit(timestamp: DateTime<Utc>, fields: Vec<(&str, Value)>) -> Value {
    Value::Array(vec![
        event_time(timestamp),
        Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (Value::from(k), v))
                .collect(),
        ),
    ])
}

/// `[[event_time, {}], {k: v, ...}]`
pub fn header_unit(timestamp: DateTime<Utc>, fields: Vec<(&str, Value)>) -> Value {
    let Value::Array(mut items) = unit(timestamp, fields) else {
        unreachable!()
    };
    items[0] = Value::Array(vec![event_time(timestamp), Value::Map(Vec::new())]);
    Value::Array(items)
}

pub fn chunk(units: &[Value]) -> Vec<u8> {
    let mut buf = Vec::new();
    for unit in units {
        rmpv::encode::write_value(&mut buf, unit).unwrap();
    }
    buf
}

/// Publisher settling each message from a script keyed by a body substring
#[derive(Default)]
pub struct ScriptedPublisher {
    pub published: Mutex<Vec<OutboundMessage>>,
    rules: Vec<(String, PublishError)>,
    shutdowns: AtomicUsize,
}

impl ScriptedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every message whose body contains `needle`
    pub fn fail_on(mut self, needle: &str, error: PublishError) -> Self {
        self.rules.push((needle.to_string(), error));
        self
    }

    pub fn fail_with_status(self, needle: &str, code: StatusCode) -> Self {
        self.fail_on(needle, PublishError::status(code, "scripted failure"))
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    fn publish(&self, message: OutboundMessage) -> PublishHandle {
        let body = String::from_utf8_lossy(&message.data).into_owned();
        let count = {
            let mut published = self.published.lock().unwrap();
            published.push(message);
            published.len()
        };

        for (needle, error) in &self.rules {
            if body.contains(needle.as_str()) {
                return PublishHandle::ready(Err(error.clone()));
            }
        }
        PublishHandle::ready(Ok(format!("msg-{}", count)))
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    fn publisher_type(&self) -> &str {
        "scripted"
    }
}

/// Publisher whose handles never settle
pub struct StalledPublisher {
    replies: Mutex<Vec<fluent_pubsub::pubsub::PublishReply>>,
}

impl StalledPublisher {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
        }
    }
}

impl Publisher for StalledPublisher {
    fn publish(&self, _message: OutboundMessage) -> PublishHandle {
        let (reply, handle) = PublishHandle::channel();
        // Keep the reply alive so the handle stays pending
        self.replies.lock().unwrap().push(reply);
        handle
    }

    fn publisher_type(&self) -> &str {
        "stalled"
    }
}
