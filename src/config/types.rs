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

// Configuration types for fluent-pubsub

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginConfig {
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub publish: PublishSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pub/Sub topic identity and transport selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PubSubConfig {
    pub project_id: String,
    pub topic_id: String,

    /// Transport type: "rest" or "stdout"
    #[serde(default = "default_transport")]
    pub transport: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Static OAuth bearer token; omitted when talking to the emulator
    #[serde(default)]
    pub access_token: Option<String>,

    /// Verify the topic exists before accepting flushes
    #[serde(default = "default_true")]
    pub verify_topic: bool,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            topic_id: String::new(),
            transport: default_transport(),
            endpoint: default_endpoint(),
            access_token: None,
            verify_topic: true,
        }
    }
}

/// Per-record message building settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputSettings {
    /// Field to create or overwrite with the record timestamp (microseconds)
    #[serde(default)]
    pub timestamp_field: Option<String>,

    /// Record fields lifted into message attributes, in order
    #[serde(default, deserialize_with = "deserialize_field_list")]
    pub attribute_fields: Vec<String>,

    /// Keep lifted fields in the message body as well
    #[serde(default)]
    pub keep_attribute_fields: bool,

    #[serde(default)]
    pub debug: bool,

    /// Deadline for awaiting publishes of one flush; 0 disables it
    #[serde(default)]
    pub flush_timeout_seconds: u64,
}

impl OutputSettings {
    pub fn flush_timeout(&self) -> Option<Duration> {
        (self.flush_timeout_seconds > 0).then(|| Duration::from_secs(self.flush_timeout_seconds))
    }
}

/// Batching tunables passed through to the publisher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishSettings {
    /// Maximum time a message waits for its batch to fill
    #[serde(default = "default_delay_threshold_ms")]
    pub delay_threshold_ms: u64,

    /// Batch is sent once its messages reach this many bytes
    #[serde(default = "default_byte_threshold")]
    pub byte_threshold: usize,

    /// Batch is sent once it holds this many messages
    #[serde(default = "default_count_threshold")]
    pub count_threshold: usize,

    /// Timeout of a single publish request
    #[serde(default = "default_publish_timeout")]
    pub timeout_seconds: u64,

    /// Resend attempts for a batch failing with a retryable status
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            delay_threshold_ms: default_delay_threshold_ms(),
            byte_threshold: default_byte_threshold(),
            count_threshold: default_count_threshold(),
            timeout_seconds: default_publish_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl PublishSettings {
    pub fn delay_threshold(&self) -> Duration {
        Duration::from_millis(self.delay_threshold_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Split a comma and/or whitespace separated field list
pub fn split_field_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldList {
    List(Vec<String>),
    Joined(String),
}

/// Accept either a YAML list or a single "a, b c" string
fn deserialize_field_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<FieldList>::deserialize(deserializer)? {
        Some(FieldList::List(items)) => items
            .iter()
            .flat_map(|item| split_field_list(item))
            .collect(),
        Some(FieldList::Joined(joined)) => split_field_list(&joined),
        None => Vec::new(),
    })
}

// Default value functions
fn default_transport() -> String { "rest".to_string() }
fn default_endpoint() -> String { "https://pubsub.googleapis.com".to_string() }
fn default_true() -> bool { true }
fn default_delay_threshold_ms() -> u64 { 1000 }
fn default_byte_threshold() -> usize { 1_000_000 }
fn default_count_threshold() -> usize { 100 }
fn default_publish_timeout() -> u64 { 60 }
fn default_max_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
