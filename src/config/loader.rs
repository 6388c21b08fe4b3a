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

// Configuration loader with environment variable substitution

use super::types::*;
use crate::redact::{is_sensitive, REDACTED};
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use tracing::debug;

/// Pub/Sub accepts at most 1000 messages per publish request
pub const MAX_COUNT_THRESHOLD: usize = 1000;

/// Pub/Sub rejects publish requests larger than 10 MB
pub const MAX_BYTE_THRESHOLD: usize = 10_000_000;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PluginConfig> {
        Self::load_with(path, |_| {})
    }

    /// Load configuration, letting `overrides` adjust it before validation
    pub fn load_with<P, F>(path: P, overrides: F) -> Result<PluginConfig>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut PluginConfig),
    {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::load_str_with(&content, overrides)
    }

    /// Parse configuration from YAML text
    pub fn load_str(content: &str) -> Result<PluginConfig> {
        Self::load_str_with(content, |_| {})
    }

    fn load_str_with<F>(content: &str, overrides: F) -> Result<PluginConfig>
    where
        F: FnOnce(&mut PluginConfig),
    {
        let content = Self::substitute_env_vars(content)?;

        let mut config: PluginConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;
        overrides(&mut config);

        Self::validate(&config)?;
        Self::log_resolved(&config);

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${TOPIC_ID:-logs} -> logs (if TOPIC_ID not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Validate configuration
    pub(crate) fn validate(config: &PluginConfig) -> Result<()> {
        if config.pubsub.project_id.is_empty() {
            bail!("pubsub.project_id is a required parameter");
        }

        if config.pubsub.topic_id.is_empty() {
            bail!("pubsub.topic_id is a required parameter");
        }

        match config.pubsub.transport.as_str() {
            "rest" | "stdout" => {}
            unknown => bail!("Unknown transport: '{}'. Supported: rest, stdout", unknown),
        }

        let publish = &config.publish;
        if publish.count_threshold == 0 || publish.count_threshold > MAX_COUNT_THRESHOLD {
            bail!("publish.count_threshold must be between 1 and {}", MAX_COUNT_THRESHOLD);
        }

        if publish.byte_threshold == 0 || publish.byte_threshold > MAX_BYTE_THRESHOLD {
            bail!("publish.byte_threshold must be between 1 and {}", MAX_BYTE_THRESHOLD);
        }

        if publish.timeout_seconds == 0 {
            bail!("publish.timeout_seconds must be > 0");
        }

        if !matches!(
            config.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            bail!("Unknown logging.level: '{}'", config.logging.level);
        }

        if !matches!(config.logging.format.as_str(), "text" | "json") {
            bail!("Unknown logging.format: '{}'. Supported: text, json", config.logging.format);
        }

        Ok(())
    }

    /// Log every resolved setting, masking anything that looks like a credential
    fn log_resolved(config: &PluginConfig) {
        let token = config.pubsub.access_token.as_ref().map(|_| REDACTED);
        debug!(
            project_id = %config.pubsub.project_id,
            topic_id = %config.pubsub.topic_id,
            transport = %config.pubsub.transport,
            endpoint = %config.pubsub.endpoint,
            access_token = ?token,
            "resolved pubsub settings"
        );
        debug!(
            timestamp_field = ?config.output.timestamp_field,
            attribute_fields = ?config.output.attribute_fields,
            keep_attribute_fields = config.output.keep_attribute_fields,
            debug = config.output.debug,
            flush_timeout_seconds = config.output.flush_timeout_seconds,
            "resolved output settings"
        );
        for field in &config.output.attribute_fields {
            if is_sensitive(field) {
                debug!(field = %field, "attribute field looks sensitive; its value will be published as an attribute");
            }
        }
        debug!(
            delay_threshold_ms = config.publish.delay_threshold_ms,
            byte_threshold = config.publish.byte_threshold,
            count_threshold = config.publish.count_threshold,
            timeout_seconds = config.publish.timeout_seconds,
            max_retries = config.publish.max_retries,
            "resolved publish settings"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PluginConfig {
        let mut config = PluginConfig::default();
        config.pubsub.project_id = "project".to_string();
        config.pubsub.topic_id = "topic".to_string();
        config
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("FLUENT_PUBSUB_TEST_VAR", "test_value");

        let input = "topic_id: ${FLUENT_PUBSUB_TEST_VAR}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "topic_id: test_value");

        std::env::remove_var("FLUENT_PUBSUB_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("FLUENT_PUBSUB_TEST_VAR2");

        let input = "topic_id: ${FLUENT_PUBSUB_TEST_VAR2:-logs}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, "topic_id: logs");
    }

    #[test]
    fn test_env_var_missing_without_default_is_kept() {
        std::env::remove_var("FLUENT_PUBSUB_TEST_VAR3");

        let input = "topic_id: ${FLUENT_PUBSUB_TEST_VAR3}";
        let output = ConfigLoader::substitute_env_vars(input).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_validation_requires_project() {
        let mut config = valid_config();
        config.pubsub.project_id.clear();

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("project_id"));
    }

    #[test]
    fn test_validation_requires_topic() {
        let mut config = valid_config();
        config.pubsub.topic_id.clear();

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("topic_id"));
    }

    #[test]
    fn test_validation_count_threshold_limit() {
        let mut config = valid_config();
        config.publish.count_threshold = MAX_COUNT_THRESHOLD + 1;

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("count_threshold"));
    }

    #[test]
    fn test_validation_unknown_transport() {
        let mut config = valid_config();
        config.pubsub.transport = "kafka".to_string();

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("Unknown transport"));
    }

    #[test]
    fn test_validation_accepts_defaults() {
        assert!(ConfigLoader::validate(&valid_config()).is_ok());
    }
}
