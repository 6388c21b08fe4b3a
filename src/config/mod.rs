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

// Configuration module for fluent-pubsub
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::{ConfigLoader, MAX_BYTE_THRESHOLD, MAX_COUNT_THRESHOLD};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PluginConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<PluginConfig> {
    ConfigLoader::load_with(path, apply_env_overrides).context("Failed to load configuration")
}

/// Apply the environment variables that take precedence over the file
pub fn apply_env_overrides(config: &mut PluginConfig) {
    if let Ok(project_id) = std::env::var("PUBSUB_PROJECT_ID") {
        config.pubsub.project_id = project_id;
    }

    if let Ok(token) = std::env::var("PUBSUB_ACCESS_TOKEN") {
        config.pubsub.access_token = Some(token);
    }

    // The emulator speaks plain HTTP and ignores credentials
    if let Ok(host) = std::env::var("PUBSUB_EMULATOR_HOST") {
        if !host.is_empty() {
            config.pubsub.endpoint = format!("http://{}", host);
            config.pubsub.access_token = None;
        }
    }
}
