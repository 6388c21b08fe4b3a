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

// Tracing subscriber setup

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Filter directive for the configured level
///
/// The output debug flag raises the level to `debug` so per-message
/// diagnostics are visible without touching `logging.level`.
pub fn filter_directive(config: &LoggingConfig, debug: bool) -> String {
    let level = config.level.to_lowercase();
    if debug && matches!(level.as_str(), "info" | "warn" | "error") {
        "debug".to_string()
    } else {
        level
    }
}

/// Install the global subscriber; `RUST_LOG` takes precedence over the config
pub fn init_logging(config: &LoggingConfig, debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(config, debug)))
        .map_err(|e| anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
        _ => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    result.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_raises_level() {
        let config = LoggingConfig::default();
        assert_eq!(filter_directive(&config, false), "info");
        assert_eq!(filter_directive(&config, true), "debug");
    }

    #[test]
    fn test_debug_flag_keeps_trace() {
        let config = LoggingConfig {
            level: "TRACE".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(filter_directive(&config, true), "trace");
    }
}
