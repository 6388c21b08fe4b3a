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

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fluent_pubsub::config::load_config_with_env;
use fluent_pubsub::logging::init_logging;
use fluent_pubsub::{Disposition, FlushContext, InstanceRegistry};

/// Exit code asking the caller to retry the chunk later (EX_TEMPFAIL)
const EXIT_RETRY: u8 = 75;

/// Replay a captured Fluent Bit chunk through the Pub/Sub output
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Msgpack chunk to publish; "-" reads stdin
    #[arg(short, long)]
    input: PathBuf,

    /// Routing tag attached to every message
    #[arg(short, long, default_value = "replay")]
    tag: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = load_config_with_env(&args.config)?;
    init_logging(&config.logging, config.output.debug)?;

    info!("Loaded configuration from: {:?}", args.config);

    let data = read_input(&args.input).await?;
    info!("Read {} bytes from {:?}", data.len(), args.input);

    let registry = InstanceRegistry::new();
    let handle = registry.register_from_config(&config).await?;

    let cancel = CancellationToken::new();
    let ctx = match config.output.flush_timeout() {
        Some(timeout) => FlushContext::with_timeout(timeout),
        None => FlushContext::background(),
    }
    .with_cancellation(cancel.clone());

    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, abandoning outstanding publishes");
            interrupt.cancel();
        }
    });

    let report = registry
        .flush_report(handle, &data, &args.tag, Some(&ctx))
        .await;
    watcher.abort();

    // Publishes abandoned by an expired flush are still in flight
    registry.unregister(handle).await;

    let disposition = report.map_or(Disposition::Fatal, |r| {
        info!(
            submitted = r.submitted,
            decode_errors = r.decode_errors,
            build_errors = r.build_errors,
            "Flush finished: {}",
            r.disposition
        );
        r.disposition
    });

    Ok(match disposition {
        Disposition::Accepted => ExitCode::SUCCESS,
        Disposition::RetryRequested => ExitCode::from(EXIT_RETRY),
        Disposition::Fatal => ExitCode::FAILURE,
    })
}

async fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read chunk from stdin")?;
        return Ok(data);
    }

    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read chunk file {:?}", path))
}
