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

// Publisher factory for creating publishers from configuration

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use super::batcher::BatchingPublisher;
use super::publisher::{Publisher, Transport};
use super::rest::RestTransport;
use super::stdout::StdoutTransport;
use crate::config::PluginConfig;

pub struct PublisherFactory;

impl PublisherFactory {
    /// Create the transport named by `pubsub.transport`
    pub fn create_transport(config: &PluginConfig) -> Result<Arc<dyn Transport>> {
        match config.pubsub.transport.as_str() {
            "rest" => {
                let transport = RestTransport::new(&config.pubsub, &config.publish)?;
                Ok(Arc::new(transport))
            }

            "stdout" => Ok(Arc::new(StdoutTransport::new())),

            unknown => bail!("Unknown transport: '{}'. Supported: rest, stdout", unknown),
        }
    }

    /// Create, initialize and wrap a transport in a batching publisher
    pub async fn create(config: &PluginConfig) -> Result<Arc<dyn Publisher>> {
        let transport = Self::create_transport(config)?;
        transport.initialize().await.with_context(|| {
            format!(
                "Failed to initialize {} transport for topic '{}' in project '{}'",
                transport.transport_type(),
                config.pubsub.topic_id,
                config.pubsub.project_id
            )
        })?;

        info!(
            "Publishing to topic '{}' in project '{}' via {}",
            config.pubsub.topic_id,
            config.pubsub.project_id,
            transport.transport_type()
        );

        Ok(Arc::new(BatchingPublisher::new(transport, &config.publish)))
    }
}
