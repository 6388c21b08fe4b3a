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

// Registry of configured output instances
//
// The host refers to an instance by an opaque handle. Flushes on different
// instances run concurrently; flushes on the same instance are serialized
// because each owns a reusable decoder.

use anyhow::Result;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::PluginConfig;
use crate::coordinator::{Disposition, FlushContext};
use crate::flush::{FlushOrchestrator, FlushReport};
use crate::pubsub::PublisherFactory;

/// Opaque reference to a registered instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(Uuid);

impl InstanceHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct InstanceRegistry {
    instances: DashMap<InstanceHandle, Arc<Mutex<FlushOrchestrator>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, orchestrator: FlushOrchestrator) -> InstanceHandle {
        let handle = InstanceHandle::new();
        self.instances
            .insert(handle, Arc::new(Mutex::new(orchestrator)));
        info!(instance = %handle, "Registered output instance");
        handle
    }

    /// Build the publisher described by `config` and register an instance for it
    pub async fn register_from_config(&self, config: &PluginConfig) -> Result<InstanceHandle> {
        let publisher = PublisherFactory::create(config).await?;
        Ok(self.register(FlushOrchestrator::new(&config.output, publisher)))
    }

    /// Flush a chunk through the instance; unknown handles are fatal
    pub async fn flush(&self, handle: InstanceHandle, data: &[u8], tag: &str) -> Disposition {
        match self.flush_report(handle, data, tag, None).await {
            Some(report) => report.disposition,
            None => Disposition::Fatal,
        }
    }

    /// Flush with full counters, optionally under a caller supplied context
    ///
    /// Returns `None` when no instance is registered under `handle`.
    pub async fn flush_report(
        &self,
        handle: InstanceHandle,
        data: &[u8],
        tag: &str,
        ctx: Option<&FlushContext>,
    ) -> Option<FlushReport> {
        // Clone the Arc so the map shard is not locked across the await
        let instance = self.instances.get(&handle).map(|entry| entry.value().clone());
        let Some(instance) = instance else {
            error!(instance = %handle, "Flush for unknown output instance");
            return None;
        };

        let mut orchestrator = instance.lock().await;
        let report = match ctx {
            Some(ctx) => orchestrator.flush_with_context(data, tag, ctx).await,
            None => orchestrator.flush(data, tag).await,
        };
        Some(report)
    }

    /// Remove an instance and drain its publisher
    ///
    /// Waits for a flush already running on the instance, then for every
    /// publish it submitted.
    pub async fn unregister(&self, handle: InstanceHandle) -> bool {
        let Some((_, instance)) = self.instances.remove(&handle) else {
            return false;
        };
        instance.lock().await.shutdown().await;
        info!(instance = %handle, "Unregistered output instance");
        true
    }

    pub async fn clear(&self) {
        let handles: Vec<InstanceHandle> = self.instances.iter().map(|entry| *entry.key()).collect();
        for handle in handles {
            self.unregister(handle).await;
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
