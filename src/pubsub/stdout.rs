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

// Transport writing messages to stdout as JSON lines, for local testing

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use super::publisher::{PublishError, StatusCode, Transport};
use crate::message::OutboundMessage;

/// Writes every batch as consecutive JSON lines
///
/// Batches are sent concurrently, so the writer is locked for a whole batch
/// to keep its lines together.
pub struct StdoutTransport<W = Stdout> {
    out: Mutex<W>,
    next_id: AtomicU64,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutTransport<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            next_id: AtomicU64::new(0),
        }
    }

    fn render(&self, message: &OutboundMessage) -> (String, Value) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let data = serde_json::from_slice::<Value>(&message.data)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&message.data).into_owned()));
        let line = json!({
            "id": id,
            "attributes": message.attributes,
            "data": data,
        });
        (id, line)
    }
}

fn write_error(e: std::io::Error) -> PublishError {
    PublishError::status(StatusCode::Unavailable, e.to_string())
}

#[async_trait]
impl<W> Transport for StdoutTransport<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, batch: &[OutboundMessage]) -> Result<Vec<String>, PublishError> {
        let mut out = self.out.lock().await;
        let mut ids = Vec::with_capacity(batch.len());
        for message in batch {
            let (id, line) = self.render(message);
            out.write_all(format!("{}\n", line).as_bytes())
                .await
                .map_err(write_error)?;
            ids.push(id);
        }
        out.flush().await.map_err(write_error)?;

        Ok(ids)
    }

    fn transport_type(&self) -> &str {
        "stdout"
    }
}
