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

// Pub/Sub REST transport
//
// Speaks the v1 JSON API (`topics.publish`), which is also what the local
// Pub/Sub emulator serves.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use super::publisher::{PublishError, StatusCode, Transport};
use crate::config::{PubSubConfig, PublishSettings};
use crate::message::OutboundMessage;

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Pub/Sub client publishing over HTTPS
pub struct RestTransport {
    client: Client,
    topic_url: String,
    topic_path: String,
    verify_topic: bool,
}

impl RestTransport {
    pub fn new(config: &PubSubConfig, settings: &PublishSettings) -> Result<Self> {
        let mut client_builder = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(settings.timeout());

        if let Some(token) = &config.access_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth_value)
                    .context("Invalid access token")?,
            );
            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder
            .build()
            .context("Failed to build HTTP client")?;

        let topic_path = format!(
            "projects/{}/topics/{}",
            config.project_id, config.topic_id
        );
        let topic_url = format!(
            "{}/v1/{}",
            config.endpoint.trim_end_matches('/'),
            topic_path
        );

        Ok(Self {
            client,
            topic_url,
            topic_path,
            verify_topic: config.verify_topic,
        })
    }

    /// Fail when the topic is missing or not visible with our credentials
    async fn ensure_topic(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.topic_url)
            .send()
            .await
            .context("Failed to query topic")?;

        let status = response.status();
        if status.is_success() {
            info!("Topic '{}' is available", self.topic_path);
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 404 {
            bail!("Topic '{}' does not exist", self.topic_path);
        }
        bail!(
            "Failed to verify topic '{}': {} - {}",
            self.topic_path,
            status,
            error_text
        )
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn initialize(&self) -> Result<()> {
        if self.verify_topic {
            self.ensure_topic().await
        } else {
            Ok(())
        }
    }

    async fn send(&self, batch: &[OutboundMessage]) -> Result<Vec<String>, PublishError> {
        let request = PublishRequest {
            messages: batch
                .iter()
                .map(|message| WireMessage {
                    data: STANDARD.encode(&message.data),
                    attributes: &message.attributes,
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}:publish", self.topic_url))
            .json(&request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(error_from_response(status.as_u16(), &error_text));
        }

        let parsed: PublishResponse = response.json().await.map_err(|e| {
            PublishError::Unclassified(format!("invalid publish response: {}", e))
        })?;

        Ok(parsed.message_ids)
    }

    fn transport_type(&self) -> &str {
        "rest"
    }
}

fn classify_request_error(e: reqwest::Error) -> PublishError {
    if e.is_timeout() {
        PublishError::status(StatusCode::DeadlineExceeded, e.to_string())
    } else if e.is_connect() {
        PublishError::status(StatusCode::Unavailable, e.to_string())
    } else {
        PublishError::Unclassified(e.to_string())
    }
}

/// Map a non-2xx response onto a status error
///
/// The `status` name of a Google API error body wins; the HTTP status is only
/// used when the body is missing or unparseable.
fn error_from_response(http_status: u16, body: &str) -> PublishError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let code = StatusCode::from_name(&envelope.error.status)
                .unwrap_or_else(|| StatusCode::from_http(http_status));
            PublishError::status(code, envelope.error.message)
        }
        Err(_) => PublishError::status(StatusCode::from_http(http_status), body.trim()),
    }
}
