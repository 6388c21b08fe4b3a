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

// Publisher and transport traits shared by all Pub/Sub transports

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::message::OutboundMessage;

/// Outcome of one publish: the server assigned message id or an error
pub type PublishResult = Result<String, PublishError>;

/// Canonical status codes carried by Pub/Sub errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl StatusCode {
    const ALL: [StatusCode; 17] = [
        StatusCode::Ok,
        StatusCode::Cancelled,
        StatusCode::Unknown,
        StatusCode::InvalidArgument,
        StatusCode::DeadlineExceeded,
        StatusCode::NotFound,
        StatusCode::AlreadyExists,
        StatusCode::PermissionDenied,
        StatusCode::ResourceExhausted,
        StatusCode::FailedPrecondition,
        StatusCode::Aborted,
        StatusCode::OutOfRange,
        StatusCode::Unimplemented,
        StatusCode::Internal,
        StatusCode::Unavailable,
        StatusCode::DataLoss,
        StatusCode::Unauthenticated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Cancelled => "CANCELLED",
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::AlreadyExists => "ALREADY_EXISTS",
            StatusCode::PermissionDenied => "PERMISSION_DENIED",
            StatusCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            StatusCode::FailedPrecondition => "FAILED_PRECONDITION",
            StatusCode::Aborted => "ABORTED",
            StatusCode::OutOfRange => "OUT_OF_RANGE",
            StatusCode::Unimplemented => "UNIMPLEMENTED",
            StatusCode::Internal => "INTERNAL",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::DataLoss => "DATA_LOSS",
            StatusCode::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Parse the `status` string of a Google API error body
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str().eq_ignore_ascii_case(name))
    }

    /// Fallback mapping when an error body carries no status name
    pub fn from_http(status: u16) -> Self {
        match status {
            200..=299 => StatusCode::Ok,
            400 => StatusCode::InvalidArgument,
            401 => StatusCode::Unauthenticated,
            403 => StatusCode::PermissionDenied,
            404 => StatusCode::NotFound,
            409 => StatusCode::Aborted,
            429 => StatusCode::ResourceExhausted,
            499 => StatusCode::Cancelled,
            501 => StatusCode::Unimplemented,
            503 => StatusCode::Unavailable,
            504 => StatusCode::DeadlineExceeded,
            500..=599 => StatusCode::Internal,
            _ => StatusCode::Unknown,
        }
    }

    /// Statuses for which resending the same batch later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatusCode::DeadlineExceeded | StatusCode::Internal | StatusCode::Unavailable
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PublishError {
    #[error("publish failed with status {code}: {message}")]
    Status { code: StatusCode, message: String },

    /// A failure with no status that could be extracted
    #[error("publish failed: {0}")]
    Unclassified(String),
}

impl PublishError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        PublishError::Status {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Option<StatusCode> {
        match self {
            PublishError::Status { code, .. } => Some(*code),
            PublishError::Unclassified(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_some_and(|code| code.is_retryable())
    }
}

/// Sending half of a [`PublishHandle`], held by the transport
pub struct PublishReply(oneshot::Sender<PublishResult>);

impl PublishReply {
    /// Settle the handle; a dropped handle is ignored
    pub fn send(self, result: PublishResult) {
        let _ = self.0.send(result);
    }
}

/// Future resolving to the outcome of one in-flight publish
pub struct PublishHandle {
    state: HandleState,
}

enum HandleState {
    Pending(oneshot::Receiver<PublishResult>),
    Ready(Option<PublishResult>),
}

impl PublishHandle {
    pub fn channel() -> (PublishReply, PublishHandle) {
        let (tx, rx) = oneshot::channel();
        (
            PublishReply(tx),
            PublishHandle {
                state: HandleState::Pending(rx),
            },
        )
    }

    /// A handle that is already settled
    pub fn ready(result: PublishResult) -> Self {
        PublishHandle {
            state: HandleState::Ready(Some(result)),
        }
    }

    /// Take the outcome without waiting; `None` while still in flight
    pub fn try_settled(&mut self) -> Option<PublishResult> {
        match &mut self.state {
            HandleState::Pending(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped_reply())),
            },
            HandleState::Ready(result) => result.take(),
        }
    }
}

fn dropped_reply() -> PublishError {
    PublishError::Unclassified("publisher dropped the message before it settled".to_string())
}

impl Future for PublishHandle {
    type Output = PublishResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|settled| settled.unwrap_or_else(|_| Err(dropped_reply()))),
            HandleState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| {
                Err(PublishError::Unclassified(
                    "publish handle polled after completion".to_string(),
                ))
            })),
        }
    }
}

/// Something that accepts messages and settles them asynchronously
///
/// `publish` must not block: it hands the message over and returns a handle
/// that resolves once the transport has accepted or rejected it.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn publish(&self, message: OutboundMessage) -> PublishHandle;

    /// Stop accepting messages and wait until every accepted one has settled
    async fn shutdown(&self) {}

    /// Get publisher type identifier
    fn publisher_type(&self) -> &str;
}

/// Wire level client sending one batch per request
#[async_trait]
pub trait Transport: Send + Sync {
    /// Check the destination is reachable (topic exists, credentials work)
    async fn initialize(&self) -> Result<()>;

    /// Send a batch, returning one message id per message in order
    async fn send(&self, batch: &[OutboundMessage]) -> Result<Vec<String>, PublishError>;

    /// Get transport type identifier
    fn transport_type(&self) -> &str;
}
