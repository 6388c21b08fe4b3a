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

//! Publish coordination and batch outcome aggregation
//!
//! Every message of a flush is submitted without blocking; the coordinator
//! then awaits the handles and folds their outcomes into a single
//! [`Disposition`] reported back to the log shipper.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::message::OutboundMessage;
use crate::pubsub::{PublishHandle, PublishResult, Publisher};

/// Host return code: batch delivered
pub const FLB_OK: i32 = 1;
/// Host return code: batch dropped
pub const FLB_ERROR: i32 = 0;
/// Host return code: batch should be retried later
pub const FLB_RETRY: i32 = 2;

/// Outcome of a publish or of a whole flush
///
/// Ordered by severity, so the outcome of a batch is the maximum of the
/// outcomes of its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Disposition {
    Accepted,
    RetryRequested,
    Fatal,
}

impl Disposition {
    pub fn combine(self, other: Disposition) -> Disposition {
        self.max(other)
    }

    /// Aggregate outcome; `Accepted` for an empty sequence
    pub fn worst<I>(outcomes: I) -> Disposition
    where
        I: IntoIterator<Item = Disposition>,
    {
        outcomes
            .into_iter()
            .fold(Disposition::Accepted, Disposition::combine)
    }

    /// Classify a settled publish
    pub fn classify(result: &PublishResult) -> Disposition {
        match result {
            Ok(_) => Disposition::Accepted,
            Err(e) if e.is_retryable() => Disposition::RetryRequested,
            Err(_) => Disposition::Fatal,
        }
    }

    pub fn return_code(self) -> i32 {
        match self {
            Disposition::Accepted => FLB_OK,
            Disposition::RetryRequested => FLB_RETRY,
            Disposition::Fatal => FLB_ERROR,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Disposition::Accepted => "accepted",
            Disposition::RetryRequested => "retry",
            Disposition::Fatal => "fatal",
        })
    }
}

/// Deadline and cancellation scope of a single flush
#[derive(Debug, Clone, Default)]
pub struct FlushContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl FlushContext {
    /// No deadline; only cancellation ends the flush early
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancellationToken::new(),
        }
    }

    /// Tie this context to an externally owned token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` to completion unless the context expires first
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        let expiry = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = fut => Some(output),
            _ = expiry => None,
        }
    }
}

/// Submits messages and reduces their outcomes for one flush
pub struct PublishCoordinator {
    publisher: Arc<dyn Publisher>,
}

impl PublishCoordinator {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    /// Hand one message to the publisher without waiting for it
    pub fn submit(&self, message: OutboundMessage) -> PublishHandle {
        self.publisher.publish(message)
    }

    /// Await every handle in submission order and return the worst outcome
    ///
    /// When the context expires, handles that have already settled are still
    /// counted and the rest are abandoned, so the result never depends on the
    /// order of the handles.
    pub async fn await_all(&self, handles: Vec<PublishHandle>, ctx: &FlushContext) -> Disposition {
        let total = handles.len();
        let mut worst = Disposition::Accepted;
        let mut remaining = handles.into_iter();

        while let Some(mut handle) = remaining.next() {
            match ctx.run(&mut handle).await {
                Some(result) => worst = worst.combine(settle(&result)),
                None => {
                    let mut abandoned = 0;
                    for mut handle in std::iter::once(handle).chain(remaining) {
                        match handle.try_settled() {
                            Some(result) => worst = worst.combine(settle(&result)),
                            None => abandoned += 1,
                        }
                    }
                    warn!(
                        abandoned,
                        total,
                        "Flush deadline reached while awaiting publish results"
                    );
                    return worst.combine(Disposition::RetryRequested);
                }
            }
        }

        worst
    }
}

/// Classify one settled publish, logging failures
fn settle(result: &PublishResult) -> Disposition {
    let outcome = Disposition::classify(result);
    if let Err(e) = result {
        match e.code() {
            Some(code) if outcome == Disposition::RetryRequested => {
                warn!(code = %code, "Retryable publish error: {}", e)
            }
            Some(code) => error!(code = %code, "Unrecoverable publish error: {}", e),
            None => error!("Could not extract a status from publish error: {}", e),
        }
    }
    outcome
}
