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

// Batching publisher
//
// Messages are queued on an unbounded channel and grouped by a background
// task. A batch is sent when it reaches the count or byte threshold, or when
// its first message has waited for the delay threshold. Each batch is sent on
// its own task so a slow request never holds up the next batch. The batching
// task owns those send tasks and only exits once all of them have finished.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::publisher::{
    PublishError, PublishHandle, PublishReply, Publisher, StatusCode, Transport,
};
use crate::config::PublishSettings;
use crate::message::OutboundMessage;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

struct Pending {
    message: OutboundMessage,
    reply: PublishReply,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    count: usize,
    bytes: usize,
    delay: Duration,
    timeout: Duration,
    max_retries: u32,
}

impl From<&PublishSettings> for Limits {
    fn from(settings: &PublishSettings) -> Self {
        Self {
            count: settings.count_threshold.max(1),
            bytes: settings.byte_threshold.max(1),
            delay: settings.delay_threshold(),
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
        }
    }
}

struct Batch {
    items: Vec<Pending>,
    bytes: usize,
}

impl Batch {
    fn start(first: Pending) -> Self {
        let bytes = first.message.size();
        Self {
            items: vec![first],
            bytes,
        }
    }

    fn is_full(&self, limits: &Limits) -> bool {
        self.items.len() >= limits.count || self.bytes >= limits.bytes
    }

    fn fits(&self, next: &Pending, limits: &Limits) -> bool {
        self.bytes + next.message.size() <= limits.bytes
    }

    fn push(&mut self, next: Pending) {
        self.bytes += next.message.size();
        self.items.push(next);
    }
}

/// [`Publisher`] grouping messages into batches for a [`Transport`]
pub struct BatchingPublisher {
    sender: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    transport_type: String,
}

impl BatchingPublisher {
    /// Start the batching task; must be called from within a tokio runtime
    pub fn new(transport: Arc<dyn Transport>, settings: &PublishSettings) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transport_type = transport.transport_type().to_string();
        let worker = tokio::spawn(run_batcher(receiver, transport, Limits::from(settings)));

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            transport_type,
        }
    }
}

#[async_trait]
impl Publisher for BatchingPublisher {
    fn publish(&self, message: OutboundMessage) -> PublishHandle {
        let (reply, handle) = PublishHandle::channel();
        let pending = Pending { message, reply };

        let rejected = match self.sender.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.send(pending).err().map(|e| e.0),
                None => Some(pending),
            },
            Err(_) => Some(pending),
        };
        if let Some(pending) = rejected {
            pending.reply.send(Err(PublishError::status(
                StatusCode::Unavailable,
                "publisher is shut down",
            )));
        }

        handle
    }

    /// Close the queue, then wait for every queued and in-flight batch to be sent
    async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Batching task failed: {}", e);
            }
        }
    }

    fn publisher_type(&self) -> &str {
        &self.transport_type
    }
}

async fn run_batcher(
    mut receiver: mpsc::UnboundedReceiver<Pending>,
    transport: Arc<dyn Transport>,
    limits: Limits,
) {
    let mut in_flight = JoinSet::new();
    let mut carry: Option<Pending> = None;

    loop {
        let first = match carry.take() {
            Some(pending) => pending,
            None => match receiver.recv().await {
                Some(pending) => pending,
                None => break,
            },
        };

        let mut batch = Batch::start(first);
        let deadline = Instant::now() + limits.delay;

        while !batch.is_full(&limits) {
            tokio::select! {
                next = receiver.recv() => match next {
                    Some(pending) if batch.fits(&pending, &limits) => batch.push(pending),
                    Some(pending) => {
                        carry = Some(pending);
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => break,
            }
        }

        in_flight.spawn(dispatch(transport.clone(), batch, limits));
        while let Some(finished) = in_flight.try_join_next() {
            log_dispatch_failure(finished);
        }
    }

    debug!(
        in_flight = in_flight.len(),
        "Publish queue closed, waiting for outstanding batches"
    );
    while let Some(finished) = in_flight.join_next().await {
        log_dispatch_failure(finished);
    }
}

fn log_dispatch_failure(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!("Batch send task failed: {}", e);
    }
}

async fn dispatch(transport: Arc<dyn Transport>, batch: Batch, limits: Limits) {
    let (messages, replies): (Vec<OutboundMessage>, Vec<PublishReply>) = batch
        .items
        .into_iter()
        .map(|pending| (pending.message, pending.reply))
        .unzip();

    match send_with_retry(transport.as_ref(), &messages, &limits).await {
        Ok(ids) if ids.len() == replies.len() => {
            debug!(
                messages = messages.len(),
                bytes = batch.bytes,
                transport = transport.transport_type(),
                "Published batch"
            );
            for (reply, id) in replies.into_iter().zip(ids) {
                reply.send(Ok(id));
            }
        }
        Ok(ids) => {
            let err = PublishError::Unclassified(format!(
                "expected {} message ids, received {}",
                replies.len(),
                ids.len()
            ));
            for reply in replies {
                reply.send(Err(err.clone()));
            }
        }
        Err(err) => {
            for reply in replies {
                reply.send(Err(err.clone()));
            }
        }
    }
}

/// Send a batch, resending on retryable statuses with exponential backoff
///
/// All attempts share one deadline of `limits.timeout`; running out of time
/// yields `DEADLINE_EXCEEDED`.
async fn send_with_retry(
    transport: &dyn Transport,
    messages: &[OutboundMessage],
    limits: &Limits,
) -> Result<Vec<String>, PublishError> {
    let deadline = Instant::now() + limits.timeout;
    let mut attempt = 0;
    let mut delay = INITIAL_BACKOFF;

    loop {
        let result = match timeout_at(deadline, transport.send(messages)).await {
            Ok(result) => result,
            Err(_) => {
                return Err(PublishError::status(
                    StatusCode::DeadlineExceeded,
                    format!("publish did not complete within {:?}", limits.timeout),
                ))
            }
        };

        match result {
            Ok(ids) => {
                if attempt > 0 {
                    info!(
                        "Published batch of {} messages after {} retries",
                        messages.len(),
                        attempt
                    );
                }
                return Ok(ids);
            }
            Err(e)
                if e.is_retryable()
                    && attempt < limits.max_retries
                    && Instant::now() + delay < deadline =>
            {
                warn!(
                    "Publish of {} messages failed (attempt {}/{}): {}. Retrying in {:?}",
                    messages.len(),
                    attempt + 1,
                    limits.max_retries,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
