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

// Flush orchestration
//
// One flush = decode every unit of the chunk, build and submit a message per
// record, then await all submissions. A unit that fails to decode or build is
// logged and skipped; it never affects the other units or the disposition.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info_span, Instrument};

use crate::config::OutputSettings;
use crate::coordinator::{Disposition, FlushContext, PublishCoordinator};
use crate::decoder::{DecodeError, RecordDecoder};
use crate::message::MessageBuilder;
use crate::pubsub::Publisher;
use crate::redact::{AttributeSummary, RecordSummary};

/// Counters and outcome of one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub disposition: Disposition,
    /// Messages handed to the publisher
    pub submitted: usize,
    /// Units rejected by the decoder
    pub decode_errors: usize,
    /// Records that could not be turned into a message
    pub build_errors: usize,
}

impl Default for FlushReport {
    fn default() -> Self {
        Self {
            disposition: Disposition::Accepted,
            submitted: 0,
            decode_errors: 0,
            build_errors: 0,
        }
    }
}

/// Per-instance flush pipeline
pub struct FlushOrchestrator {
    decoder: RecordDecoder,
    builder: MessageBuilder,
    coordinator: PublishCoordinator,
    debug: bool,
    flush_timeout: Option<Duration>,
}

impl FlushOrchestrator {
    pub fn new(settings: &OutputSettings, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            decoder: RecordDecoder::new(),
            builder: MessageBuilder::new(settings),
            coordinator: PublishCoordinator::new(publisher),
            debug: settings.debug,
            flush_timeout: settings.flush_timeout(),
        }
    }

    /// Context for a new flush, bounded by the configured flush timeout
    pub fn context(&self) -> FlushContext {
        match self.flush_timeout {
            Some(timeout) => FlushContext::with_timeout(timeout),
            None => FlushContext::background(),
        }
    }

    pub async fn flush(&mut self, data: &[u8], tag: &str) -> FlushReport {
        let ctx = self.context();
        self.flush_with_context(data, tag, &ctx).await
    }

    pub async fn flush_with_context(
        &mut self,
        data: &[u8],
        tag: &str,
        ctx: &FlushContext,
    ) -> FlushReport {
        let span = info_span!("flush", tag = %tag);
        self.run(data, tag, ctx).instrument(span).await
    }

    /// Wait for every publish this instance has submitted to settle
    pub async fn shutdown(&self) {
        self.coordinator.publisher().shutdown().await;
    }

    async fn run(&mut self, data: &[u8], tag: &str, ctx: &FlushContext) -> FlushReport {
        if self.debug {
            debug!(bytes = data.len(), "Receiving log entries");
        }

        let mut report = FlushReport::default();
        let mut handles = Vec::new();
        self.decoder.reset(data);

        for decoded in self.decoder.by_ref() {
            let mut record = match decoded {
                Ok(record) => record,
                Err(e) => {
                    report.decode_errors += 1;
                    match &e {
                        DecodeError::Fields {
                            timestamp, fields, ..
                        } => error!(
                            log_ts = %timestamp,
                            record = %RecordSummary::from_msgpack(fields),
                            "Error while reading record: {}",
                            e
                        ),
                        _ => error!("Error while reading record: {}", e),
                    }
                    continue;
                }
            };

            match self.builder.build(&mut record, tag) {
                Ok(message) => {
                    if self.debug {
                        debug!(
                            log_ts = %record.timestamp,
                            attributes = %AttributeSummary(&message.attributes),
                            "Submitting message"
                        );
                    }
                    handles.push(self.coordinator.submit(message));
                }
                Err(e) => {
                    report.build_errors += 1;
                    error!(
                        log_ts = %record.timestamp,
                        record = %RecordSummary::new(&record.fields),
                        "Error while creating message from record: {}",
                        e
                    );
                }
            }
        }

        report.submitted = handles.len();
        if self.debug {
            debug!(submitted = report.submitted, "End of chunk");
        }

        report.disposition = self.coordinator.await_all(handles, ctx).await;

        if self.debug {
            debug!(
                disposition = %report.disposition,
                decode_errors = report.decode_errors,
                build_errors = report.build_errors,
                "Flush complete"
            );
        }
        report
    }
}
