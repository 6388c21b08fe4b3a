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

// Fluent Bit output for Google Cloud Pub/Sub
//
// Receives msgpack chunks of log records from the log shipper and:
// - Decodes every `[event_time, fields]` unit into a typed record
// - Lifts configured fields into message attributes, optionally injecting
//   the record timestamp
// - Publishes one JSON message per record through a batching publisher
// - Reports a single accept / retry / drop decision per chunk

pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod flush;
pub mod logging;
pub mod message;
pub mod pubsub;
pub mod record;
pub mod redact;
pub mod registry;

// Re-export main types
pub use config::{load_config, load_config_with_env, PluginConfig};
pub use coordinator::{Disposition, FlushContext, PublishCoordinator, FLB_ERROR, FLB_OK, FLB_RETRY};
pub use decoder::{DecodeError, RecordDecoder};
pub use flush::{FlushOrchestrator, FlushReport};
pub use message::{BuildError, MessageBuilder, OutboundMessage};
pub use pubsub::{PublishError, PublishHandle, Publisher, PublisherFactory, StatusCode, Transport};
pub use record::{FieldValue, Fields, Record};
pub use registry::{InstanceHandle, InstanceRegistry};
