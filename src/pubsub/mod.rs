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

// Pub/Sub publishing module
//
// A `Publisher` accepts messages without blocking and settles each one via a
// `PublishHandle`. The batching publisher groups messages and hands them to a
// `Transport`, which owns the wire protocol (REST or stdout).

pub mod batcher;
pub mod factory;
pub mod publisher;
pub mod rest;
pub mod stdout;

pub use batcher::BatchingPublisher;
pub use factory::PublisherFactory;
pub use publisher::{
    PublishError, PublishHandle, PublishReply, PublishResult, Publisher, StatusCode, Transport,
};
pub use rest::RestTransport;
pub use stdout::StdoutTransport;
