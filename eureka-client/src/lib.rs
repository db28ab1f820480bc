// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Client for the Eureka service registry.
//!
//! Besides one-shot queries and the registration lifecycle of an instance, the client keeps
//! local views of registry state up to date in the background:
//!
//! - [`UpdateStream`](updates::UpdateStream): every poll outcome, coalesced for slow
//!   consumers.
//! - [`AppSource`](source::AppSource) and [`InstanceSetSource`](source::InstanceSetSource): the
//!   latest poll outcome, readable without waiting.
//!
//! Instance queries are composed from [`query`] options that filter by status and optionally
//! shuffle the result.
//!
//! Registry servers are either configured statically or discovered through DNS TXT records,
//! see [`discovery`].

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod model;
pub mod query;
pub mod schedule;
pub mod selector;
pub mod source;
pub mod updates;

pub use connection::{ConnectionError, EurekaConnection};
pub use error::RegistryError;
