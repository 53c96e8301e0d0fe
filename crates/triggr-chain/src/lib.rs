// Copyright 2024 Algorealm Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]
//! # Triggr Chain Module 🕸️
//!
//! Chain-facing pieces of the node: the contract descriptor model, SCALE
//! payload decoding, and the finalized-block event watcher.

use async_trait::async_trait;
use triggr_types::{EventSchema, ProjectId};

/// Contract descriptor (`contracts.json`) parsing.
pub mod descriptor;
/// SCALE decoding of emitted event payloads.
pub mod scale;
/// The finalized-block contract event watcher.
pub mod watcher;

pub use descriptor::{parse_descriptor, ParsedDescriptor};
pub use scale::decode_contract_event;
pub use watcher::SubstrateChainWatcher;

/// Resolves an emitting contract address to the project that registered
/// it. Implemented by the registry cache.
#[async_trait]
pub trait ContractLookup: Send + Sync {
    /// Returns the owning project id and its event schema, or `None` when
    /// no project registered this contract.
    async fn project_for_contract(
        &self,
        address: &str,
    ) -> Option<(ProjectId, EventSchema)>;
}
