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
//! # Triggr Types 🕸️
//!
//! Shared domain types for the Triggr node: contract event schemas,
//! decoded chain events, and the records persisted by the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Event schema types, parsed from an uploaded contract descriptor.
pub mod schema;

pub use schema::{EventDecl, EventField, EventSchema, ScalarType, TypeClass};

/// A project id. Opaque, internally a v4 UUID string.
pub type ProjectId = String;

/// A trigger id, unique within its project.
pub type TriggerId = String;

/// The largest integer magnitude that can be stored losslessly as a JSON
/// number. Anything larger is rendered as a decimal string.
pub const MAX_SAFE_JSON_INT: i128 = (1 << 53) - 1;

/// Current millisecond unix timestamp.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// A contract event decoded from a finalized block, ready for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// The project that registered the emitting contract.
    pub project_id: ProjectId,
    /// The event name, as declared in the contract descriptor.
    pub name: String,
    /// Decoded field values, keyed by field name.
    pub fields: HashMap<String, Value>,
    /// The block the event was emitted in.
    pub block_number: u64,
    /// The index of the extrinsic that emitted the event, if known.
    pub extrinsic_index: Option<u32>,
}

impl DecodedEvent {
    /// Looks up a decoded field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Metadata describing a document's lifecycle and versioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocMetadata {
    /// When the document was created (ms).
    pub created_at: u64,
    /// Last time the document was mutated (ms).
    pub updated_at: u64,
    /// Monotonic version counter, starting at 1 on insert.
    pub version: u64,
    /// Arbitrary tags for filtering/grouping.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DocMetadata {
    /// Metadata for a freshly inserted document.
    pub fn new(now: u64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            version: 1,
            tags: Vec::new(),
        }
    }
}

/// A single JSON-like document stored inside a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The unique document id within its collection.
    pub id: String,
    /// The JSON payload of the document.
    pub data: Value,
    /// Timestamps, version and tags.
    pub metadata: DocMetadata,
}

/// Summary statistics for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionMeta {
    /// The collection name, matching `[a-z0-9_]+`.
    pub name: String,
    /// Number of live documents.
    pub count: u64,
    /// Last time any document in the collection was mutated (ms).
    pub last_updated: u64,
}

/// Checks a collection name against the `[a-z0-9_]+` grammar.
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

/// A database project registered on the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Internal project id.
    pub id: ProjectId,
    /// Human-readable project name.
    pub project_name: String,
    /// Free-form description.
    pub description: String,
    /// The on-chain address of the contract, `0x`-hex.
    pub contract_address: String,
    /// The code hash from the uploaded descriptor (`source.hash`).
    pub contract_hash: String,
    /// The contract name from the uploaded descriptor (`contract.name`).
    pub contract_name: String,
    /// The id of the owning console user.
    pub owner_id: String,
    /// Creation time (ms).
    pub created_at: u64,
    /// Digest of the project API key. The plaintext key is never stored.
    pub api_key_digest: String,
    /// Event schema resolved from the uploaded descriptor.
    pub event_schema: EventSchema,
}

/// A saved trigger: a DSL program bound to one event of one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// Trigger id, unique within the project.
    pub id: TriggerId,
    /// The owning project.
    pub project_id: ProjectId,
    /// Free-form description.
    pub description: String,
    /// The DSL source, comments stripped.
    pub source: String,
    /// Whether the trigger fires on matching events.
    pub active: bool,
    /// Deploy time (ms).
    pub created_at: u64,
    /// Last time the trigger was invoked (ms). Zero if never run.
    pub last_run_at: u64,
}

/// The trigger projection returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlimTrigger {
    /// Trigger id.
    pub id: TriggerId,
    /// Free-form description.
    pub description: String,
    /// The stored DSL source.
    pub source: String,
    /// Whether the trigger fires on matching events.
    pub active: bool,
    /// Deploy time (ms).
    pub created_at: u64,
    /// Last time the trigger was invoked (ms).
    pub last_run_at: u64,
}

impl From<Trigger> for SlimTrigger {
    fn from(t: Trigger) -> Self {
        Self {
            id: t.id,
            description: t.description,
            source: t.source,
            active: t.active,
            created_at: t.created_at,
            last_run_at: t.last_run_at,
        }
    }
}

/// The kind of mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// A document was created.
    Insert,
    /// A document was replaced or merged.
    Update,
    /// A document was removed.
    Delete,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Insert => write!(f, "insert"),
            ChangeOp::Update => write!(f, "update"),
            ChangeOp::Delete => write!(f, "delete"),
        }
    }
}

/// Emitted by the document store after every committed mutation.
///
/// For deletes, `doc` carries the removed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The owning project.
    pub project_id: ProjectId,
    /// What happened.
    pub op: ChangeOp,
    /// The collection the document lives in.
    pub collection: String,
    /// The document id.
    pub doc_id: String,
    /// The new document, or the old one on delete.
    pub doc: Document,
}

impl ChangeRecord {
    /// The pub/sub topics this change maps to.
    pub fn topics(&self) -> [String; 2] {
        [
            collection_topic(&self.collection),
            document_topic(&self.collection, &self.doc_id),
        ]
    }
}

/// Topic for all changes in a collection.
pub fn collection_topic(collection: &str) -> String {
    format!("collection:{collection}:change")
}

/// Topic for changes to a single document.
pub fn document_topic(collection: &str, doc_id: &str) -> String {
    format!("document:{collection}:{doc_id}:change")
}

/// The frame pushed to WebSocket subscribers on every matching change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsPayload {
    /// `"insert"`, `"update"` or `"delete"`.
    pub op: String,
    /// The topic the subscriber matched on.
    pub topic: String,
    /// The document affected (old copy on delete).
    pub doc: Document,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_grammar() {
        assert!(is_valid_collection_name("transactions"));
        assert!(is_valid_collection_name("tx_2024"));
        assert!(!is_valid_collection_name(""));
        assert!(!is_valid_collection_name("Tx"));
        assert!(!is_valid_collection_name("a-b"));
        assert!(!is_valid_collection_name("a.b"));
    }

    #[test]
    fn change_record_topics() {
        let doc = Document {
            id: "u1".into(),
            data: serde_json::json!({"score": 1}),
            metadata: DocMetadata::new(42),
        };
        let change = ChangeRecord {
            project_id: "p".into(),
            op: ChangeOp::Update,
            collection: "users".into(),
            doc_id: "u1".into(),
            doc,
        };
        assert_eq!(
            change.topics(),
            [
                "collection:users:change".to_string(),
                "document:users:u1:change".to_string()
            ]
        );
    }

    #[test]
    fn doc_metadata_starts_at_version_one() {
        let meta = DocMetadata::new(now_millis());
        assert_eq!(meta.version, 1);
        assert_eq!(meta.created_at, meta.updated_at);
    }
}
