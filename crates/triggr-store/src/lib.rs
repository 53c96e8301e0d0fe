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
//! # Triggr Store Module 🕸️
//!
//! A module for managing the storage of the node.
//!
//! ## Overview
//!
//! The store module owns all on-disk state: project records, trigger
//! records, collection metadata and documents. Everything goes through a
//! thin ordered key-value adapter ([`KvBackend`]) so the concrete engine
//! stays swappable; a [Sled](https://sled.rs)-backed store is the default
//! and an in-memory store mirrors it for tests.

use serde::de::DeserializeOwned;
use serde::Serialize;

use triggr_utils::{Error, Result};

/// The document store (collections, documents, change records).
pub mod docs;
/// A module for managing in-memory storage of the node.
pub mod mem;
/// Project records and API key derivation.
pub mod projects;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;
/// Trigger records.
pub mod triggers;

pub use self::sled::SledStore;
pub use docs::DocumentStore;
pub use mem::InMemoryStore;
pub use projects::{api_key_digest, mint_api_key, NewProject, ProjectStore};
pub use triggers::TriggerStore;

/// The record-format version byte every stored value starts with.
///
/// Unknown tags are reserved for future formats and rejected on read.
pub const RECORD_VERSION: u8 = 1;

/// StoreKey contains the keys used to address records in the store.
///
/// The rendered byte layout sorts binary-lexicographically so that prefix
/// scans walk one project, one collection or one trigger family at a time:
///
/// ```text
/// proj/<project_id>
/// tkey/<project_id>/<trigger_id>
/// coll/<project_id>/<collection>/meta
/// doc/<project_id>/<collection>/<doc_id>
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum StoreKey {
    /// A project record.
    Project {
        /// The project id.
        project_id: String,
    },
    /// A trigger record.
    Trigger {
        /// The owning project.
        project_id: String,
        /// The trigger id.
        trigger_id: String,
    },
    /// A collection metadata record.
    CollectionMeta {
        /// The owning project.
        project_id: String,
        /// The collection name.
        collection: String,
    },
    /// A document record.
    Document {
        /// The owning project.
        project_id: String,
        /// The collection name.
        collection: String,
        /// The document id.
        doc_id: String,
    },
}

impl StoreKey {
    /// Returns the bytes of the key.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Project { project_id } => {
                format!("proj/{project_id}").into_bytes()
            }
            Self::Trigger {
                project_id,
                trigger_id,
            } => format!("tkey/{project_id}/{trigger_id}").into_bytes(),
            Self::CollectionMeta {
                project_id,
                collection,
            } => format!("coll/{project_id}/{collection}/meta").into_bytes(),
            Self::Document {
                project_id,
                collection,
                doc_id,
            } => format!("doc/{project_id}/{collection}/{doc_id}").into_bytes(),
        }
    }

    /// Prefix covering every project record.
    pub fn projects_prefix() -> Vec<u8> {
        b"proj/".to_vec()
    }

    /// Prefix covering every trigger of a project.
    pub fn triggers_prefix(project_id: &str) -> Vec<u8> {
        format!("tkey/{project_id}/").into_bytes()
    }

    /// Prefix covering every trigger of every project.
    pub fn all_triggers_prefix() -> Vec<u8> {
        b"tkey/".to_vec()
    }

    /// Prefix covering every collection metadata record of a project.
    pub fn collections_prefix(project_id: &str) -> Vec<u8> {
        format!("coll/{project_id}/").into_bytes()
    }

    /// Prefix covering every document of a collection.
    pub fn docs_prefix(project_id: &str, collection: &str) -> Vec<u8> {
        format!("doc/{project_id}/{collection}/").into_bytes()
    }

    /// Prefix covering every document of a project, across collections.
    pub fn project_docs_prefix(project_id: &str) -> Vec<u8> {
        format!("doc/{project_id}/").into_bytes()
    }
}

/// A single operation inside a [`Batch`].
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Store `value` under `key`.
    Put(Vec<u8>, Vec<u8>),
    /// Remove `key`.
    Delete(Vec<u8>),
}

/// An ordered list of operations committed atomically through
/// [`KvBackend::apply`].
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    /// Queues a delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    /// The queued operations, in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Whether the batch carries no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The ordered byte-key/byte-value engine adapter.
///
/// Batches are atomic and durable before `apply` returns.
pub trait KvBackend: Clone + Send + Sync + 'static {
    /// Reads the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    /// Stores `value` under `key`, durably.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Removes `key`, durably.
    fn delete(&self, key: &[u8]) -> Result<()>;
    /// Returns all pairs whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    /// Applies all operations in `batch` atomically and durably.
    fn apply(&self, batch: Batch) -> Result<()>;
    /// Gets the total amount of data stored on disk.
    fn size_on_disk(&self) -> u64 {
        0
    }
}

/// Serializes a record with the leading format-version byte.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let mut out = vec![RECORD_VERSION];
    serde_json::to_writer(&mut out, record)?;
    Ok(out)
}

/// Deserializes a record, rejecting unknown format-version bytes.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    match bytes.split_first() {
        Some((&RECORD_VERSION, body)) => Ok(serde_json::from_slice(body)?),
        Some((tag, _)) => Err(Error::Storage(format!(
            "unknown record format version {tag:#04x}"
        ))),
        None => Err(Error::Storage("empty record".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggr_types::CollectionMeta;

    #[test]
    fn key_layout_is_prefix_scannable() {
        let doc = StoreKey::Document {
            project_id: "p1".into(),
            collection: "users".into(),
            doc_id: "u1".into(),
        };
        assert_eq!(doc.to_bytes(), b"doc/p1/users/u1".to_vec());
        assert!(doc
            .to_bytes()
            .starts_with(&StoreKey::docs_prefix("p1", "users")));
        assert!(doc.to_bytes().starts_with(&StoreKey::project_docs_prefix("p1")));

        let meta = StoreKey::CollectionMeta {
            project_id: "p1".into(),
            collection: "users".into(),
        };
        assert_eq!(meta.to_bytes(), b"coll/p1/users/meta".to_vec());

        let trigger = StoreKey::Trigger {
            project_id: "p1".into(),
            trigger_id: "t9".into(),
        };
        assert!(trigger.to_bytes().starts_with(&StoreKey::triggers_prefix("p1")));
    }

    #[test]
    fn record_envelope_round_trip() {
        let meta = CollectionMeta {
            name: "users".into(),
            count: 3,
            last_updated: 9,
        };
        let bytes = encode_record(&meta).unwrap();
        assert_eq!(bytes[0], RECORD_VERSION);
        let back: CollectionMeta = decode_record(&bytes).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn record_envelope_rejects_unknown_version() {
        let meta = CollectionMeta {
            name: "users".into(),
            count: 0,
            last_updated: 0,
        };
        let mut bytes = encode_record(&meta).unwrap();
        bytes[0] = 0x7f;
        let err = decode_record::<CollectionMeta>(&bytes).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
