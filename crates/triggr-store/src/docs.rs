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

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, OwnedMutexGuard};
use uuid::Uuid;

use triggr_types::{
    is_valid_collection_name, now_millis, ChangeOp, ChangeRecord,
    CollectionMeta, DocMetadata, Document,
};
use triggr_utils::{Error, Result};

use crate::{decode_record, encode_record, Batch, KvBackend, StoreKey};

/// Default capacity of the change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// A table of per-key async locks. Writers to the same key serialize;
/// different keys proceed in parallel.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let entry = {
            let mut guard = self.inner.lock();
            guard.entry(key).or_default().clone()
        };
        entry.lock_owned().await
    }
}

/// The document store: collections, documents, metadata, with per-project
/// namespacing over the key-value adapter.
///
/// Every successful mutating call publishes exactly one [`ChangeRecord`]
/// on the change channel, after the batch commits and while the key lock
/// is still held, so per-key publication order equals commit order.
#[derive(Clone)]
pub struct DocumentStore<B> {
    backend: B,
    doc_locks: Arc<KeyedLocks>,
    meta_locks: Arc<KeyedLocks>,
    changes: broadcast::Sender<ChangeRecord>,
}

impl<B: KvBackend> DocumentStore<B> {
    /// Creates a document store over `backend`.
    pub fn new(backend: B) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            backend,
            doc_locks: Arc::new(KeyedLocks::default()),
            meta_locks: Arc::new(KeyedLocks::default()),
            changes,
        }
    }

    /// Subscribes to committed change records.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeRecord> {
        self.changes.subscribe()
    }

    /// The underlying key-value backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Creates a collection if absent. Idempotent.
    pub async fn create_collection(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<CollectionMeta> {
        check_collection_name(name)?;
        let key = StoreKey::CollectionMeta {
            project_id: project_id.into(),
            collection: name.into(),
        }
        .to_bytes();

        let _guard = self
            .meta_locks
            .lock(format!("{project_id}/{name}"))
            .await;
        if let Some(bytes) = self.backend.get(&key)? {
            return decode_record(&bytes);
        }
        let meta = CollectionMeta {
            name: name.to_string(),
            count: 0,
            last_updated: now_millis(),
        };
        self.backend.put(&key, &encode_record(&meta)?)?;
        Ok(meta)
    }

    /// Lists all collections of a project.
    pub fn list_collections(
        &self,
        project_id: &str,
    ) -> Result<Vec<CollectionMeta>> {
        let prefix = StoreKey::collections_prefix(project_id);
        self.backend
            .scan_prefix(&prefix)?
            .iter()
            .map(|(_, v)| decode_record(v))
            .collect()
    }

    /// Inserts a new document. Rejects with [`Error::Conflict`] when the
    /// id is taken; generates a v4 UUID when `doc_id` is absent.
    pub async fn insert_doc(
        &self,
        project_id: &str,
        collection: &str,
        doc_id: Option<String>,
        data: Value,
    ) -> Result<Document> {
        check_collection_name(collection)?;
        let doc_id =
            doc_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = StoreKey::Document {
            project_id: project_id.into(),
            collection: collection.into(),
            doc_id: doc_id.clone(),
        }
        .to_bytes();

        let _doc_guard = self
            .doc_locks
            .lock(format!("{project_id}/{collection}/{doc_id}"))
            .await;
        if self.backend.get(&key)?.is_some() {
            return Err(Error::Conflict(format!(
                "document {doc_id} already exists in {collection}"
            )));
        }

        let now = now_millis();
        let doc = Document {
            id: doc_id.clone(),
            data,
            metadata: DocMetadata::new(now),
        };

        let _meta_guard = self
            .meta_locks
            .lock(format!("{project_id}/{collection}"))
            .await;
        let mut meta = self.load_meta(project_id, collection)?;
        meta.count += 1;
        meta.last_updated = now;

        let mut batch = Batch::new();
        batch.put(key, encode_record(&doc)?);
        batch.put(
            self.meta_key(project_id, collection),
            encode_record(&meta)?,
        );
        self.backend.apply(batch)?;

        self.publish(project_id, ChangeOp::Insert, collection, &doc);
        Ok(doc)
    }

    /// Upserts a document: creates it when absent, replaces its data when
    /// present (preserving `created_at`, bumping `version`).
    ///
    /// Returns the document and whether the call inserted or updated.
    pub async fn put_doc(
        &self,
        project_id: &str,
        collection: &str,
        doc_id: &str,
        data: Value,
    ) -> Result<(Document, ChangeOp)> {
        check_collection_name(collection)?;
        let key = StoreKey::Document {
            project_id: project_id.into(),
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
        .to_bytes();

        let _doc_guard = self
            .doc_locks
            .lock(format!("{project_id}/{collection}/{doc_id}"))
            .await;
        let now = now_millis();
        let existing = match self.backend.get(&key)? {
            Some(bytes) => Some(decode_record::<Document>(&bytes)?),
            None => None,
        };

        let (doc, op, count_delta) = match existing {
            Some(old) => {
                let doc = Document {
                    id: doc_id.to_string(),
                    data,
                    metadata: DocMetadata {
                        created_at: old.metadata.created_at,
                        updated_at: now,
                        version: old.metadata.version + 1,
                        tags: old.metadata.tags,
                    },
                };
                (doc, ChangeOp::Update, 0i64)
            }
            None => {
                let doc = Document {
                    id: doc_id.to_string(),
                    data,
                    metadata: DocMetadata::new(now),
                };
                (doc, ChangeOp::Insert, 1)
            }
        };

        let _meta_guard = self
            .meta_locks
            .lock(format!("{project_id}/{collection}"))
            .await;
        let mut meta = self.load_meta(project_id, collection)?;
        meta.count = (meta.count as i64 + count_delta).max(0) as u64;
        meta.last_updated = now;

        let mut batch = Batch::new();
        batch.put(key, encode_record(&doc)?);
        batch.put(
            self.meta_key(project_id, collection),
            encode_record(&meta)?,
        );
        self.backend.apply(batch)?;

        self.publish(project_id, op, collection, &doc);
        Ok((doc, op))
    }

    /// Shallow-merges `data` into an existing document's object keys.
    /// Fails with [`Error::NotFound`] when the document is absent.
    pub async fn patch_doc(
        &self,
        project_id: &str,
        collection: &str,
        doc_id: &str,
        data: Value,
    ) -> Result<Document> {
        check_collection_name(collection)?;
        let patch = match data {
            Value::Object(map) => map,
            _ => {
                return Err(Error::validation(
                    "patch body must be a JSON object",
                ))
            }
        };
        let key = StoreKey::Document {
            project_id: project_id.into(),
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
        .to_bytes();

        let _doc_guard = self
            .doc_locks
            .lock(format!("{project_id}/{collection}/{doc_id}"))
            .await;
        let old = match self.backend.get(&key)? {
            Some(bytes) => decode_record::<Document>(&bytes)?,
            None => {
                return Err(Error::NotFound(format!(
                    "document {doc_id} not found in {collection}"
                )))
            }
        };

        let now = now_millis();
        let mut merged = match old.data {
            Value::Object(map) => map,
            other => {
                // non-object bodies are replaced wholesale
                let mut map = serde_json::Map::new();
                if !other.is_null() {
                    map.insert("value".into(), other);
                }
                map
            }
        };
        for (k, v) in patch {
            merged.insert(k, v);
        }

        let doc = Document {
            id: doc_id.to_string(),
            data: Value::Object(merged),
            metadata: DocMetadata {
                created_at: old.metadata.created_at,
                updated_at: now,
                version: old.metadata.version + 1,
                tags: old.metadata.tags,
            },
        };

        let _meta_guard = self
            .meta_locks
            .lock(format!("{project_id}/{collection}"))
            .await;
        let mut meta = self.load_meta(project_id, collection)?;
        meta.last_updated = now;

        let mut batch = Batch::new();
        batch.put(key, encode_record(&doc)?);
        batch.put(
            self.meta_key(project_id, collection),
            encode_record(&meta)?,
        );
        self.backend.apply(batch)?;

        self.publish(project_id, ChangeOp::Update, collection, &doc);
        Ok(doc)
    }

    /// Fetches a single document.
    pub fn get_doc(
        &self,
        project_id: &str,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<Document>> {
        let key = StoreKey::Document {
            project_id: project_id.into(),
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
        .to_bytes();
        match self.backend.get(&key)? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Lists all documents in a collection, ordered by document id.
    pub fn list_docs(
        &self,
        project_id: &str,
        collection: &str,
    ) -> Result<Vec<Document>> {
        let prefix = StoreKey::docs_prefix(project_id, collection);
        self.backend
            .scan_prefix(&prefix)?
            .iter()
            .map(|(_, v)| decode_record(v))
            .collect()
    }

    /// Deletes a document. Fails with [`Error::NotFound`] when absent.
    pub async fn delete_doc(
        &self,
        project_id: &str,
        collection: &str,
        doc_id: &str,
    ) -> Result<Document> {
        let key = StoreKey::Document {
            project_id: project_id.into(),
            collection: collection.into(),
            doc_id: doc_id.into(),
        }
        .to_bytes();

        let _doc_guard = self
            .doc_locks
            .lock(format!("{project_id}/{collection}/{doc_id}"))
            .await;
        let old = match self.backend.get(&key)? {
            Some(bytes) => decode_record::<Document>(&bytes)?,
            None => {
                return Err(Error::NotFound(format!(
                    "document {doc_id} not found in {collection}"
                )))
            }
        };

        let _meta_guard = self
            .meta_locks
            .lock(format!("{project_id}/{collection}"))
            .await;
        let mut meta = self.load_meta(project_id, collection)?;
        meta.count = meta.count.saturating_sub(1);
        meta.last_updated = now_millis();

        let mut batch = Batch::new();
        batch.delete(key);
        batch.put(
            self.meta_key(project_id, collection),
            encode_record(&meta)?,
        );
        self.backend.apply(batch)?;

        self.publish(project_id, ChangeOp::Delete, collection, &old);
        Ok(old)
    }

    fn meta_key(&self, project_id: &str, collection: &str) -> Vec<u8> {
        StoreKey::CollectionMeta {
            project_id: project_id.into(),
            collection: collection.into(),
        }
        .to_bytes()
    }

    fn load_meta(
        &self,
        project_id: &str,
        collection: &str,
    ) -> Result<CollectionMeta> {
        match self.backend.get(&self.meta_key(project_id, collection))? {
            Some(bytes) => decode_record(&bytes),
            None => Ok(CollectionMeta {
                name: collection.to_string(),
                count: 0,
                last_updated: 0,
            }),
        }
    }

    fn publish(
        &self,
        project_id: &str,
        op: ChangeOp,
        collection: &str,
        doc: &Document,
    ) {
        // no receivers is fine; errors here only mean nobody is listening
        let _ = self.changes.send(ChangeRecord {
            project_id: project_id.to_string(),
            op,
            collection: collection.to_string(),
            doc_id: doc.id.clone(),
            doc: doc.clone(),
        });
    }
}

fn check_collection_name(name: &str) -> Result<()> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "invalid collection name {name:?}, expected [a-z0-9_]+"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use serde_json::json;

    fn store() -> DocumentStore<InMemoryStore> {
        DocumentStore::new(InMemoryStore::default())
    }

    #[tokio::test]
    async fn insert_then_conflict() {
        let docs = store();
        let doc = docs
            .insert_doc("p", "users", Some("u1".into()), json!({"score": 1}))
            .await
            .unwrap();
        assert_eq!(doc.metadata.version, 1);

        let err = docs
            .insert_doc("p", "users", Some("u1".into()), json!({"score": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn auto_id_is_a_uuid() {
        let docs = store();
        let doc = docs
            .insert_doc("p", "txs", None, json!({"v": 42}))
            .await
            .unwrap();
        assert!(Uuid::parse_str(&doc.id).is_ok());
    }

    #[tokio::test]
    async fn put_twice_advances_version_by_two() {
        let docs = store();
        let (first, op) = docs
            .put_doc("p", "users", "u1", json!({"score": 5}))
            .await
            .unwrap();
        assert_eq!(op, ChangeOp::Insert);
        assert_eq!(first.metadata.version, 1);

        let (second, op) = docs
            .put_doc("p", "users", "u1", json!({"score": 5}))
            .await
            .unwrap();
        assert_eq!(op, ChangeOp::Update);
        assert_eq!(second.metadata.version, 2);
        assert_eq!(second.data, first.data);

        let (third, _) = docs
            .put_doc("p", "users", "u1", json!({"score": 5}))
            .await
            .unwrap();
        assert_eq!(third.metadata.version, 3);
        assert_eq!(third.metadata.created_at, first.metadata.created_at);
        assert!(third.metadata.updated_at >= first.metadata.updated_at);
    }

    #[tokio::test]
    async fn delete_then_insert_restarts_version() {
        let docs = store();
        docs.put_doc("p", "users", "u1", json!({"a": 1})).await.unwrap();
        docs.put_doc("p", "users", "u1", json!({"a": 2})).await.unwrap();
        docs.delete_doc("p", "users", "u1").await.unwrap();

        let doc = docs
            .insert_doc("p", "users", Some("u1".into()), json!({"a": 3}))
            .await
            .unwrap();
        assert_eq!(doc.metadata.version, 1);
    }

    #[tokio::test]
    async fn patch_merges_shallowly() {
        let docs = store();
        docs.insert_doc(
            "p",
            "users",
            Some("u1".into()),
            json!({"a": 1, "b": {"x": 1}}),
        )
        .await
        .unwrap();

        let doc = docs
            .patch_doc("p", "users", "u1", json!({"b": 2, "c": 3}))
            .await
            .unwrap();
        assert_eq!(doc.data, json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(doc.metadata.version, 2);

        let err = docs
            .patch_doc("p", "users", "missing", json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn collection_count_tracks_inserts_and_deletes() {
        let docs = store();
        docs.insert_doc("p", "users", Some("a".into()), json!({}))
            .await
            .unwrap();
        docs.insert_doc("p", "users", Some("b".into()), json!({}))
            .await
            .unwrap();
        docs.put_doc("p", "users", "a", json!({"u": 1})).await.unwrap();
        docs.delete_doc("p", "users", "b").await.unwrap();

        let cols = docs.list_collections("p").unwrap();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].count, 1);
    }

    #[tokio::test]
    async fn every_mutation_publishes_exactly_one_change() {
        let docs = store();
        let mut rx = docs.subscribe_changes();

        docs.insert_doc("p", "users", Some("u1".into()), json!({"a": 1}))
            .await
            .unwrap();
        docs.put_doc("p", "users", "u1", json!({"a": 2})).await.unwrap();
        docs.delete_doc("p", "users", "u1").await.unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.op, ChangeOp::Insert);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.op, ChangeOp::Update);
        assert_eq!(second.doc.data, json!({"a": 2}));
        let third = rx.try_recv().unwrap();
        assert_eq!(third.op, ChangeOp::Delete);
        // the delete carries the old document
        assert_eq!(third.doc.data, json!({"a": 2}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejects_bad_collection_names() {
        let docs = store();
        let err = docs
            .insert_doc("p", "Users", None, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        let err = docs.create_collection("p", "a-b").await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn create_collection_is_idempotent() {
        let docs = store();
        let first = docs.create_collection("p", "logs").await.unwrap();
        docs.insert_doc("p", "logs", None, json!({})).await.unwrap();
        let again = docs.create_collection("p", "logs").await.unwrap();
        assert_eq!(first.name, again.name);
        assert_eq!(again.count, 1);
    }

    #[tokio::test]
    async fn projects_are_disjoint() {
        let docs = store();
        docs.insert_doc("p1", "users", Some("u1".into()), json!({"a": 1}))
            .await
            .unwrap();
        assert!(docs.get_doc("p2", "users", "u1").unwrap().is_none());
    }
}
