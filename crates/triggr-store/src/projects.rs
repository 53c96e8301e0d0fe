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

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use triggr_types::{now_millis, EventSchema, Project};
use triggr_utils::{Error, Result};

use crate::{decode_record, encode_record, Batch, KvBackend, StoreKey};

/// Length of a freshly minted API key.
const API_KEY_LEN: usize = 32;

/// Mints a new plaintext API key. Returned to the caller exactly once;
/// only its digest is persisted.
pub fn mint_api_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}

/// The stored derivation of an API key.
pub fn api_key_digest(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// The caller-supplied parts of a new project.
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Human-readable project name.
    pub project_name: String,
    /// Free-form description.
    pub description: String,
    /// On-chain contract address, `0x`-hex.
    pub contract_address: String,
    /// Code hash from the uploaded descriptor.
    pub contract_hash: String,
    /// Contract name from the uploaded descriptor.
    pub contract_name: String,
    /// Owning console user.
    pub owner_id: String,
    /// Event schema resolved from the uploaded descriptor.
    pub event_schema: EventSchema,
}

/// Persistent record of projects: owner, contract address and the parsed
/// event schema from the uploaded descriptor.
#[derive(Clone, Debug)]
pub struct ProjectStore<B> {
    backend: B,
}

impl<B: KvBackend> ProjectStore<B> {
    /// Creates a project store over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Creates a project and returns it together with the plaintext API
    /// key. The key is shown once; the record keeps only its digest.
    pub fn create(&self, new: NewProject) -> Result<(Project, String)> {
        let api_key = mint_api_key();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            project_name: new.project_name,
            description: new.description,
            contract_address: new.contract_address.to_lowercase(),
            contract_hash: new.contract_hash,
            contract_name: new.contract_name,
            owner_id: new.owner_id,
            created_at: now_millis(),
            api_key_digest: api_key_digest(&api_key),
            event_schema: new.event_schema,
        };

        let key = StoreKey::Project {
            project_id: project.id.clone(),
        }
        .to_bytes();
        self.backend.put(&key, &encode_record(&project)?)?;
        Ok((project, api_key))
    }

    /// Fetches a project by id.
    pub fn get(&self, project_id: &str) -> Result<Option<Project>> {
        let key = StoreKey::Project {
            project_id: project_id.into(),
        }
        .to_bytes();
        match self.backend.get(&key)? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Returns every stored project. Used to rebuild the registry cache.
    pub fn all(&self) -> Result<Vec<Project>> {
        self.backend
            .scan_prefix(&StoreKey::projects_prefix())?
            .iter()
            .map(|(_, v)| decode_record(v))
            .collect()
    }

    /// Returns all projects owned by `owner_id`.
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Project>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|p| p.owner_id == owner_id)
            .collect())
    }

    /// Deletes a project after an ownership check, cascading over its
    /// triggers, collections and documents in a single batch.
    pub fn delete(&self, project_id: &str, owner_id: &str) -> Result<Project> {
        let project = self
            .get(project_id)?
            .ok_or_else(|| Error::NotFound(format!("project {project_id}")))?;
        if project.owner_id != owner_id {
            return Err(Error::Forbidden);
        }

        let mut batch = Batch::new();
        batch.delete(
            StoreKey::Project {
                project_id: project_id.into(),
            }
            .to_bytes(),
        );
        for prefix in [
            StoreKey::triggers_prefix(project_id),
            StoreKey::collections_prefix(project_id),
            StoreKey::project_docs_prefix(project_id),
        ] {
            for (key, _) in self.backend.scan_prefix(&prefix)? {
                batch.delete(key);
            }
        }
        self.backend.apply(batch)?;
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStore, TriggerStore};
    use triggr_types::Trigger;

    fn new_project(owner: &str) -> NewProject {
        NewProject {
            project_name: "flipper".into(),
            description: "a test project".into(),
            contract_address: "0xABCD".into(),
            contract_hash: "0x1234".into(),
            contract_name: "flipper".into(),
            owner_id: owner.into(),
            event_schema: EventSchema::default(),
        }
    }

    #[test]
    fn api_keys_are_minted_and_digested() {
        let key = mint_api_key();
        assert_eq!(key.len(), API_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, mint_api_key());

        let digest = api_key_digest(&key);
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, api_key_digest(&key));
    }

    #[test]
    fn create_returns_plaintext_once_and_stores_digest() {
        let store = ProjectStore::new(InMemoryStore::default());
        let (project, secret) = store.create(new_project("alice")).unwrap();
        assert_eq!(project.api_key_digest, api_key_digest(&secret));
        assert_eq!(project.contract_address, "0xabcd");

        let loaded = store.get(&project.id).unwrap().unwrap();
        assert_eq!(loaded.api_key_digest, project.api_key_digest);
    }

    #[test]
    fn list_by_owner_filters() {
        let store = ProjectStore::new(InMemoryStore::default());
        store.create(new_project("alice")).unwrap();
        store.create(new_project("alice")).unwrap();
        store.create(new_project("bob")).unwrap();
        assert_eq!(store.list_by_owner("alice").unwrap().len(), 2);
        assert_eq!(store.list_by_owner("bob").unwrap().len(), 1);
        assert!(store.list_by_owner("carol").unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_to_triggers_and_documents() {
        let backend = InMemoryStore::default();
        let projects = ProjectStore::new(backend.clone());
        let triggers = TriggerStore::new(backend.clone());
        let docs = crate::DocumentStore::new(backend.clone());

        let (project, _) = projects.create(new_project("alice")).unwrap();
        triggers
            .create(Trigger {
                id: "t1".into(),
                project_id: project.id.clone(),
                description: String::new(),
                source: "fn main(events) {}".into(),
                active: true,
                created_at: 0,
                last_run_at: 0,
            })
            .unwrap();
        docs.insert_doc(&project.id, "users", Some("u1".into()), serde_json::json!({}))
            .await
            .unwrap();

        assert!(matches!(
            projects.delete(&project.id, "mallory").unwrap_err(),
            Error::Forbidden
        ));

        projects.delete(&project.id, "alice").unwrap();
        assert!(projects.get(&project.id).unwrap().is_none());
        assert!(triggers.list(&project.id).unwrap().is_empty());
        assert!(docs.get_doc(&project.id, "users", "u1").unwrap().is_none());
        assert!(docs.list_collections(&project.id).unwrap().is_empty());
    }
}
