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
//! # Triggr Context Module 🕸️
//!
//! A module for managing the context of the node: configuration, store
//! handles, metrics, the shutdown broadcast and the project registry
//! cache used on every authenticated request and every ingested event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use triggr_chain::ContractLookup;
use triggr_config::TriggrConfig;
use triggr_pubsub::{ConnectionId, PubSubBus};
use triggr_store::{
    api_key_digest, DocumentStore, ProjectStore, SledStore, TriggerStore,
};
use triggr_types::{EventSchema, Project, ProjectId};
use triggr_utils::metric::Metrics;

#[derive(Default)]
struct RegistryCache {
    by_digest: HashMap<String, Project>,
    by_contract: HashMap<String, Project>,
}

impl RegistryCache {
    fn insert(&mut self, project: Project) {
        self.by_contract
            .insert(project.contract_address.to_lowercase(), project.clone());
        self.by_digest.insert(project.api_key_digest.clone(), project);
    }

    fn remove(&mut self, project_id: &str) {
        self.by_digest.retain(|_, p| p.id != project_id);
        self.by_contract.retain(|_, p| p.id != project_id);
    }
}

/// TriggrContext contains the node's configuration and shutdown signal.
#[derive(Clone)]
pub struct TriggrContext {
    /// The configuration of the node.
    pub config: TriggrConfig,
    /// Broadcasts a shutdown signal to all active connections and
    /// background services.
    ///
    /// The initial `shutdown` trigger is provided by the `run` caller.
    /// When a graceful shutdown is initiated, a `()` value is sent; each
    /// task receives it, reaches a safe terminal state and completes.
    notify_shutdown: broadcast::Sender<()>,
    /// Represents the metrics for the node.
    pub metrics: Metrics,
    /// The document store.
    pub docs: DocumentStore<SledStore>,
    /// The project registry.
    pub projects: ProjectStore<SledStore>,
    /// The trigger registry.
    pub triggers: TriggerStore<SledStore>,
    /// The pub/sub routing table.
    pub bus: Arc<PubSubBus>,
    store: SledStore,
    registry: Arc<RwLock<RegistryCache>>,
    next_conn_id: Arc<AtomicU64>,
}

impl TriggrContext {
    /// Creates a new TriggrContext, rebuilding the registry cache from
    /// the store.
    pub fn new(
        config: TriggrConfig,
        store: SledStore,
    ) -> triggr_utils::Result<Self> {
        let (notify_shutdown, _) = broadcast::channel(2);
        let metrics = Metrics::shared()?;
        let ctx = Self {
            config,
            notify_shutdown,
            metrics: metrics.clone(),
            docs: DocumentStore::new(store.clone()),
            projects: ProjectStore::new(store.clone()),
            triggers: TriggerStore::new(store.clone()),
            bus: Arc::new(PubSubBus::new(metrics)),
            store,
            registry: Arc::new(RwLock::new(RegistryCache::default())),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        };
        ctx.reload_registry()?;
        Ok(ctx)
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.notify_shutdown.subscribe()
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Rebuilds the registry cache from the project store.
    pub fn reload_registry(&self) -> triggr_utils::Result<()> {
        let projects = self.projects.all()?;
        let mut cache = RegistryCache::default();
        let count = projects.len();
        for project in projects {
            cache.insert(project);
        }
        *self.registry.write() = cache;
        tracing::debug!("Registry cache rebuilt with {count} projects");
        Ok(())
    }

    /// Adds a freshly created project to the cache.
    pub fn cache_project(&self, project: Project) {
        self.registry.write().insert(project);
    }

    /// Evicts a deleted project from the cache.
    pub fn evict_project(&self, project_id: &str) {
        self.registry.write().remove(project_id);
    }

    /// Resolves a presented API key to its project.
    pub fn project_by_api_key(&self, api_key: &str) -> Option<Project> {
        let digest = api_key_digest(api_key);
        self.registry.read().by_digest.get(&digest).cloned()
    }

    /// Resolves a contract address to the project that registered it.
    pub fn project_by_contract(&self, address: &str) -> Option<Project> {
        self.registry
            .read()
            .by_contract
            .get(&address.to_lowercase())
            .cloned()
    }

    /// Mints a connection id for a new WebSocket session.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Gets the total amount of data stored on disk.
    pub fn store_size(&self) -> u64 {
        use triggr_store::KvBackend;
        self.store.size_on_disk()
    }
}

#[async_trait]
impl ContractLookup for TriggrContext {
    async fn project_for_contract(
        &self,
        address: &str,
    ) -> Option<(ProjectId, EventSchema)> {
        self.project_by_contract(address)
            .map(|p| (p.id, p.event_schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggr_store::NewProject;

    fn ctx() -> TriggrContext {
        TriggrContext::new(
            TriggrConfig::default(),
            SledStore::temporary().unwrap(),
        )
        .unwrap()
    }

    fn new_project() -> NewProject {
        NewProject {
            project_name: "flipper".into(),
            description: String::new(),
            contract_address: "0xAB".into(),
            contract_hash: "0x01".into(),
            contract_name: "flipper".into(),
            owner_id: "alice".into(),
            event_schema: EventSchema::default(),
        }
    }

    #[tokio::test]
    async fn api_key_and_contract_lookups_follow_the_cache() {
        let ctx = ctx();
        let (project, secret) = ctx.projects.create(new_project()).unwrap();
        // not cached yet
        assert!(ctx.project_by_api_key(&secret).is_none());

        ctx.cache_project(project.clone());
        assert_eq!(ctx.project_by_api_key(&secret).unwrap().id, project.id);
        // case-insensitive contract lookup
        assert_eq!(ctx.project_by_contract("0xab").unwrap().id, project.id);
        assert!(ctx
            .project_for_contract("0xAB")
            .await
            .map(|(id, _)| id == project.id)
            .unwrap_or(false));

        ctx.evict_project(&project.id);
        assert!(ctx.project_by_api_key(&secret).is_none());
        assert!(ctx.project_by_contract("0xab").is_none());
    }

    #[tokio::test]
    async fn reload_restores_authentication_after_restart() {
        let store = SledStore::temporary().unwrap();
        let first =
            TriggrContext::new(TriggrConfig::default(), store.clone()).unwrap();
        let (_, secret) = first.projects.create(new_project()).unwrap();

        // a second context over the same store rebuilds the cache
        let second = TriggrContext::new(TriggrConfig::default(), store).unwrap();
        assert!(second.project_by_api_key(&secret).is_some());
    }

    #[test]
    fn connection_ids_are_unique() {
        let ctx = ctx();
        let a = ctx.next_connection_id();
        let b = ctx.next_connection_id();
        assert_ne!(a, b);
    }
}
