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
//! # Triggr Router Module 🕸️
//!
//! Routes decoded chain events to their triggers. Triggers are indexed
//! in memory by `(project, bound event)`, rebuilt at startup by
//! recompiling every stored source, and swapped atomically on CRUD.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use triggr_context::TriggrContext;
use triggr_dsl::{evaluate, Mutator, RuleTree};
use triggr_store::{DocumentStore, SledStore};
use triggr_types::{now_millis, DecodedEvent, ProjectId, TriggerId};
use triggr_utils::{probe, Result};

/// One compiled, active trigger as held by the index.
#[derive(Debug, Clone)]
pub struct IndexedTrigger {
    /// The trigger id; lists are ordered by it.
    pub trigger_id: TriggerId,
    /// The compiled program.
    pub tree: RuleTree,
}

type IndexKey = (ProjectId, String);

/// The in-memory `(project, event name) → ordered trigger list` index.
///
/// Lists are immutable once published; CRUD rebuilds a project's lists
/// and swaps them in under the write lock.
#[derive(Default)]
pub struct TriggerIndex {
    inner: RwLock<HashMap<IndexKey, Arc<Vec<IndexedTrigger>>>>,
}

impl TriggerIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// The triggers to fire for one `(project, event)` pair, in
    /// ascending lexicographic `trigger_id` order.
    pub fn lookup(
        &self,
        project_id: &str,
        event: &str,
    ) -> Option<Arc<Vec<IndexedTrigger>>> {
        self.inner
            .read()
            .get(&(project_id.to_string(), event.to_string()))
            .cloned()
    }

    /// Atomically replaces every list belonging to `project_id`.
    pub fn replace_project(
        &self,
        project_id: &str,
        mut lists: HashMap<String, Vec<IndexedTrigger>>,
    ) {
        for list in lists.values_mut() {
            list.sort_by(|a, b| a.trigger_id.cmp(&b.trigger_id));
        }
        let mut inner = self.inner.write();
        inner.retain(|(project, _), _| project != project_id);
        for (event, list) in lists {
            inner.insert((project_id.to_string(), event), Arc::new(list));
        }
    }

    /// Drops every list belonging to `project_id`.
    pub fn remove_project(&self, project_id: &str) {
        self.inner
            .write()
            .retain(|(project, _), _| project != project_id);
    }

    /// Number of indexed `(project, event)` keys.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Recompiles one project's triggers and swaps its index lists.
///
/// Triggers whose stored source no longer compiles (e.g. after a
/// descriptor re-upload changed the schema) are deactivated and a
/// diagnostic is recorded.
pub fn rebuild_project(
    ctx: &TriggrContext,
    index: &TriggerIndex,
    project_id: &str,
) -> Result<()> {
    let Some(project) = ctx.projects.get(project_id)? else {
        index.remove_project(project_id);
        return Ok(());
    };
    let mut lists: HashMap<String, Vec<IndexedTrigger>> = HashMap::new();
    for mut trigger in ctx.triggers.list(project_id)? {
        if !trigger.active {
            continue;
        }
        match triggr_dsl::compile(&trigger.source, &project.event_schema) {
            Ok((_, tree)) => {
                lists.entry(tree.bound_event.clone()).or_default().push(
                    IndexedTrigger {
                        trigger_id: trigger.id.clone(),
                        tree,
                    },
                );
            }
            Err(e) => {
                tracing::error!(
                    project = %project_id,
                    trigger_id = %trigger.id,
                    cause = %e,
                    "Stored trigger no longer compiles, deactivating"
                );
                trigger.active = false;
                ctx.triggers.save(&trigger)?;
            }
        }
    }
    index.replace_project(project_id, lists);
    Ok(())
}

/// Rebuilds the whole index at startup, project by project.
pub fn rebuild_all(ctx: &TriggrContext, index: &TriggerIndex) -> Result<()> {
    for project in ctx.projects.all()? {
        rebuild_project(ctx, index, &project.id)?;
    }
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Router,
        indexed_keys = index.len(),
        rebuilt = true,
    );
    Ok(())
}

/// Applies evaluator mutations through the document store, scoped to the
/// owning project.
struct StoreMutator<'a> {
    docs: &'a DocumentStore<SledStore>,
    project_id: &'a str,
}

#[async_trait]
impl Mutator for StoreMutator<'_> {
    async fn insert(
        &self,
        collection: &str,
        doc_id: Option<String>,
        fields: Map<String, Value>,
    ) -> Result<()> {
        self.docs
            .insert_doc(self.project_id, collection, doc_id, Value::Object(fields))
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        doc_id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        self.docs
            .patch_doc(self.project_id, collection, doc_id, Value::Object(fields))
            .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> Result<()> {
        self.docs
            .delete_doc(self.project_id, collection, doc_id)
            .await?;
        Ok(())
    }
}

/// The trigger router: consumes decoded events and fires their triggers.
#[derive(Clone)]
pub struct TriggerRouter {
    ctx: TriggrContext,
    index: Arc<TriggerIndex>,
}

impl TriggerRouter {
    /// Creates a router over a shared index.
    pub fn new(ctx: TriggrContext, index: Arc<TriggerIndex>) -> Self {
        Self { ctx, index }
    }

    /// Returns a task that should be running in the background that will
    /// drain the intake channel until it closes.
    pub async fn run(self, mut intake: mpsc::Receiver<DecodedEvent>) {
        while let Some(event) = intake.recv().await {
            self.handle_event(&event).await;
        }
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Router,
            intake_closed = true,
        );
    }

    /// Fires every matching active trigger for one event, in
    /// lexicographic `trigger_id` order.
    ///
    /// A failing trigger aborts its own remaining statements only; the
    /// next trigger still runs. `last_run_at` is recorded after every
    /// invocation, successful or not.
    pub async fn handle_event(&self, event: &DecodedEvent) {
        let Some(list) = self.index.lookup(&event.project_id, &event.name)
        else {
            return;
        };
        let budget =
            Duration::from_millis(self.ctx.config.runtime.trigger_eval_budget_millis);

        for entry in list.iter() {
            self.ctx.metrics.triggers_executed.inc();
            let mutator = StoreMutator {
                docs: &self.ctx.docs,
                project_id: &event.project_id,
            };
            let outcome =
                tokio::time::timeout(budget, evaluate(&entry.tree, event, &mutator))
                    .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.ctx.metrics.trigger_failures.inc();
                    tracing::error!(
                        project = %event.project_id,
                        trigger_id = %entry.trigger_id,
                        event = %event.name,
                        block = event.block_number,
                        cause = %e,
                        "Trigger aborted"
                    );
                }
                Err(_) => {
                    self.ctx.metrics.trigger_failures.inc();
                    tracing::error!(
                        project = %event.project_id,
                        trigger_id = %entry.trigger_id,
                        event = %event.name,
                        block = event.block_number,
                        budget_ms = budget.as_millis() as u64,
                        "Trigger exceeded its evaluation budget"
                    );
                }
            }
            if let Err(e) = self.ctx.triggers.touch_last_run(
                &event.project_id,
                &entry.trigger_id,
                now_millis(),
            ) {
                tracing::warn!(
                    trigger_id = %entry.trigger_id,
                    "Failed to record last_run_at: {e}"
                );
            }
        }
    }
}
