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

use triggr_types::Trigger;
use triggr_utils::{Error, Result};

use crate::{decode_record, encode_record, KvBackend, StoreKey};

/// Persistent trigger records, keyed `(project_id, trigger_id)`.
///
/// Compiled rule trees are derived state and never persisted; only the
/// stripped DSL source is stored.
#[derive(Clone, Debug)]
pub struct TriggerStore<B> {
    backend: B,
}

impl<B: KvBackend> TriggerStore<B> {
    /// Creates a trigger store over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(project_id: &str, trigger_id: &str) -> Vec<u8> {
        StoreKey::Trigger {
            project_id: project_id.into(),
            trigger_id: trigger_id.into(),
        }
        .to_bytes()
    }

    /// Stores a new trigger. Fails with [`Error::Conflict`] when the id is
    /// already taken within the project.
    pub fn create(&self, trigger: Trigger) -> Result<Trigger> {
        let key = Self::key(&trigger.project_id, &trigger.id);
        if self.backend.get(&key)?.is_some() {
            return Err(Error::Conflict(format!(
                "trigger {} already exists",
                trigger.id
            )));
        }
        self.backend.put(&key, &encode_record(&trigger)?)?;
        Ok(trigger)
    }

    /// Overwrites an existing trigger record.
    pub fn save(&self, trigger: &Trigger) -> Result<()> {
        let key = Self::key(&trigger.project_id, &trigger.id);
        self.backend.put(&key, &encode_record(trigger)?)
    }

    /// Fetches a trigger.
    pub fn get(&self, project_id: &str, trigger_id: &str) -> Result<Trigger> {
        match self.backend.get(&Self::key(project_id, trigger_id))? {
            Some(bytes) => decode_record(&bytes),
            None => Err(Error::NotFound(format!("trigger {trigger_id}"))),
        }
    }

    /// Lists the triggers of a project, in ascending lexicographic id
    /// order (the order they fire in).
    pub fn list(&self, project_id: &str) -> Result<Vec<Trigger>> {
        self.backend
            .scan_prefix(&StoreKey::triggers_prefix(project_id))?
            .iter()
            .map(|(_, v)| decode_record(v))
            .collect()
    }

    /// Lists every trigger of every project. Used for the startup index
    /// rebuild.
    pub fn all(&self) -> Result<Vec<Trigger>> {
        self.backend
            .scan_prefix(&StoreKey::all_triggers_prefix())?
            .iter()
            .map(|(_, v)| decode_record(v))
            .collect()
    }

    /// Flips the active flag of a trigger.
    pub fn set_state(
        &self,
        project_id: &str,
        trigger_id: &str,
        active: bool,
    ) -> Result<Trigger> {
        let mut trigger = self.get(project_id, trigger_id)?;
        trigger.active = active;
        self.save(&trigger)?;
        Ok(trigger)
    }

    /// Records an invocation time.
    pub fn touch_last_run(
        &self,
        project_id: &str,
        trigger_id: &str,
        now: u64,
    ) -> Result<()> {
        let mut trigger = self.get(project_id, trigger_id)?;
        trigger.last_run_at = now;
        self.save(&trigger)
    }

    /// Deletes a trigger. Fails with [`Error::NotFound`] when absent.
    pub fn delete(&self, project_id: &str, trigger_id: &str) -> Result<()> {
        let key = Self::key(project_id, trigger_id);
        if self.backend.get(&key)?.is_none() {
            return Err(Error::NotFound(format!("trigger {trigger_id}")));
        }
        self.backend.delete(&key)
    }
}
