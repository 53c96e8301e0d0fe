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

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{Batch, BatchOp, KvBackend};

/// InMemoryStore mirrors the sled backend over a `BTreeMap`, keeping the
/// same ordered-scan semantics without touching disk.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl KvBackend for InMemoryStore {
    fn get(&self, key: &[u8]) -> triggr_utils::Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> triggr_utils::Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> triggr_utils::Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> triggr_utils::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let guard = self.map.read();
        Ok(guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: Batch) -> triggr_utils::Result<()> {
        let mut guard = self.map.write();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => {
                    guard.insert(k.clone(), v.clone());
                }
                BatchOp::Delete(k) => {
                    guard.remove(k);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prefix_matches_sled_semantics() {
        let store = InMemoryStore::default();
        store.put(b"coll/p/a/meta", b"1").unwrap();
        store.put(b"coll/p/b/meta", b"2").unwrap();
        store.put(b"coll/q/a/meta", b"3").unwrap();

        let pairs = store.scan_prefix(b"coll/p/").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, b"coll/p/a/meta".to_vec());
        assert_eq!(pairs[1].0, b"coll/p/b/meta".to_vec());
    }

    #[test]
    fn batch_is_all_or_nothing_per_lock_scope() {
        let store = InMemoryStore::default();
        let mut batch = Batch::new();
        batch.put(b"x".to_vec(), b"1".to_vec());
        batch.delete(b"x".to_vec());
        store.apply(batch).unwrap();
        assert_eq!(store.get(b"x").unwrap(), None);
    }
}
