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

use std::path::Path;

use crate::{Batch, BatchOp, KvBackend};

/// SledStore is a store backed by a [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> triggr_utils::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> triggr_utils::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }
}

impl KvBackend for SledStore {
    fn get(&self, key: &[u8]) -> triggr_utils::Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> triggr_utils::Result<()> {
        self.db.insert(key, value)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> triggr_utils::Result<()> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> triggr_utils::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    fn apply(&self, batch: Batch) -> triggr_utils::Result<()> {
        let mut sled_batch = sled::Batch::default();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => sled_batch.insert(k.as_slice(), v.as_slice()),
                BatchOp::Delete(k) => sled_batch.remove(k.as_slice()),
            }
        }
        self.db.apply_batch(sled_batch)?;
        // batches are guaranteed durable before returning success
        self.db.flush()?;
        Ok(())
    }

    fn size_on_disk(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_should_work() {
        let store = SledStore::temporary().unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn scan_prefix_is_ordered() {
        let store = SledStore::temporary().unwrap();
        store.put(b"doc/p/users/b", b"2").unwrap();
        store.put(b"doc/p/users/a", b"1").unwrap();
        store.put(b"doc/p/logs/z", b"3").unwrap();

        let pairs = store.scan_prefix(b"doc/p/users/").unwrap();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            keys,
            vec![b"doc/p/users/a".to_vec(), b"doc/p/users/b".to_vec()]
        );
    }

    #[test]
    fn batch_applies_atomically() {
        let store = SledStore::temporary().unwrap();
        store.put(b"gone", b"x").unwrap();

        let mut batch = Batch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"gone".to_vec());
        store.apply(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"gone").unwrap(), None);
    }
}
