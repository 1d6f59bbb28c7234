use crate::{storage::Storage, store::Store};
use anyhow::Result;
use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::PathBuf;

/// How to initialize a [SledStorage]: open a path, or adopt an already-open
/// database (used when several components share one file)
pub enum SledStorageInit {
    Path(PathBuf),
    Db(Db),
}

/// [Storage] backed by sled; each named store maps to a sled [Tree]
#[derive(Clone, Debug)]
pub struct SledStorage {
    db: Db,
}

impl SledStorage {
    pub fn new(init: SledStorageInit) -> Result<Self> {
        let db: Db = match init {
            SledStorageInit::Path(path) => sled::open(path)?,
            SledStorageInit::Db(db) => db,
        };

        Ok(SledStorage { db })
    }
}

#[async_trait]
impl Storage for SledStorage {
    type Store = SledStore;

    async fn get_store(&self, name: &str) -> Result<SledStore> {
        Ok(SledStore::new(&self.db.open_tree(name)?))
    }
}

/// One named tree of a [SledStorage]
#[derive(Clone, Debug)]
pub struct SledStore {
    db: Tree,
}

impl SledStore {
    pub fn new(db: &Tree) -> Self {
        SledStore { db: db.clone() }
    }
}

#[async_trait]
impl Store for SledStore {
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|entry| entry.to_vec()))
    }

    async fn write(&mut self, key: &[u8], bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let old_bytes = self
            .db
            .insert(key, bytes)?
            .map(|old_entry| old_entry.to_vec());
        Ok(old_bytes)
    }

    async fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .db
            .remove(key)
            .map(|maybe_entry| maybe_entry.map(|entry| entry.to_vec()))?)
    }

    async fn compare_and_swap(
        &mut self,
        key: &[u8],
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        Ok(self.db.compare_and_swap(key, old, new)?.is_ok())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        for entry in self.db.scan_prefix(prefix) {
            let (key, value) = entry?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_persists_across_reopens() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().to_path_buf();

        {
            let storage = SledStorage::new(SledStorageInit::Path(path.clone())).unwrap();
            let mut store = storage.get_store("relay_messages").await.unwrap();
            store.write(b"key", b"value").await.unwrap();
            store.flush().await.unwrap();
        }

        let storage = SledStorage::new(SledStorageInit::Path(path)).unwrap();
        let store = storage.get_store("relay_messages").await.unwrap();
        assert_eq!(store.read(b"key").await.unwrap(), Some(b"value".to_vec()));
    }
}
