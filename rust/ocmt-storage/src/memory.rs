use crate::{storage::Storage, store::Store};
use anyhow::Result;
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::Mutex;

/// In-memory [Storage] for tests and ephemeral development relays. Keys are
/// held in a [BTreeMap] so prefix scans observe the same ascending order a
/// persistent backend would.
#[derive(Clone, Default, Debug)]
pub struct MemoryStorage {
    stores: Arc<Mutex<HashMap<String, MemoryStore>>>,
}

#[async_trait]
impl Storage for MemoryStorage {
    type Store = MemoryStore;

    async fn get_store(&self, name: &str) -> Result<MemoryStore> {
        let mut stores = self.stores.lock().await;
        Ok(stores.entry(name.to_owned()).or_default().clone())
    }
}

/// One named keyspace of a [MemoryStorage]
#[derive(Clone, Default, Debug)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).cloned())
    }

    async fn write(&mut self, key: &[u8], bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        Ok(entries.insert(key.to_vec(), bytes.to_vec()))
    }

    async fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key))
    }

    async fn compare_and_swap(
        &mut self,
        key: &[u8],
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(|value| value.as_slice()) != old {
            return Ok(false);
        }
        match new {
            Some(new) => entries.insert(key.to_vec(), new.to_vec()),
            None => entries.remove(key),
        };
        Ok(true)
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyValueStore;

    #[tokio::test]
    async fn named_stores_are_isolated() {
        let storage = MemoryStorage::default();
        let mut left = storage.get_store("left").await.unwrap();
        let right = storage.get_store("right").await.unwrap();

        left.set_key("shared", 1u32).await.unwrap();
        assert_eq!(left.get_key::<_, u32>("shared").await.unwrap(), Some(1));
        assert_eq!(right.get_key::<_, u32>("shared").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scans_are_prefix_bounded_and_ordered() {
        let storage = MemoryStorage::default();
        let mut store = storage.get_store("scan").await.unwrap();

        store.write(b"queue/b/2", b"2").await.unwrap();
        store.write(b"queue/a/1", b"1").await.unwrap();
        store.write(b"queue/a/0", b"0").await.unwrap();
        store.write(b"other/a/9", b"9").await.unwrap();

        let entries = store.scan_prefix(b"queue/a/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                (b"queue/a/0".to_vec(), b"0".to_vec()),
                (b"queue/a/1".to_vec(), b"1".to_vec()),
            ]
        );
    }
}
