use crate::store::Store;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;

/// A [KeyValueStore] persists serializable values against byte-realizable
/// keys. Every [Store] is one for free; values are carried as JSON.
#[async_trait]
pub trait KeyValueStore: Clone + Send + Sync {
    /// Persist a serializable value against the given key
    async fn set_key<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]> + Send,
        V: Serialize + Send;

    /// Retrieve the value stored against the given key, if any
    async fn get_key<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + Send,
        V: DeserializeOwned + Send;

    /// Unset the value stored against the given key, if any
    async fn unset_key<K>(&mut self, key: K) -> Result<()>
    where
        K: AsRef<[u8]> + Send;

    /// Same as get_key, but returns an error if no value is found to be
    /// stored against the key
    async fn require_key<K, V>(&self, key: K) -> Result<V>
    where
        K: AsRef<[u8]> + Send + Display,
        V: DeserializeOwned + Send,
    {
        let required = key.to_string();

        match self.get_key(key).await? {
            Some(value) => Ok(value),
            None => Err(anyhow!("No value found for '{required}'")),
        }
    }
}

#[async_trait]
impl<S> KeyValueStore for S
where
    S: Store,
{
    async fn set_key<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]> + Send,
        V: Serialize + Send,
    {
        let bytes = serde_json::to_vec(&value)?;
        self.write(key.as_ref(), &bytes).await?;
        Ok(())
    }

    async fn get_key<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]> + Send,
        V: DeserializeOwned + Send,
    {
        Ok(match self.read(key.as_ref()).await? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        })
    }

    async fn unset_key<K>(&mut self, key: K) -> Result<()>
    where
        K: AsRef<[u8]> + Send,
    {
        self.remove(key.as_ref()).await?;
        Ok(())
    }
}
