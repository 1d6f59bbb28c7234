use crate::store::Store;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// [Storage] is a general trait for backends that can hand out any number of
/// named, independently-scoped [Store]s — one per relay table.
#[async_trait]
pub trait Storage: Clone + Send + Sync + Debug {
    type Store: Store;

    /// Get a [Store] where all values stored in it are scoped to the given
    /// name
    async fn get_store(&self, name: &str) -> Result<Self::Store>;
}
