use anyhow::Result;
use async_trait::async_trait;

/// A primitive interface for storage backends. Any backend that can read,
/// write, remove and scan ordered byte keys can host the relay's tables, and
/// automatically gains the typed [crate::KeyValueStore] layer.
#[async_trait]
pub trait Store: Clone + Send + Sync {
    /// Read the bytes stored against a given key
    async fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write bytes against a given key, returning the previous value stored
    /// against that key if any
    async fn write(&mut self, key: &[u8], bytes: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a value given a key, returning the removed value if any
    async fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the value stored against `key` only if the current
    /// value matches `old` exactly (`None` meaning absent). Returns whether
    /// the swap happened. Conditional status transitions are built on this.
    async fn compare_and_swap(
        &mut self,
        key: &[u8],
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool>;

    /// All entries whose key begins with `prefix`, in ascending key order.
    /// The relay's queue drains and sweeps are all expressed as prefix scans.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Flushes pending writes if there are any
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
