//! Object storage (spec.md §6 layout): operator shares, the secrets blob,
//! and solana-address blobs. Out-of-scope transport per spec.md §1;
//! modeled as a trait with a `DashMap`-backed in-memory implementation,
//! grounded on the teacher's `store.rs` `InMemoryStore`.

use dashmap::DashMap;

#[derive(Debug)]
pub enum ObjectStoreError {
    NotFound(String),
    Backend(String),
}

impl std::fmt::Display for ObjectStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStoreError::NotFound(key) => write!(f, "object not found: {key}"),
            ObjectStoreError::Backend(msg) => write!(f, "object store backend error: {msg}"),
        }
    }
}
impl std::error::Error for ObjectStoreError {}

pub trait ObjectStore: Send + Sync + 'static {
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Vec<u8>, ObjectStoreError>> + Send;

    fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), ObjectStoreError>> + Send;

    /// Lists object keys under `prefix`, used by the Share Store to fetch
    /// all operator shares under `<hex(PCR2)>/operator-share`.
    fn list(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, ObjectStoreError>> + Send;
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        self.objects
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), ObjectStoreError> {
        self.objects.insert(key.to_string(), value);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        Ok(self
            .objects
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemoryObjectStore::new();
        store.put("a/b", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_errors() {
        let store = InMemoryObjectStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(ObjectStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let store = InMemoryObjectStore::new();
        store.put("shares/op-a", b"1".to_vec()).await.unwrap();
        store.put("shares/op-b", b"2".to_vec()).await.unwrap();
        store.put("other/x", b"3".to_vec()).await.unwrap();

        let mut keys = store.list("shares/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["shares/op-a".to_string(), "shares/op-b".to_string()]);
    }
}
