use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a store backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
  #[error("store lock poisoned")]
  LockPoisoned,
}

/// Key-value backend used by the request handler
///
/// A missing key is `Ok(None)`, never an error.
#[async_trait]
pub trait KvStore: Send + Sync {
  /// Get the value for a key
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

  /// Insert or overwrite a key
  async fn set(&self, key: String, value: String) -> Result<(), StoreError>;
}

/// In-memory key-value store, lost on restart
#[derive(Debug)]
pub struct MemoryStore {
  data: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
  /// Create a new empty store
  pub fn new() -> Self {
    Self {
      data: RwLock::new(HashMap::new()),
    }
  }
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl KvStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
    let data = self.data.read().map_err(|_| StoreError::LockPoisoned)?;
    Ok(data.get(key).cloned())
  }

  async fn set(&self, key: String, value: String) -> Result<(), StoreError> {
    let mut data = self.data.write().map_err(|_| StoreError::LockPoisoned)?;
    data.insert(key, value);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_get_missing_key() {
    let store = MemoryStore::new();
    assert_eq!(store.get("nonexistent").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_set_then_get() {
    let store = MemoryStore::new();
    store.set("hello".into(), "world".into()).await.unwrap();
    assert_eq!(store.get("hello").await.unwrap(), Some("world".to_string()));
  }

  #[tokio::test]
  async fn test_empty_value_is_stored() {
    let store = MemoryStore::new();
    store.set("hello".into(), String::new()).await.unwrap();
    assert_eq!(store.get("hello").await.unwrap(), Some(String::new()));
  }

  #[tokio::test]
  async fn test_set_overwrites() {
    let store = MemoryStore::new();
    store.set("hello".into(), "world".into()).await.unwrap();
    store.set("hello".into(), "gopher".into()).await.unwrap();
    assert_eq!(store.get("hello").await.unwrap(), Some("gopher".to_string()));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_sets_to_distinct_keys() {
    let store = Arc::new(MemoryStore::new());
    store.set("untouched".into(), "original".into()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
      let store = Arc::clone(&store);
      handles.push(tokio::spawn(async move {
        for j in 0..50 {
          store
            .set(format!("key-{}", i), format!("value-{}-{}", i, j))
            .await
            .unwrap();
        }
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    for i in 0..32 {
      assert_eq!(
        store.get(&format!("key-{}", i)).await.unwrap(),
        Some(format!("value-{}-49", i))
      );
    }
    assert_eq!(
      store.get("untouched").await.unwrap(),
      Some("original".to_string())
    );
  }
}
