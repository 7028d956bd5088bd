use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::CacheError;
use crate::storage::{CacheMeta, CacheStorage, CachedOutput};

#[derive(Default)]
struct Inner {
  entries: HashMap<String, (CacheMeta, CachedOutput)>,
  pending: Vec<String>,
}

#[derive(Default)]
pub struct MemoryCacheStorage {
  inner: Mutex<Inner>,
}

impl MemoryCacheStorage {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn len(&self) -> usize {
    self.inner.lock().await.entries.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
  async fn get(&self, key: &str) -> Result<Option<CachedOutput>, CacheError> {
    let mut inner = self.inner.lock().await;
    match inner.entries.get(key) {
      Some((meta, _)) if meta.is_expired() => {
        inner.entries.remove(key);
        Ok(None)
      }
      Some((_, value)) => Ok(Some(value.clone())),
      None => Ok(None),
    }
  }

  async fn set(&self, key: &str, value: CachedOutput, ttl: Option<Duration>) -> Result<(), CacheError> {
    let mut inner = self.inner.lock().await;
    inner.entries.insert(key.to_string(), (CacheMeta::new(key, ttl), value));
    inner.pending.push(key.to_string());
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.inner.lock().await.entries.remove(key).is_some())
  }

  async fn clear(&self) -> Result<(), CacheError> {
    let mut inner = self.inner.lock().await;
    inner.entries.clear();
    inner.pending.clear();
    Ok(())
  }

  async fn commit(&self) -> Result<(), CacheError> {
    self.inner.lock().await.pending.clear();
    Ok(())
  }

  async fn rollback(&self) -> Result<(), CacheError> {
    let mut inner = self.inner.lock().await;
    let pending = std::mem::take(&mut inner.pending);
    for key in pending {
      inner.entries.remove(&key);
    }
    Ok(())
  }
}
