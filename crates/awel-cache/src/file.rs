use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::storage::{CacheMeta, CacheStorage, CachedOutput};

const DATA_EXT: &str = "cache";
const META_EXT: &str = "meta";

/// Cache entries on disk, two files per entry named after the SHA-256 of
/// the key. Both files are written to a temporary name and renamed into
/// place, so readers never observe a partial entry.
pub struct FileCacheStorage {
  root: PathBuf,
  pending: Mutex<Vec<String>>,
}

impl FileCacheStorage {
  pub async fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    tokio::fs::create_dir_all(&root)
      .await
      .map_err(|e| CacheError::io(&root, e))?;
    Ok(Self {
      root,
      pending: Mutex::new(Vec::new()),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn stem(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
  }

  fn path(&self, stem: &str, ext: &str) -> PathBuf {
    self.root.join(format!("{stem}.{ext}"))
  }

  async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<(), CacheError> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await.map_err(|e| CacheError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
      let _ = tokio::fs::remove_file(&tmp).await;
      return Err(CacheError::io(path, e));
    }
    Ok(())
  }

  async fn remove_stem(&self, stem: &str) -> Result<bool, CacheError> {
    let mut removed = false;
    for ext in [META_EXT, DATA_EXT] {
      let path = self.path(stem, ext);
      match tokio::fs::remove_file(&path).await {
        Ok(()) => removed = true,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(CacheError::io(&path, e)),
      }
    }
    Ok(removed)
  }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, CacheError> {
  match tokio::fs::read(path).await {
    Ok(bytes) => Ok(Some(bytes)),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
    Err(e) => Err(CacheError::io(path, e)),
  }
}

#[async_trait]
impl CacheStorage for FileCacheStorage {
  async fn get(&self, key: &str) -> Result<Option<CachedOutput>, CacheError> {
    let stem = Self::stem(key);
    let Some(meta) = read_optional(&self.path(&stem, META_EXT)).await? else {
      return Ok(None);
    };
    let meta: CacheMeta = serde_json::from_slice(&meta)?;
    if meta.key != key {
      warn!(key = %key, stored = %meta.key, "cache_key_collision");
      return Ok(None);
    }
    if meta.is_expired() {
      debug!(key = %key, "cache_entry_expired");
      self.remove_stem(&stem).await?;
      return Ok(None);
    }
    match read_optional(&self.path(&stem, DATA_EXT)).await? {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  async fn set(&self, key: &str, value: CachedOutput, ttl: Option<Duration>) -> Result<(), CacheError> {
    let stem = Self::stem(key);
    let data = serde_json::to_vec(&value)?;
    let meta = serde_json::to_vec(&CacheMeta::new(key, ttl))?;
    // Data first: an entry only counts once its meta file exists.
    self.write_atomic(&self.path(&stem, DATA_EXT), data).await?;
    self.write_atomic(&self.path(&stem, META_EXT), meta).await?;
    self.pending.lock().await.push(stem);
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<bool, CacheError> {
    self.remove_stem(&Self::stem(key)).await
  }

  async fn clear(&self) -> Result<(), CacheError> {
    let mut entries = tokio::fs::read_dir(&self.root)
      .await
      .map_err(|e| CacheError::io(&self.root, e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| CacheError::io(&self.root, e))? {
      let path = entry.path();
      let ours = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == DATA_EXT || ext == META_EXT);
      if ours {
        tokio::fs::remove_file(&path).await.map_err(|e| CacheError::io(&path, e))?;
      }
    }
    self.pending.lock().await.clear();
    Ok(())
  }

  async fn commit(&self) -> Result<(), CacheError> {
    self.pending.lock().await.clear();
    Ok(())
  }

  async fn rollback(&self) -> Result<(), CacheError> {
    let pending = std::mem::take(&mut *self.pending.lock().await);
    for stem in pending {
      self.remove_stem(&stem).await?;
    }
    Ok(())
  }
}
