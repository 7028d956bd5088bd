use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;

/// A cached task result. Stream results are stored as the collected items
/// and replayed as a stream on a hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CachedOutput {
  Value(Value),
  Stream(Vec<Value>),
}

/// Bookkeeping stored next to each entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
  pub key: String,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
}

impl CacheMeta {
  pub fn new(key: impl Into<String>, ttl: Option<Duration>) -> Self {
    let created_at = Utc::now();
    let expires_at = ttl
      .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
      .and_then(|ttl| created_at.checked_add_signed(ttl));
    Self {
      key: key.into(),
      created_at,
      expires_at,
    }
  }

  pub fn is_expired(&self) -> bool {
    self.expires_at.is_some_and(|at| at <= Utc::now())
  }
}

#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Fetch a live entry. Expired entries are removed and reported as misses.
  async fn get(&self, key: &str) -> Result<Option<CachedOutput>, CacheError>;

  /// Store an entry; `ttl` of `None` never expires.
  async fn set(&self, key: &str, value: CachedOutput, ttl: Option<Duration>) -> Result<(), CacheError>;

  async fn exists(&self, key: &str) -> Result<bool, CacheError> {
    Ok(self.get(key).await?.is_some())
  }

  async fn delete(&self, key: &str) -> Result<bool, CacheError>;

  async fn clear(&self) -> Result<(), CacheError>;

  /// Keep every entry written so far.
  async fn commit(&self) -> Result<(), CacheError>;

  /// Remove the entries written since the last commit.
  async fn rollback(&self) -> Result<(), CacheError>;
}
