use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  #[error("cache io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cache entry is corrupt: {0}")]
  Serde(#[from] serde_json::Error),
}

impl CacheError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    CacheError::Io {
      path: path.into(),
      source,
    }
  }
}
