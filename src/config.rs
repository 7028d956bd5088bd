use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use awel_trigger::DEFAULT_API_PREFIX;
use serde::{Deserialize, Serialize};

pub const ENCRYPTION_KEY_ENV: &str = "AWEL_ENCRYPTION_KEY";
const SECRET_KEY_FILE: &str = "secret.key";

/// Settings for `awel serve`, read from a JSON file.
///
/// Every field is optional in the file; command line flags win over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
  pub host: String,
  pub port: u16,
  pub api_prefix: String,
  pub encryption_key: Option<String>,
}

impl Default for ServeConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 5670,
      api_prefix: DEFAULT_API_PREFIX.to_string(),
      encryption_key: None,
    }
  }
}

impl ServeConfig {
  pub async fn load(path: Option<&Path>) -> Result<Self> {
    let Some(path) = path else {
      return Ok(Self::default());
    };
    let content = tokio::fs::read_to_string(path)
      .await
      .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
  }

  pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
    if let Some(host) = host {
      self.host = host;
    }
    if let Some(port) = port {
      self.port = port;
    }
    self
  }

  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

/// Key used to seal secret variables.
///
/// Looked up in the config, then `AWEL_ENCRYPTION_KEY`, then
/// `<data_dir>/secret.key`, which is generated on first use.
pub async fn resolve_encryption_key(config: &ServeConfig, data_dir: &Path) -> Result<String> {
  if let Some(key) = config.encryption_key.clone().filter(|k| !k.is_empty()) {
    return Ok(key);
  }
  if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV)
    && !key.is_empty()
  {
    return Ok(key);
  }

  let path = data_dir.join(SECRET_KEY_FILE);
  match tokio::fs::read_to_string(&path).await {
    Ok(key) if !key.trim().is_empty() => return Ok(key.trim().to_string()),
    Ok(_) => {}
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
  }

  let key = awel_variables::generate_salt();
  tokio::fs::write(&path, &key)
    .await
    .with_context(|| format!("failed to write {}", path.display()))?;
  tracing::info!(path = %path.display(), "encryption_key_generated");
  Ok(key)
}

pub fn default_data_dir() -> Result<PathBuf> {
  let home = dirs::home_dir().context("could not determine home directory")?;
  Ok(home.join(".awel"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_load_partial_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("serve.json");
    tokio::fs::write(&path, r#"{"port": 8080}"#).await.unwrap();

    let config = ServeConfig::load(Some(&path)).await.unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.api_prefix, DEFAULT_API_PREFIX);
  }

  #[test]
  fn test_flags_override_file() {
    let config = ServeConfig::default().with_overrides(Some("0.0.0.0".to_string()), None);
    assert_eq!(config.bind_addr(), "0.0.0.0:5670");
  }

  #[tokio::test]
  async fn test_generated_key_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServeConfig {
      encryption_key: None,
      ..Default::default()
    };
    // The environment may carry a key; only check the file path when it doesn't.
    if std::env::var(ENCRYPTION_KEY_ENV).is_ok() {
      return;
    }
    let first = resolve_encryption_key(&config, dir.path()).await.unwrap();
    let second = resolve_encryption_key(&config, dir.path()).await.unwrap();
    assert_eq!(first, second);
    assert!(dir.path().join(SECRET_KEY_FILE).exists());
  }

  #[tokio::test]
  async fn test_configured_key_wins() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServeConfig {
      encryption_key: Some("from-config".to_string()),
      ..Default::default()
    };
    let key = resolve_encryption_key(&config, dir.path()).await.unwrap();
    assert_eq!(key, "from-config");
    assert!(!dir.path().join(SECRET_KEY_FILE).exists());
  }
}
