use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::encryption::{Encryption, generate_salt};
use crate::error::VariablesError;
use crate::identifier::VariablesIdentifier;
use crate::storage::{StorageInterface, StorageVariables, ValueType, VariableCategory, VariablesFilter};

pub const BUILTIN_VARIABLES_CORE_VARIABLES: &str = "awel.core.variables";
pub const BUILTIN_VARIABLES_CORE_SECRETS: &str = "awel.core.secrets";

const MASKED_VALUE: &str = "******";

/// Source of variable values for operators.
#[async_trait]
pub trait VariablesProvider: Send + Sync {
  /// Resolve one variable, falling back to `default` when it is missing.
  async fn get_value(&self, id: &VariablesIdentifier, default: Option<Value>) -> Result<Value, VariablesError>;

  async fn save(&self, variables: StorageVariables) -> Result<(), VariablesError>;

  async fn delete(&self, id: &VariablesIdentifier) -> Result<bool, VariablesError>;

  /// List variables. Secret values are masked.
  async fn get_variables(&self, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError>;

  /// Resolve a full variable string such as `${llm.key:prod@global}`.
  async fn get(&self, full_key: &str, default: Option<Value>) -> Result<Value, VariablesError> {
    let id = VariablesIdentifier::from_str_identifier(full_key)?;
    self.get_value(&id, default).await
  }
}

/// Read-only variables computed on demand (registered flows, operator
/// types, ...), looked up by variable key.
#[async_trait]
pub trait BuiltinVariablesProvider: Send + Sync {
  /// Variable keys this provider answers for.
  fn keys(&self) -> Vec<String>;

  async fn get_variables(&self, key: &str, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError>;
}

/// Builtin providers keyed by the variable key they serve.
#[derive(Default, Clone)]
pub struct BuiltinVariablesRegistry {
  providers: Arc<RwLock<HashMap<String, Arc<dyn BuiltinVariablesProvider>>>>,
}

impl BuiltinVariablesRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, provider: Arc<dyn BuiltinVariablesProvider>) {
    let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
    for key in provider.keys() {
      debug!(key = %key, "registering builtin variables provider");
      providers.insert(key, Arc::clone(&provider));
    }
  }

  pub fn get(&self, key: &str) -> Option<Arc<dyn BuiltinVariablesProvider>> {
    let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
    providers.get(key).cloned()
  }

  pub fn keys(&self) -> Vec<String> {
    let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
    let mut keys: Vec<String> = providers.keys().cloned().collect();
    keys.sort();
    keys
  }
}

/// Plaintext envelope encrypted for secrets, so the type survives.
#[derive(Serialize, Deserialize)]
struct ValueEnvelope {
  value: Value,
  value_type: ValueType,
}

/// [`VariablesProvider`] over a [`StorageInterface`], encrypting secrets
/// before they reach storage.
pub struct StorageVariablesProvider {
  storage: Arc<dyn StorageInterface>,
  encryption: Arc<dyn Encryption>,
  builtins: BuiltinVariablesRegistry,
}

impl StorageVariablesProvider {
  /// Create a provider with the core builtin providers registered.
  pub fn new(storage: Arc<dyn StorageInterface>, encryption: Arc<dyn Encryption>) -> Self {
    let builtins = BuiltinVariablesRegistry::new();
    builtins.register(Arc::new(AllVariablesProvider::new(Arc::clone(&storage))));
    builtins.register(Arc::new(AllSecretsProvider::new(Arc::clone(&storage))));
    Self {
      storage,
      encryption,
      builtins,
    }
  }

  pub fn builtins(&self) -> &BuiltinVariablesRegistry {
    &self.builtins
  }

  pub fn storage(&self) -> &Arc<dyn StorageInterface> {
    &self.storage
  }

  fn decode(&self, var: StorageVariables) -> Result<Value, VariablesError> {
    let Some(method) = var.encryption_method.as_deref() else {
      return Ok(var.value);
    };
    let key = var.identifier().str_identifier();
    let fail = |message: String| VariablesError::Decryption {
      key: key.clone(),
      message,
    };
    if method != self.encryption.name() {
      return Err(fail(format!("unsupported encryption method '{method}'")));
    }
    let salt = var.salt.as_deref().ok_or_else(|| fail("missing salt".to_string()))?;
    let ciphertext = var
      .value
      .as_str()
      .ok_or_else(|| fail("ciphertext is not a string".to_string()))?;
    let plain = self
      .encryption
      .decrypt(ciphertext, salt)
      .map_err(|e| fail(e.to_string()))?;
    let envelope: ValueEnvelope = serde_json::from_str(&plain).map_err(|e| fail(e.to_string()))?;
    Ok(envelope.value)
  }

  async fn get_builtin(
    &self,
    provider: &dyn BuiltinVariablesProvider,
    id: &VariablesIdentifier,
  ) -> Result<Option<Value>, VariablesError> {
    let filter = VariablesFilter {
      key: Some(id.key.clone()),
      ..Default::default()
    };
    let vars = provider.get_variables(&id.key, &filter).await?;
    Ok(vars.into_iter().find(|v| v.name == id.name).map(|v| v.value))
  }
}

#[async_trait]
impl VariablesProvider for StorageVariablesProvider {
  async fn get_value(&self, id: &VariablesIdentifier, default: Option<Value>) -> Result<Value, VariablesError> {
    let found = match self.builtins.get(&id.key) {
      Some(provider) => self.get_builtin(provider.as_ref(), id).await?,
      None => match self.storage.load(id).await? {
        Some(var) if var.enabled => Some(self.decode(var)?),
        _ => None,
      },
    };
    match (found, default) {
      (Some(value), _) => Ok(value),
      (None, Some(default)) => Ok(default),
      (None, None) => Err(VariablesError::NotFound {
        key: id.str_identifier(),
      }),
    }
  }

  async fn save(&self, mut variables: StorageVariables) -> Result<(), VariablesError> {
    if self.builtins.get(&variables.key).is_some() {
      return Err(VariablesError::Unsupported {
        message: format!("variables under '{}' are read-only", variables.key),
      });
    }
    let key = variables.identifier().str_identifier();
    variables.value = variables.value_type.coerce(&key, variables.value)?;
    if variables.is_secret() {
      let salt = generate_salt();
      let plain = serde_json::to_string(&ValueEnvelope {
        value: variables.value,
        value_type: variables.value_type,
      })?;
      variables.value = Value::String(self.encryption.encrypt(&plain, &salt)?);
      variables.encryption_method = Some(self.encryption.name().to_string());
      variables.salt = Some(salt);
    } else {
      variables.encryption_method = None;
      variables.salt = None;
    }
    debug!(variable = %key, category = variables.category.as_str(), "saving variable");
    self.storage.save(&variables).await
  }

  async fn delete(&self, id: &VariablesIdentifier) -> Result<bool, VariablesError> {
    self.storage.delete(id).await
  }

  async fn get_variables(&self, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    if let Some(key) = &filter.key
      && let Some(provider) = self.builtins.get(key)
    {
      return provider.get_variables(key, filter).await;
    }
    let mut vars = self.storage.query(filter).await?;
    for var in vars.iter_mut().filter(|v| v.is_secret()) {
      var.value = Value::String(MASKED_VALUE.to_string());
    }
    Ok(vars)
  }
}

/// Lists every distinct variable key in storage.
pub struct AllVariablesProvider {
  storage: Arc<dyn StorageInterface>,
}

impl AllVariablesProvider {
  pub fn new(storage: Arc<dyn StorageInterface>) -> Self {
    Self { storage }
  }
}

#[async_trait]
impl BuiltinVariablesProvider for AllVariablesProvider {
  fn keys(&self) -> Vec<String> {
    vec![BUILTIN_VARIABLES_CORE_VARIABLES.to_string()]
  }

  async fn get_variables(&self, key: &str, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    let query = VariablesFilter {
      key: None,
      ..filter.clone()
    };
    let keys: BTreeSet<String> = self
      .storage
      .query(&query)
      .await?
      .into_iter()
      .map(|v| v.key)
      .collect();
    Ok(
      keys
        .into_iter()
        .map(|k| StorageVariables::new(key, k.clone(), Value::String(k)))
        .collect(),
    )
  }
}

/// Lists secret variables by reference, never by value.
pub struct AllSecretsProvider {
  storage: Arc<dyn StorageInterface>,
}

impl AllSecretsProvider {
  pub fn new(storage: Arc<dyn StorageInterface>) -> Self {
    Self { storage }
  }
}

#[async_trait]
impl BuiltinVariablesProvider for AllSecretsProvider {
  fn keys(&self) -> Vec<String> {
    vec![BUILTIN_VARIABLES_CORE_SECRETS.to_string()]
  }

  async fn get_variables(&self, key: &str, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    let query = VariablesFilter {
      key: None,
      category: Some(VariableCategory::Secret),
      ..filter.clone()
    };
    let secrets = self.storage.query(&query).await?;
    Ok(
      secrets
        .into_iter()
        .map(|secret| {
          let reference = secret.identifier().str_identifier();
          let mut var = StorageVariables::new(key, secret.name.clone(), Value::String(reference));
          var.label = secret.label;
          var.description = secret.description;
          var
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::encryption::AesGcmEncryption;
  use crate::storage::InMemoryStorage;
  use serde_json::json;

  fn provider() -> (Arc<InMemoryStorage>, StorageVariablesProvider) {
    let storage = Arc::new(InMemoryStorage::new());
    let provider = StorageVariablesProvider::new(
      storage.clone(),
      Arc::new(AesGcmEncryption::with_iterations("test-key", 1_000)),
    );
    (storage, provider)
  }

  #[tokio::test]
  async fn test_get_common_variable() {
    let (_, provider) = provider();
    provider
      .save(StorageVariables::new("llm.key", "prod", json!("abc")))
      .await
      .unwrap();
    let value = provider.get("${llm.key:prod@global}", None).await.unwrap();
    assert_eq!(value, json!("abc"));
  }

  #[tokio::test]
  async fn test_missing_variable_uses_default() {
    let (_, provider) = provider();
    let err = provider.get("${llm.key:missing}", None).await.unwrap_err();
    assert!(matches!(err, VariablesError::NotFound { .. }));
    let value = provider.get("${llm.key:missing}", Some(json!("fallback"))).await.unwrap();
    assert_eq!(value, json!("fallback"));
  }

  #[tokio::test]
  async fn test_disabled_variable_not_found() {
    let (_, provider) = provider();
    let mut var = StorageVariables::new("k", "n", json!("v"));
    var.enabled = false;
    provider.save(var).await.unwrap();
    assert!(provider.get("${k:n}", None).await.is_err());
  }

  #[tokio::test]
  async fn test_secret_encrypted_at_rest() {
    let (storage, provider) = provider();
    let var = StorageVariables::new("llm.key", "openai", json!(42))
      .with_value_type(ValueType::Int)
      .with_category(VariableCategory::Secret);
    provider.save(var).await.unwrap();

    let id = VariablesIdentifier::new("llm.key", "openai");
    let stored = storage.load(&id).await.unwrap().unwrap();
    assert_eq!(stored.encryption_method.as_deref(), Some(AesGcmEncryption::NAME));
    assert!(stored.salt.is_some());
    assert!(stored.value.is_string());
    assert_ne!(stored.value, json!("42"));

    assert_eq!(provider.get_value(&id, None).await.unwrap(), json!(42));
  }

  #[tokio::test]
  async fn test_secret_with_wrong_key_fails() {
    let storage = Arc::new(InMemoryStorage::new());
    let writer = StorageVariablesProvider::new(
      storage.clone(),
      Arc::new(AesGcmEncryption::with_iterations("right", 1_000)),
    );
    writer
      .save(StorageVariables::new("k", "n", json!("s")).with_category(VariableCategory::Secret))
      .await
      .unwrap();
    let reader = StorageVariablesProvider::new(
      storage,
      Arc::new(AesGcmEncryption::with_iterations("wrong", 1_000)),
    );
    let err = reader.get("${k:n}", None).await.unwrap_err();
    assert!(matches!(err, VariablesError::Decryption { .. }));
  }

  #[tokio::test]
  async fn test_value_coerced_on_save() {
    let (_, provider) = provider();
    provider
      .save(StorageVariables::new("k", "n", json!("12")).with_value_type(ValueType::Int))
      .await
      .unwrap();
    assert_eq!(provider.get("${k:n}", None).await.unwrap(), json!(12));
  }

  #[tokio::test]
  async fn test_builtin_providers() {
    let (_, provider) = provider();
    provider
      .save(StorageVariables::new("llm.key", "a", json!("1")))
      .await
      .unwrap();
    provider
      .save(StorageVariables::new("db.url", "b", json!("2")).with_category(VariableCategory::Secret))
      .await
      .unwrap();

    let keys = provider
      .get_variables(&VariablesFilter::by_key(BUILTIN_VARIABLES_CORE_VARIABLES))
      .await
      .unwrap();
    let names: Vec<&str> = keys.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["db.url", "llm.key"]);

    let secrets = provider
      .get_variables(&VariablesFilter::by_key(BUILTIN_VARIABLES_CORE_SECRETS))
      .await
      .unwrap();
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].value, json!("${db.url:b@global}"));

    let value = provider.get("${awel.core.variables:llm.key}", None).await.unwrap();
    assert_eq!(value, json!("llm.key"));
  }

  #[tokio::test]
  async fn test_listing_masks_secrets() {
    let (_, provider) = provider();
    provider
      .save(StorageVariables::new("k", "n", json!("s")).with_category(VariableCategory::Secret))
      .await
      .unwrap();
    let vars = provider.get_variables(&VariablesFilter::by_key("k")).await.unwrap();
    assert_eq!(vars[0].value, json!(MASKED_VALUE));
  }

  #[tokio::test]
  async fn test_builtin_keys_read_only() {
    let (_, provider) = provider();
    let err = provider
      .save(StorageVariables::new(BUILTIN_VARIABLES_CORE_SECRETS, "x", json!("y")))
      .await
      .unwrap_err();
    assert!(matches!(err, VariablesError::Unsupported { .. }));
  }
}
