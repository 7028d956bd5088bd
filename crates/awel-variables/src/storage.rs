use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::VariablesError;
use crate::identifier::{VARIABLES_SCOPE_GLOBAL, VariablesIdentifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
  #[default]
  Str,
  Int,
  Float,
  Bool,
}

impl ValueType {
  pub fn as_str(self) -> &'static str {
    match self {
      ValueType::Str => "str",
      ValueType::Int => "int",
      ValueType::Float => "float",
      ValueType::Bool => "bool",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "str" => Some(ValueType::Str),
      "int" => Some(ValueType::Int),
      "float" => Some(ValueType::Float),
      "bool" => Some(ValueType::Bool),
      _ => None,
    }
  }

  /// Coerce `value` to this type. Strings are parsed, numbers and booleans
  /// stringified as needed.
  pub fn coerce(self, key: &str, value: Value) -> Result<Value, VariablesError> {
    let fail = |message: &str| VariablesError::InvalidValue {
      key: key.to_string(),
      value_type: self.as_str().to_string(),
      message: message.to_string(),
    };
    match (self, value) {
      (ValueType::Str, Value::String(s)) => Ok(Value::String(s)),
      (ValueType::Str, Value::Null) => Err(fail("null")),
      (ValueType::Str, other) => Ok(Value::String(other.to_string())),
      (ValueType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
      (ValueType::Int, Value::String(s)) => s
        .trim()
        .parse::<i64>()
        .map(Value::from)
        .map_err(|e| fail(&e.to_string())),
      (ValueType::Float, Value::Number(n)) => Ok(Value::Number(n)),
      (ValueType::Float, Value::String(s)) => s
        .trim()
        .parse::<f64>()
        .map(Value::from)
        .map_err(|e| fail(&e.to_string())),
      (ValueType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
      (ValueType::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Value::Bool(true)),
        "false" | "0" | "no" => Ok(Value::Bool(false)),
        _ => Err(fail("expected true or false")),
      },
      (_, other) => Err(fail(&format!("unexpected {other}"))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableCategory {
  #[default]
  Common,
  /// Encrypted at rest.
  Secret,
}

impl VariableCategory {
  pub fn as_str(self) -> &'static str {
    match self {
      VariableCategory::Common => "common",
      VariableCategory::Secret => "secret",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "common" => Some(VariableCategory::Common),
      "secret" => Some(VariableCategory::Secret),
      _ => None,
    }
  }
}

/// A stored variable.
///
/// For secrets `value` holds the ciphertext as a string once saved through a
/// provider; `encryption_method` and `salt` describe how to decrypt it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageVariables {
  pub key: String,
  pub name: String,
  #[serde(default)]
  pub label: String,
  pub value: Value,
  #[serde(default)]
  pub value_type: ValueType,
  #[serde(default)]
  pub category: VariableCategory,
  #[serde(default = "default_scope")]
  pub scope: String,
  #[serde(default)]
  pub scope_key: Option<String>,
  #[serde(default)]
  pub sys_code: Option<String>,
  #[serde(default)]
  pub user_name: Option<String>,
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  #[serde(default)]
  pub encryption_method: Option<String>,
  #[serde(default)]
  pub salt: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}

fn default_scope() -> String {
  VARIABLES_SCOPE_GLOBAL.to_string()
}

fn default_enabled() -> bool {
  true
}

impl StorageVariables {
  pub fn new(key: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
    let name = name.into();
    Self {
      key: key.into(),
      label: name.clone(),
      name,
      value,
      value_type: ValueType::Str,
      category: VariableCategory::Common,
      scope: default_scope(),
      scope_key: None,
      sys_code: None,
      user_name: None,
      enabled: true,
      encryption_method: None,
      salt: None,
      description: None,
    }
  }

  /// Build a variable at the location described by `id`.
  pub fn from_identifier(id: &VariablesIdentifier, value: Value) -> Self {
    let mut var = Self::new(id.key.clone(), id.name.clone(), value);
    var.scope = id.scope.clone();
    var.scope_key = id.scope_key.clone();
    var.sys_code = id.sys_code.clone();
    var.user_name = id.user_name.clone();
    var
  }

  pub fn with_value_type(mut self, value_type: ValueType) -> Self {
    self.value_type = value_type;
    self
  }

  pub fn with_category(mut self, category: VariableCategory) -> Self {
    self.category = category;
    self
  }

  pub fn with_scope(mut self, scope: impl Into<String>, scope_key: Option<String>) -> Self {
    self.scope = scope.into();
    self.scope_key = scope_key;
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn identifier(&self) -> VariablesIdentifier {
    VariablesIdentifier {
      key: self.key.clone(),
      name: self.name.clone(),
      scope: self.scope.clone(),
      scope_key: self.scope_key.clone(),
      sys_code: self.sys_code.clone(),
      user_name: self.user_name.clone(),
    }
  }

  pub fn is_secret(&self) -> bool {
    self.category == VariableCategory::Secret
  }

  pub fn is_encrypted(&self) -> bool {
    self.encryption_method.is_some()
  }
}

/// Criteria for listing variables. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariablesFilter {
  pub key: Option<String>,
  pub scope: Option<String>,
  pub scope_key: Option<String>,
  pub sys_code: Option<String>,
  pub user_name: Option<String>,
  pub category: Option<VariableCategory>,
  pub enabled_only: bool,
}

impl VariablesFilter {
  pub fn by_key(key: impl Into<String>) -> Self {
    Self {
      key: Some(key.into()),
      ..Default::default()
    }
  }

  pub fn matches(&self, var: &StorageVariables) -> bool {
    fn eq(want: &Option<String>, have: &str) -> bool {
      want.as_deref().is_none_or(|w| w == have)
    }
    fn eq_opt(want: &Option<String>, have: &Option<String>) -> bool {
      want.is_none() || want == have
    }
    eq(&self.key, &var.key)
      && eq(&self.scope, &var.scope)
      && eq_opt(&self.scope_key, &var.scope_key)
      && eq_opt(&self.sys_code, &var.sys_code)
      && eq_opt(&self.user_name, &var.user_name)
      && self.category.is_none_or(|c| c == var.category)
      && (!self.enabled_only || var.enabled)
  }
}

/// Persistence for variables, keyed by [`VariablesIdentifier`].
#[async_trait]
pub trait StorageInterface: Send + Sync {
  async fn load(&self, id: &VariablesIdentifier) -> Result<Option<StorageVariables>, VariablesError>;

  /// Insert or replace the variable at its identifier.
  async fn save(&self, variables: &StorageVariables) -> Result<(), VariablesError>;

  /// Returns true if something was deleted.
  async fn delete(&self, id: &VariablesIdentifier) -> Result<bool, VariablesError>;

  async fn query(&self, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError>;
}

/// Process-local storage.
#[derive(Default)]
pub struct InMemoryStorage {
  items: RwLock<BTreeMap<String, StorageVariables>>,
}

impl InMemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StorageInterface for InMemoryStorage {
  async fn load(&self, id: &VariablesIdentifier) -> Result<Option<StorageVariables>, VariablesError> {
    let items = self.items.read().unwrap_or_else(|e| e.into_inner());
    Ok(items.get(&id.str_identifier()).cloned())
  }

  async fn save(&self, variables: &StorageVariables) -> Result<(), VariablesError> {
    let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
    items.insert(variables.identifier().str_identifier(), variables.clone());
    Ok(())
  }

  async fn delete(&self, id: &VariablesIdentifier) -> Result<bool, VariablesError> {
    let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
    Ok(items.remove(&id.str_identifier()).is_some())
  }

  async fn query(&self, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    let items = self.items.read().unwrap_or_else(|e| e.into_inner());
    Ok(items.values().filter(|v| filter.matches(v)).cloned().collect())
  }
}
