use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A variable declared at flow level.
///
/// Materialized flows inject these as the DAG's default variables; they are
/// consulted before the global variables provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowVariables {
  pub key: String,
  pub name: String,
  #[serde(default)]
  pub label: String,
  pub value: Value,
  #[serde(default = "default_value_type")]
  pub value_type: String,
  #[serde(default = "default_category")]
  pub category: String,
  #[serde(default = "default_scope")]
  pub scope: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scope_key: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

fn default_value_type() -> String {
  "str".to_string()
}

fn default_category() -> String {
  "common".to_string()
}

fn default_scope() -> String {
  "global".to_string()
}

impl FlowVariables {
  pub fn new(key: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
    let name = name.into();
    Self {
      key: key.into(),
      label: name.clone(),
      name,
      value,
      value_type: default_value_type(),
      category: default_category(),
      scope: default_scope(),
      scope_key: None,
      description: None,
    }
  }

  pub fn with_scope(mut self, scope: impl Into<String>, scope_key: Option<String>) -> Self {
    self.scope = scope.into();
    self.scope_key = scope_key;
    self
  }
}
