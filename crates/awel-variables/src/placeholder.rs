use async_trait::async_trait;
use serde_json::Value;

use crate::error::VariablesError;
use crate::identifier::{VARIABLES_SCOPE_FLOW_PRIVATE, VariablesIdentifier};
use crate::provider::VariablesProvider;
use crate::storage::{StorageVariables, VariablesFilter};

/// Stand-in for an operator attribute whose configured value is a variable
/// reference; swapped for the real value right before the operator runs.
#[derive(Debug, Clone, PartialEq)]
pub struct VariablesPlaceHolder {
  pub param_name: String,
  pub full_key: String,
  pub default: Option<Value>,
}

impl VariablesPlaceHolder {
  pub fn new(param_name: impl Into<String>, full_key: impl Into<String>, default: Option<Value>) -> Self {
    Self {
      param_name: param_name.into(),
      full_key: full_key.into(),
      default,
    }
  }

  pub fn identifier(&self) -> Result<VariablesIdentifier, VariablesError> {
    VariablesIdentifier::from_str_identifier(&self.full_key)
  }

  /// Resolve against a single provider.
  pub async fn parse(&self, provider: &dyn VariablesProvider) -> Result<Value, VariablesError> {
    provider.get(&self.full_key, self.default.clone()).await
  }
}

/// Default variables attached to one DAG, consulted before the global
/// provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DagVariables {
  items: Vec<StorageVariables>,
}

impl DagVariables {
  pub fn new(items: Vec<StorageVariables>) -> Self {
    Self { items }
  }

  pub fn items(&self) -> &[StorageVariables] {
    &self.items
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn push(&mut self, item: StorageVariables) {
    self.items.push(item);
  }

  /// Combine two sets; on identifier clashes `self` wins.
  pub fn merge(&self, other: &DagVariables) -> DagVariables {
    let mut items = self.items.clone();
    for item in &other.items {
      let id = item.identifier();
      if !items.iter().any(|existing| existing.identifier() == id) {
        items.push(item.clone());
      }
    }
    DagVariables { items }
  }

  /// Pin flow-private variables without a scope key to `dag_id`.
  pub fn scoped_to(mut self, dag_id: &str) -> DagVariables {
    for item in &mut self.items {
      if item.scope == VARIABLES_SCOPE_FLOW_PRIVATE && item.scope_key.is_none() {
        item.scope_key = Some(dag_id.to_string());
      }
    }
    self
  }

  pub fn lookup(&self, id: &VariablesIdentifier) -> Option<&StorageVariables> {
    self
      .items
      .iter()
      .find(|item| item.enabled && item.identifier() == *id)
  }
}

#[async_trait]
impl VariablesProvider for DagVariables {
  async fn get_value(&self, id: &VariablesIdentifier, default: Option<Value>) -> Result<Value, VariablesError> {
    match (self.lookup(id), default) {
      (Some(item), _) => Ok(item.value.clone()),
      (None, Some(default)) => Ok(default),
      (None, None) => Err(VariablesError::NotFound {
        key: id.str_identifier(),
      }),
    }
  }

  async fn save(&self, _variables: StorageVariables) -> Result<(), VariablesError> {
    Err(VariablesError::Unsupported {
      message: "DAG variables are read-only".to_string(),
    })
  }

  async fn delete(&self, _id: &VariablesIdentifier) -> Result<bool, VariablesError> {
    Err(VariablesError::Unsupported {
      message: "DAG variables are read-only".to_string(),
    })
  }

  async fn get_variables(&self, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    Ok(self.items.iter().filter(|v| filter.matches(v)).cloned().collect())
  }
}
