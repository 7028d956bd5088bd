//! Dynamic parameter options.

use std::sync::Arc;

use async_trait::async_trait;
use awel_config::{OptionValue, RefreshOptionRequest};
use awel_variables::{VariablesFilter, VariablesProvider};
use serde_json::Value;

use crate::error::RegistryError;

/// Computes the selectable values of a parameter on request.
#[async_trait]
pub trait OptionsProvider: Send + Sync {
  async fn refresh(&self, request: &RefreshOptionRequest) -> Result<Vec<OptionValue>, RegistryError>;
}

/// A fixed list.
pub struct StaticOptions(pub Vec<OptionValue>);

#[async_trait]
impl OptionsProvider for StaticOptions {
  async fn refresh(&self, _request: &RefreshOptionRequest) -> Result<Vec<OptionValue>, RegistryError> {
    Ok(self.0.clone())
  }
}

/// Options computed by a closure, which sees the request's dependency
/// values for cascading selections.
pub struct FunctionOptions<F>(pub F);

#[async_trait]
impl<F> OptionsProvider for FunctionOptions<F>
where
  F: Fn(&RefreshOptionRequest) -> Vec<OptionValue> + Send + Sync,
{
  async fn refresh(&self, request: &RefreshOptionRequest) -> Result<Vec<OptionValue>, RegistryError> {
    Ok((self.0)(request))
  }
}

/// The variables stored under one key. Each option's value is the
/// variable's reference string, so selecting it configures a placeholder.
pub struct VariablesOptions {
  provider: Arc<dyn VariablesProvider>,
  key: String,
  scope: Option<String>,
}

impl VariablesOptions {
  pub fn new(provider: Arc<dyn VariablesProvider>, key: impl Into<String>) -> Self {
    Self {
      provider,
      key: key.into(),
      scope: None,
    }
  }

  pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
    self.scope = Some(scope.into());
    self
  }
}

#[async_trait]
impl OptionsProvider for VariablesOptions {
  async fn refresh(&self, request: &RefreshOptionRequest) -> Result<Vec<OptionValue>, RegistryError> {
    let filter = VariablesFilter {
      key: Some(self.key.clone()),
      scope: self.scope.clone(),
      sys_code: request.sys_code.clone(),
      user_name: request.user_name.clone(),
      enabled_only: true,
      ..Default::default()
    };
    let variables = self.provider.get_variables(&filter).await?;
    Ok(
      variables
        .into_iter()
        .map(|var| {
          let reference = var.identifier().str_identifier();
          OptionValue::new(var.label, var.name, Value::String(reference))
        })
        .collect(),
    )
  }
}
