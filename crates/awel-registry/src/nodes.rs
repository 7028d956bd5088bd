use std::sync::Arc;

use async_trait::async_trait;
use awel_variables::{BuiltinVariablesProvider, StorageVariables, VariablesError, VariablesFilter};
use serde_json::Value;

use crate::registry::Registry;

pub const BUILTIN_VARIABLES_CORE_FLOW_NODES: &str = "awel.core.flow.nodes";

/// Lists the registered operator and resource types as variables, so a
/// parameter can offer "pick a node type" options.
pub struct FlowNodesVariablesProvider {
  registry: Arc<Registry>,
}

impl FlowNodesVariablesProvider {
  pub fn new(registry: Arc<Registry>) -> Self {
    Self { registry }
  }
}

#[async_trait]
impl BuiltinVariablesProvider for FlowNodesVariablesProvider {
  fn keys(&self) -> Vec<String> {
    vec![BUILTIN_VARIABLES_CORE_FLOW_NODES.to_string()]
  }

  async fn get_variables(&self, key: &str, _filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    let operators = self
      .registry
      .operator_metadata()
      .into_iter()
      .map(|m| (m.type_cls, m.label, m.description));
    let resources = self
      .registry
      .resource_metadata()
      .into_iter()
      .map(|m| (m.type_cls, m.label, m.description));
    Ok(
      operators
        .chain(resources)
        .map(|(type_cls, label, description)| {
          let mut var = StorageVariables::new(key, type_cls.clone(), Value::String(type_cls));
          var.label = label;
          var.description = description;
          var
        })
        .collect(),
    )
  }
}
