//! Operator and resource metadata.
//!
//! Every registered operator declares a [`ViewMetadata`], every registered
//! resource a [`ResourceMetadata`]. The same types are embedded in flow
//! documents, where each parameter additionally carries the configured
//! `value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
  #[default]
  Map,
  Reduce,
  Join,
  Branch,
  Input,
  Trigger,
  Streamify,
  Unstreamify,
  TransformStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
  /// A shared instance built once per DAG.
  #[default]
  Instance,
  /// The resource type itself, handed to the consumer uninstantiated.
  Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterCategory {
  #[default]
  Common,
  Resource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
  pub label: String,
  pub name: String,
  pub value: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub children: Option<Vec<OptionValue>>,
}

impl OptionValue {
  pub fn new(label: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
    Self {
      label: label.into(),
      name: name.into(),
      value,
      children: None,
    }
  }
}

/// Where a parameter's selectable values come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterOptions {
  Static(Vec<OptionValue>),
  /// Resolved at request time by the options provider registered under `provider`.
  Dynamic {
    provider: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends: Vec<String>,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
  pub label: String,
  pub name: String,
  pub type_name: String,
  /// Stable type id; for resource parameters, the expected resource type.
  pub type_cls: String,
  #[serde(default)]
  pub category: ParameterCategory,
  #[serde(default)]
  pub optional: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub placeholder: Option<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<ParameterOptions>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resource_type: Option<ResourceType>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub alias: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ui: Option<Value>,
  /// Configured value. For resource parameters this is the id of the
  /// resource node wired into this slot.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<Value>,
}

impl Parameter {
  pub fn new(label: impl Into<String>, name: impl Into<String>, type_name: impl Into<String>) -> Self {
    let type_name = type_name.into();
    Self {
      label: label.into(),
      name: name.into(),
      type_cls: type_name.clone(),
      type_name,
      category: ParameterCategory::Common,
      optional: false,
      default: None,
      placeholder: None,
      description: None,
      options: None,
      resource_type: None,
      alias: Vec::new(),
      ui: None,
      value: None,
    }
  }

  /// A parameter that takes a resource of the given type.
  pub fn resource(label: impl Into<String>, name: impl Into<String>, type_cls: impl Into<String>) -> Self {
    let type_cls = type_cls.into();
    let mut param = Self::new(label, name, type_cls.clone());
    param.type_cls = type_cls;
    param.category = ParameterCategory::Resource;
    param.resource_type = Some(ResourceType::Instance);
    param
  }

  pub fn optional(mut self, default: Option<Value>) -> Self {
    self.optional = true;
    self.default = default;
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_options(mut self, options: ParameterOptions) -> Self {
    self.options = Some(options);
    self
  }

  pub fn with_value(mut self, value: Value) -> Self {
    self.value = Some(value);
    self
  }

  pub fn is_resource(&self) -> bool {
    self.category == ParameterCategory::Resource
  }

  /// The configured value, falling back to the declared default.
  pub fn effective_value(&self) -> Option<&Value> {
    self.value.as_ref().or(self.default.as_ref())
  }

  /// True when `name` matches this parameter's name or one of its aliases.
  pub fn answers_to(&self, name: &str) -> bool {
    self.name == name || self.alias.iter().any(|a| a == name)
  }
}

/// An input or output pin of an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoField {
  pub label: String,
  pub name: String,
  pub type_name: String,
  #[serde(default)]
  pub type_cls: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub is_list: bool,
}

impl IoField {
  pub fn new(label: impl Into<String>, name: impl Into<String>, type_name: impl Into<String>) -> Self {
    let type_name = type_name.into();
    Self {
      label: label.into(),
      name: name.into(),
      type_cls: type_name.clone(),
      type_name,
      description: None,
      is_list: false,
    }
  }

  pub fn list(mut self) -> Self {
    self.is_list = true;
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMetadata {
  pub label: String,
  pub name: String,
  pub category: String,
  /// Stable id the operator is registered under.
  pub type_cls: String,
  #[serde(default)]
  pub type_name: String,
  #[serde(default)]
  pub operator_type: OperatorType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub parameters: Vec<Parameter>,
  #[serde(default)]
  pub inputs: Vec<IoField>,
  #[serde(default)]
  pub outputs: Vec<IoField>,
  #[serde(default = "default_version")]
  pub version: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
  pub label: String,
  pub name: String,
  pub category: String,
  /// Stable id the resource is registered under.
  pub type_cls: String,
  #[serde(default)]
  pub type_name: String,
  #[serde(default)]
  pub resource_type: ResourceType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub parameters: Vec<Parameter>,
  /// Additional type ids this resource can be wired into.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub parent_cls: Vec<String>,
  #[serde(default = "default_version")]
  pub version: String,
}

fn default_version() -> String {
  "v1".to_string()
}

impl ViewMetadata {
  pub fn new(
    label: impl Into<String>,
    name: impl Into<String>,
    category: impl Into<String>,
    type_cls: impl Into<String>,
    operator_type: OperatorType,
  ) -> Self {
    let type_cls = type_cls.into();
    Self {
      label: label.into(),
      name: name.into(),
      category: category.into(),
      type_name: type_cls.rsplit("::").next().unwrap_or_default().to_string(),
      type_cls,
      operator_type,
      description: None,
      parameters: Vec::new(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      version: default_version(),
      tags: Vec::new(),
    }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_parameter(mut self, parameter: Parameter) -> Self {
    self.parameters.push(parameter);
    self
  }

  pub fn with_input(mut self, input: IoField) -> Self {
    self.inputs.push(input);
    self
  }

  pub fn with_output(mut self, output: IoField) -> Self {
    self.outputs.push(output);
    self
  }

  pub fn get_parameter(&self, name: &str) -> Option<&Parameter> {
    self.parameters.iter().find(|p| p.answers_to(name))
  }

  pub fn get_parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
    self.parameters.iter_mut().find(|p| p.answers_to(name))
  }
}

impl ResourceMetadata {
  pub fn new(
    label: impl Into<String>,
    name: impl Into<String>,
    category: impl Into<String>,
    type_cls: impl Into<String>,
  ) -> Self {
    let type_cls = type_cls.into();
    Self {
      label: label.into(),
      name: name.into(),
      category: category.into(),
      type_name: type_cls.rsplit("::").next().unwrap_or_default().to_string(),
      type_cls,
      resource_type: ResourceType::Instance,
      description: None,
      parameters: Vec::new(),
      parent_cls: Vec::new(),
      version: default_version(),
    }
  }

  pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
    self.resource_type = resource_type;
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  pub fn with_parameter(mut self, parameter: Parameter) -> Self {
    self.parameters.push(parameter);
    self
  }

  pub fn with_parent_cls(mut self, parent: impl Into<String>) -> Self {
    self.parent_cls.push(parent.into());
    self
  }

  pub fn get_parameter(&self, name: &str) -> Option<&Parameter> {
    self.parameters.iter().find(|p| p.answers_to(name))
  }

  /// True when a value of this resource may fill a slot expecting `type_cls`.
  pub fn satisfies(&self, type_cls: &str) -> bool {
    self.type_cls == type_cls || self.parent_cls.iter().any(|p| p == type_cls)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOptionDependency {
  pub name: String,
  #[serde(default)]
  pub value: Option<Value>,
}

/// Request to recompute a parameter's dynamic options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOptionRequest {
  /// Id of the options provider to invoke.
  pub provider: String,
  /// Name of the parameter being refreshed.
  pub name: String,
  /// Current values of the parameters this one depends on.
  #[serde(default)]
  pub depends: Vec<RefreshOptionDependency>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sys_code: Option<String>,
}

impl RefreshOptionRequest {
  pub fn dependency(&self, name: &str) -> Option<&Value> {
    self
      .depends
      .iter()
      .find(|d| d.name == name)
      .and_then(|d| d.value.as_ref())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parameter_options_untagged() {
    let stat: ParameterOptions = serde_json::from_value(json!([
      {"label": "A", "name": "a", "value": 1}
    ]))
    .unwrap();
    assert!(matches!(stat, ParameterOptions::Static(ref v) if v.len() == 1));

    let dynamic: ParameterOptions =
      serde_json::from_value(json!({"provider": "awel.options.models", "depends": ["provider"]})).unwrap();
    assert_eq!(
      dynamic,
      ParameterOptions::Dynamic {
        provider: "awel.options.models".into(),
        depends: vec!["provider".into()],
      }
    );
  }

  #[test]
  fn test_parameter_alias_lookup() {
    let mut param = Parameter::new("Key", "api_key", "str");
    param.alias.push("key".into());
    let meta = ViewMetadata::new("Op", "op", "common", "awel::test::Op", OperatorType::Map)
      .with_parameter(param);
    assert!(meta.get_parameter("key").is_some());
    assert!(meta.get_parameter("api_key").is_some());
    assert!(meta.get_parameter("other").is_none());
  }

  #[test]
  fn test_effective_value_prefers_configured() {
    let param = Parameter::new("N", "n", "int")
      .optional(Some(json!(1)))
      .with_value(json!(5));
    assert_eq!(param.effective_value(), Some(&json!(5)));
  }

  #[test]
  fn test_resource_satisfies_parent() {
    let meta = ResourceMetadata::new("R", "r", "common", "awel::test::Child").with_parent_cls("awel::test::Base");
    assert!(meta.satisfies("awel::test::Child"));
    assert!(meta.satisfies("awel::test::Base"));
    assert!(!meta.satisfies("awel::test::Other"));
  }

  #[test]
  fn test_type_name_derived_from_type_cls() {
    let meta = ViewMetadata::new("Op", "op", "common", "awel::builtin::TemplateOperator", OperatorType::Map);
    assert_eq!(meta.type_name, "TemplateOperator");
  }
}
