use awel_dag::OperatorError;
use serde_json::{Map, Value};

use super::operators::render_template;
use crate::error::RegistryError;
use crate::params::RunnableParameters;

/// A template plus the variables it requires.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
  pub template: String,
  pub input_variables: Vec<String>,
}

impl PromptTemplate {
  pub fn new(template: impl Into<String>, input_variables: Vec<String>) -> Self {
    Self {
      template: template.into(),
      input_variables,
    }
  }

  pub(crate) fn from_params(params: &RunnableParameters) -> Result<Self, RegistryError> {
    let template = params.require_str("template")?.to_string();
    let input_variables = match params.value("input_variables") {
      None | Some(Value::Null) => Vec::new(),
      Some(Value::Array(items)) => items
        .iter()
        .map(|item| {
          item
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RegistryError::invalid("input_variables", "expected a list of strings"))
        })
        .collect::<Result<_, _>>()?,
      Some(_) => return Err(RegistryError::invalid("input_variables", "expected a list of strings")),
    };
    Ok(Self::new(template, input_variables))
  }

  pub fn format(&self, values: &Map<String, Value>) -> Result<String, OperatorError> {
    if let Some(missing) = self.input_variables.iter().find(|name| !values.contains_key(*name)) {
      return Err(OperatorError::failed(format!("missing prompt variable '{missing}'")));
    }
    render_template(&self.template, &Value::Object(values.clone()))
  }
}

/// Default values for template rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVariables(Map<String, Value>);

impl TemplateVariables {
  pub fn new(values: Map<String, Value>) -> Self {
    Self(values)
  }

  pub fn values(&self) -> &Map<String, Value> {
    &self.0
  }

  pub(crate) fn from_params(params: &RunnableParameters) -> Result<Self, RegistryError> {
    match params.value("variables") {
      None | Some(Value::Null) => Ok(Self::default()),
      Some(Value::Object(values)) => Ok(Self(values.clone())),
      Some(_) => Err(RegistryError::invalid("variables", "expected an object")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_prompt_requires_declared_variables() {
    let prompt = PromptTemplate::new("{{ greeting }}, {{ name }}", vec!["name".into()]);
    let mut values = Map::new();
    values.insert("greeting".into(), json!("Hello"));
    assert!(prompt.format(&values).is_err());
    values.insert("name".into(), json!("Ada"));
    assert_eq!(prompt.format(&values).unwrap(), "Hello, Ada");
  }
}
