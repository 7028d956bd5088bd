use std::sync::Arc;

use async_trait::async_trait;
use awel_dag::operator::{placeholders, single_input};
use awel_dag::{DagContext, Operator, OperatorError, OperatorKind, Param};
use awel_task::{TaskContext, TaskError};
use awel_variables::VariablesPlaceHolder;
use minijinja::Environment;
use serde_json::{Map, Value, json};

use super::resources::{PromptTemplate, TemplateVariables};

/// Render `template` with `input` as context. Objects expose their fields
/// directly; any other value is available as `input`.
pub fn render_template(template: &str, input: &Value) -> Result<String, OperatorError> {
  let context = match input {
    Value::Object(_) => input.clone(),
    other => json!({ "input": other }),
  };
  Environment::new()
    .render_str(template, &context)
    .map_err(|e| OperatorError::failed(format!("template render failed: {e}")))
}

/// Look up `field` in an object; a leading `/` makes it a JSON pointer.
/// Missing fields yield null.
pub fn extract_field(value: &Value, field: &str) -> Value {
  let found = if field.starts_with('/') {
    value.pointer(field)
  } else {
    value.get(field)
  };
  found.cloned().unwrap_or(Value::Null)
}

pub struct TemplateOperator {
  template: Param,
}

impl TemplateOperator {
  pub fn new(template: Param) -> Self {
    Self { template }
  }
}

#[async_trait]
impl Operator for TemplateOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Map
  }

  fn variable_placeholders(&self) -> Vec<VariablesPlaceHolder> {
    placeholders([&self.template])
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let template = match self.template.resolve(task)? {
      Value::String(s) => s,
      other => return Err(OperatorError::failed(format!("template must be a string, got {other}"))),
    };
    let output = single_input(task)?.map(move |input| {
      render_template(&template, &input)
        .map(Value::String)
        .map_err(TaskError::from)
    })?;
    task.set_task_output(output);
    Ok(())
  }
}

/// Formats a [`PromptTemplate`] with the input's fields layered over the
/// optional default [`TemplateVariables`].
pub struct PromptOperator {
  prompt: Arc<PromptTemplate>,
  variables: Option<Arc<TemplateVariables>>,
}

impl PromptOperator {
  pub fn new(prompt: Arc<PromptTemplate>, variables: Option<Arc<TemplateVariables>>) -> Self {
    Self { prompt, variables }
  }
}

#[async_trait]
impl Operator for PromptOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Map
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let prompt = Arc::clone(&self.prompt);
    let defaults: Map<String, Value> = self.variables.as_ref().map(|v| v.values().clone()).unwrap_or_default();
    let output = single_input(task)?.map(move |input| {
      let mut values = defaults.clone();
      match input {
        Value::Object(fields) => values.extend(fields),
        other => {
          values.insert("input".to_string(), other);
        }
      }
      prompt.format(&values).map(Value::String).map_err(TaskError::from)
    })?;
    task.set_task_output(output);
    Ok(())
  }
}
