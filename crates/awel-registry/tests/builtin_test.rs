use std::collections::HashMap;
use std::sync::Arc;

use awel_config::Parameter;
use awel_dag::{DagBuilder, InputOperator, WorkflowRunner};
use awel_registry::builtin::{FIELD_EXTRACT, PROMPT, PROMPT_TEMPLATE, TEMPLATE, TEMPLATE_VARIABLES, TO_STRING};
use awel_registry::{Registry, RegistryError};
use serde_json::json;

#[tokio::test]
async fn test_prompt_operator_with_resources() {
  let registry = Registry::with_builtins();

  let prompt = registry
    .build_resource(
      PROMPT_TEMPLATE,
      &[
        Parameter::new("Template", "template", "str").with_value(json!("{{ greeting }}, {{ name }}!")),
        Parameter::new("Input Variables", "input_variables", "list").with_value(json!(["name"])),
      ],
      &HashMap::new(),
    )
    .unwrap();
  let variables = registry
    .build_resource(
      TEMPLATE_VARIABLES,
      &[Parameter::new("Variables", "variables", "dict").with_value(json!({"greeting": "Hello"}))],
      &HashMap::new(),
    )
    .unwrap();
  let resources = HashMap::from([("prompt".to_string(), prompt), ("variables".to_string(), variables)]);
  let operator = registry.build_operator(PROMPT, &[], &resources).unwrap();

  let mut builder = DagBuilder::new("prompt");
  let input = builder.add_named("input", InputOperator::from_value(json!({"name": "Ada"})));
  let prompt = builder.add_node("prompt", Some("prompt".into()), operator);
  builder.connect(&input, &prompt);
  let dag = Arc::new(builder.build().unwrap());

  let output = WorkflowRunner::new().call(&dag, "prompt", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!("Hello, Ada!")));
}

#[tokio::test]
async fn test_mappers_and_template_chain() {
  let registry = Registry::with_builtins();
  let field = registry
    .build_operator(
      FIELD_EXTRACT,
      &[Parameter::new("Field", "field", "str").with_value(json!("/user/age"))],
      &HashMap::new(),
    )
    .unwrap();
  let to_string = registry.build_operator(TO_STRING, &[], &HashMap::new()).unwrap();
  let template = registry
    .build_operator(
      TEMPLATE,
      &[Parameter::new("Template", "template", "str").with_value(json!("age: {{ input }}"))],
      &HashMap::new(),
    )
    .unwrap();

  let mut builder = DagBuilder::new("mappers");
  let input = builder.add_named("input", InputOperator::from_value(json!({"user": {"age": 36}})));
  let field = builder.add_node("field", None, field);
  let to_string = builder.add_node("to_string", None, to_string);
  let template = builder.add_node("template", None, template);
  builder.chain(&[&input, &field, &to_string, &template]);
  let dag = Arc::new(builder.build().unwrap());

  let output = WorkflowRunner::new().call(&dag, "template", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!("age: 36")));
}

#[test]
fn test_prompt_without_template_resource_fails() {
  let registry = Registry::with_builtins();
  let err = registry.build_operator(PROMPT, &[], &HashMap::new()).err().unwrap();
  assert!(matches!(err, RegistryError::MissingParameter { ref name } if name == "prompt"));
}
