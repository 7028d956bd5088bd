//! Operators and resources every registry starts with, so flow documents
//! can be materialized without user code.

mod operators;
mod resources;

pub use operators::{PromptOperator, TemplateOperator, extract_field, render_template};
pub use resources::{PromptTemplate, TemplateVariables};

use awel_config::{IoField, OperatorType, Parameter, ResourceMetadata, ViewMetadata};
use awel_dag::{BranchJoinOperator, InputOperator, MapOperator, StreamifyOperator, UnstreamifyOperator};
use serde_json::{Value, json};
use tracing::warn;

use crate::registry::{OperatorRegistration, Registry, ResourceRegistration};

pub const CONSTANT_INPUT: &str = "awel::operators::ConstantInput";
pub const TEMPLATE: &str = "awel::operators::Template";
pub const ARRAY_STREAMIFY: &str = "awel::operators::ArrayStreamify";
pub const COLLECT: &str = "awel::operators::Collect";
pub const BRANCH_JOIN: &str = "awel::operators::BranchJoin";
pub const PROMPT: &str = "awel::operators::Prompt";
pub const FIELD_EXTRACT: &str = "awel::mappers::FieldExtract";
pub const TO_STRING: &str = "awel::mappers::ToString";
pub const PROMPT_TEMPLATE: &str = "awel::resources::PromptTemplate";
pub const TEMPLATE_VARIABLES: &str = "awel::resources::TemplateVariables";

const CATEGORY_COMMON: &str = "common";
const CATEGORY_MAPPER: &str = "mapper";
const CATEGORY_PROMPT: &str = "prompt";

fn any_field(label: &str, name: &str) -> IoField {
  IoField::new(label, name, "any")
}

pub(crate) fn register_builtins(registry: &Registry) {
  let operators = [
    OperatorRegistration::new(
      ViewMetadata::new("Constant", "constant_input", CATEGORY_COMMON, CONSTANT_INPUT, OperatorType::Input)
        .with_description("Emits a fixed value.")
        .with_parameter(Parameter::new("Value", "value", "any"))
        .with_output(any_field("Value", "value")),
      |params| Ok(InputOperator::from_value(params.require_value("value")?.clone())),
    ),
    OperatorRegistration::new(
      ViewMetadata::new("Template", "template", CATEGORY_COMMON, TEMPLATE, OperatorType::Map)
        .with_description("Renders a template against the input. Object inputs expose their fields, anything else is `input`.")
        .with_parameter(Parameter::new("Template", "template", "str"))
        .with_input(any_field("Input", "input"))
        .with_output(IoField::new("Text", "text", "str")),
      |params| Ok(TemplateOperator::new(params.require_param("template")?)),
    ),
    OperatorRegistration::new(
      ViewMetadata::new(
        "Array Streamify",
        "array_streamify",
        CATEGORY_COMMON,
        ARRAY_STREAMIFY,
        OperatorType::Streamify,
      )
      .with_input(any_field("Items", "items").list())
      .with_output(any_field("Item", "item")),
      |_| Ok(StreamifyOperator::array()),
    ),
    OperatorRegistration::new(
      ViewMetadata::new("Collect", "collect", CATEGORY_COMMON, COLLECT, OperatorType::Unstreamify)
        .with_input(any_field("Item", "item"))
        .with_output(any_field("Items", "items").list()),
      |_| Ok(UnstreamifyOperator::new()),
    ),
    OperatorRegistration::new(
      ViewMetadata::new("Branch Join", "branch_join", CATEGORY_COMMON, BRANCH_JOIN, OperatorType::Join)
        .with_description("Forwards the output of whichever branch ran.")
        .with_input(any_field("Branches", "branches").list())
        .with_output(any_field("Output", "output")),
      |_| Ok(BranchJoinOperator::new()),
    ),
    OperatorRegistration::new(
      ViewMetadata::new("Prompt", "prompt", CATEGORY_PROMPT, PROMPT, OperatorType::Map)
        .with_parameter(Parameter::resource("Prompt Template", "prompt", PROMPT_TEMPLATE))
        .with_parameter(Parameter::resource("Variables", "variables", TEMPLATE_VARIABLES).optional(None))
        .with_input(IoField::new("Values", "values", "dict"))
        .with_output(IoField::new("Prompt", "prompt", "str")),
      |params| {
        Ok(PromptOperator::new(
          params.require_resource::<PromptTemplate>("prompt")?,
          params.optional_resource::<TemplateVariables>("variables")?,
        ))
      },
    ),
    OperatorRegistration::new(
      ViewMetadata::new("Field Extract", "field_extract", CATEGORY_MAPPER, FIELD_EXTRACT, OperatorType::Map)
        .with_description("Picks one field; a leading `/` selects by JSON pointer.")
        .with_parameter(Parameter::new("Field", "field", "str"))
        .with_input(IoField::new("Object", "object", "dict"))
        .with_output(any_field("Field", "field")),
      |params| {
        let field = params.require_str("field")?.to_string();
        Ok(MapOperator::from_fn(move |v| Ok(extract_field(&v, &field))))
      },
    ),
    OperatorRegistration::new(
      ViewMetadata::new("To String", "to_string", CATEGORY_MAPPER, TO_STRING, OperatorType::Map)
        .with_input(any_field("Value", "value"))
        .with_output(IoField::new("Text", "text", "str")),
      |_| {
        Ok(MapOperator::from_fn(|v| {
          Ok(match v {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
          })
        }))
      },
    ),
  ];

  let resources = [
    ResourceRegistration::new(
      ResourceMetadata::new("Prompt Template", "prompt_template", CATEGORY_PROMPT, PROMPT_TEMPLATE)
        .with_parameter(Parameter::new("Template", "template", "str"))
        .with_parameter(Parameter::new("Input Variables", "input_variables", "list").optional(Some(json!([])))),
      |params| PromptTemplate::from_params(params),
    ),
    ResourceRegistration::new(
      ResourceMetadata::new(
        "Template Variables",
        "template_variables",
        CATEGORY_PROMPT,
        TEMPLATE_VARIABLES,
      )
      .with_parameter(Parameter::new("Variables", "variables", "dict").optional(Some(json!({})))),
      |params| TemplateVariables::from_params(params),
    ),
  ];

  for registration in operators {
    if let Err(e) = registry.register_operator(registration) {
      warn!(error = %e, "builtin_operator_skipped");
    }
  }
  for registration in resources {
    if let Err(e) = registry.register_resource(registration) {
      warn!(error = %e, "builtin_resource_skipped");
    }
  }
  registry.register_compat("awel::operators::StringTemplate", TEMPLATE);
}
