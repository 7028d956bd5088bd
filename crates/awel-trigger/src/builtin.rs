//! Trigger node types for flow documents.

use std::time::Duration;

use awel_config::{IoField, OperatorType, Parameter, ViewMetadata};
use awel_registry::{OperatorRegistration, Registry, RegistryError, RunnableParameters};
use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::warn;

use crate::http::{HttpTrigger, RequestBodyType};
use crate::iterator::IteratorTrigger;

pub const HTTP_TRIGGER: &str = "awel::triggers::HttpTrigger";
pub const ITERATOR_TRIGGER: &str = "awel::triggers::IteratorTrigger";

const CATEGORY_TRIGGER: &str = "trigger";

/// Register the trigger node types with `registry`.
pub fn register_triggers(registry: &Registry) {
  let registrations = [
    OperatorRegistration::new(
      ViewMetadata::new("HTTP Trigger", "http_trigger", CATEGORY_TRIGGER, HTTP_TRIGGER, OperatorType::Trigger)
        .with_description("Starts the flow from an HTTP request.")
        .with_parameter(Parameter::new("Endpoint", "endpoint", "str"))
        .with_parameter(Parameter::new("Methods", "methods", "str").optional(Some(json!("POST"))))
        .with_parameter(Parameter::new("Request Body", "request_body", "str").optional(Some(json!("dict"))))
        .with_parameter(Parameter::new("Streaming Response", "streaming_response", "bool").optional(None))
        .with_parameter(Parameter::new("Response Media Type", "response_media_type", "str").optional(None))
        .with_parameter(Parameter::new("Status Code", "status_code", "int").optional(Some(json!(200))))
        .with_output(IoField::new("Request Body", "request_body", "dict")),
      |params: &RunnableParameters| http_trigger(params),
    ),
    OperatorRegistration::new(
      ViewMetadata::new(
        "Iterator Trigger",
        "iterator_trigger",
        CATEGORY_TRIGGER,
        ITERATOR_TRIGGER,
        OperatorType::Trigger,
      )
      .with_description("Runs the flow once per item.")
      .with_parameter(Parameter::new("Data", "data", "list"))
      .with_parameter(Parameter::new("Parallel Number", "parallel_num", "int").optional(Some(json!(1))))
      .with_parameter(Parameter::new("Streaming Call", "streaming_call", "bool").optional(Some(json!(false))))
      .with_parameter(Parameter::new("Max Retries", "max_retries", "int").optional(Some(json!(0))))
      .with_parameter(Parameter::new("Retry Delay", "retry_delay", "float").optional(Some(json!(1.0))))
      .with_parameter(Parameter::new("Timeout", "timeout", "float").optional(None))
      .with_output(IoField::new("Item", "item", "any")),
      |params: &RunnableParameters| iterator_trigger(params),
    ),
  ];

  for registration in registrations {
    if let Err(e) = registry.register_operator(registration) {
      warn!(error = %e, "builtin_trigger_skipped");
    }
  }
}

fn optional<'a>(params: &'a RunnableParameters, name: &str) -> Option<&'a Value> {
  params.value(name).filter(|v| !v.is_null())
}

fn http_trigger(params: &RunnableParameters) -> Result<HttpTrigger, RegistryError> {
  let mut trigger = HttpTrigger::new(params.require_str("endpoint")?);

  if let Some(methods) = optional(params, "methods").and_then(Value::as_str) {
    let methods = methods
      .split(',')
      .map(str::trim)
      .filter(|m| !m.is_empty())
      .map(|m| {
        Method::from_bytes(m.to_ascii_uppercase().as_bytes())
          .map_err(|_| RegistryError::invalid("methods", format!("unknown HTTP method '{m}'")))
      })
      .collect::<Result<Vec<_>, _>>()?;
    trigger = trigger.with_methods(methods);
  }
  if let Some(body) = optional(params, "request_body").and_then(Value::as_str) {
    let body = RequestBodyType::parse(body)
      .ok_or_else(|| RegistryError::invalid("request_body", format!("unknown body type '{body}'")))?;
    trigger = trigger.with_request_body(body);
  }
  if let Some(streaming) = optional(params, "streaming_response").and_then(Value::as_bool) {
    trigger = trigger.with_streaming_response(streaming);
  }
  if let Some(media_type) = optional(params, "response_media_type").and_then(Value::as_str) {
    trigger = trigger.with_response_media_type(media_type);
  }
  if let Some(code) = optional(params, "status_code").and_then(Value::as_u64) {
    let status = u16::try_from(code)
      .ok()
      .and_then(|code| StatusCode::from_u16(code).ok())
      .ok_or_else(|| RegistryError::invalid("status_code", format!("invalid status code {code}")))?;
    trigger = trigger.with_status_code(status);
  }
  Ok(trigger)
}

fn seconds(params: &RunnableParameters, name: &str) -> Result<Option<Duration>, RegistryError> {
  optional(params, name)
    .and_then(Value::as_f64)
    .map(|secs| Duration::try_from_secs_f64(secs).map_err(|e| RegistryError::invalid(name, e.to_string())))
    .transpose()
}

fn iterator_trigger(params: &RunnableParameters) -> Result<IteratorTrigger, RegistryError> {
  let items = match params.require_value("data")? {
    Value::Array(items) => items.clone(),
    other => vec![other.clone()],
  };
  let count = |name: &str, default: u64| optional(params, name).and_then(Value::as_u64).unwrap_or(default) as usize;

  let mut trigger = IteratorTrigger::from_items(items)
    .with_parallel_num(count("parallel_num", 1))
    .with_streaming_call(optional(params, "streaming_call").and_then(Value::as_bool).unwrap_or(false))
    .with_retries(
      count("max_retries", 0),
      seconds(params, "retry_delay")?.unwrap_or(Duration::from_secs(1)),
    );
  if let Some(timeout) = seconds(params, "timeout")? {
    trigger = trigger.with_timeout(timeout);
  }
  Ok(trigger)
}
