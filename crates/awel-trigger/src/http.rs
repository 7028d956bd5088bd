//! HTTP trigger: exposes one DAG as an axum route.
//!
//! The trigger is itself a node of the DAG it starts. Mounting it finds the
//! single leaf reachable from the trigger node; each request body becomes
//! the run's call data and the leaf output becomes the response, either as
//! one JSON document or as a server-sent event stream.

use std::convert::Infallible;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use awel_dag::{Dag, DagContext, Operator, OperatorError, OperatorKind, TriggerOperator, WorkflowRunner};
use awel_task::{OutputStream, TaskContext, TaskOutput};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{MethodFilter, MethodRouter, on};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument, warn};

use crate::error::TriggerError;

pub const DEFAULT_STREAM_MEDIA_TYPE: &str = "text/event-stream";
const JSON_MEDIA_TYPE: &str = "application/json";
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// How the request body is turned into call data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBodyType {
  /// A JSON object.
  #[default]
  Dict,
  /// The raw body as a string.
  Str,
  /// Method, path, query, headers and body as one object.
  Request,
  /// A JSON object validated as [`CommonLlmHttpRequestBody`].
  CommonLlm,
}

impl RequestBodyType {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "dict" => Some(RequestBodyType::Dict),
      "str" => Some(RequestBodyType::Str),
      "request" => Some(RequestBodyType::Request),
      "common_llm" => Some(RequestBodyType::CommonLlm),
      _ => None,
    }
  }
}

/// Request body shared by chat-style endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonLlmHttpRequestBody {
  /// A prompt string or a list of chat messages.
  pub messages: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model: Option<String>,
  #[serde(default)]
  pub stream: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub temperature: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_new_tokens: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub conv_uid: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub span_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub context: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

pub type StreamingPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// True when the body asks for a stream with `stream: true` or
/// `streaming: true`.
pub fn default_streaming_predicate(body: &Value) -> bool {
  ["stream", "streaming"]
    .iter()
    .any(|key| body.get(key).and_then(Value::as_bool).unwrap_or(false))
}

/// What a mounted trigger serves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpTriggerMetadata {
  pub path: String,
  pub methods: Vec<String>,
  pub dag_id: String,
  pub trigger_id: String,
  pub leaf_id: String,
  pub request_body: RequestBodyType,
  pub streaming_response: Option<bool>,
}

#[derive(Clone)]
pub struct HttpTrigger {
  endpoint: String,
  methods: Vec<Method>,
  request_body: RequestBodyType,
  body_defaults: Map<String, Value>,
  streaming_response: Option<bool>,
  streaming_predicate: StreamingPredicate,
  response_media_type: Option<String>,
  status_code: StatusCode,
}

impl fmt::Debug for HttpTrigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HttpTrigger")
      .field("endpoint", &self.endpoint)
      .field("methods", &self.methods)
      .field("request_body", &self.request_body)
      .field("streaming_response", &self.streaming_response)
      .field("response_media_type", &self.response_media_type)
      .field("status_code", &self.status_code)
      .finish()
  }
}

impl HttpTrigger {
  /// A POST trigger taking a JSON object. `endpoint` may contain
  /// `{dag_id}`, replaced when mounted.
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      endpoint: endpoint.into(),
      methods: vec![Method::POST],
      request_body: RequestBodyType::Dict,
      body_defaults: Map::new(),
      streaming_response: None,
      streaming_predicate: Arc::new(default_streaming_predicate),
      response_media_type: None,
      status_code: StatusCode::OK,
    }
  }

  /// Repeated methods are kept once.
  pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
    self.methods.clear();
    for method in methods {
      if !self.methods.contains(&method) {
        self.methods.push(method);
      }
    }
    self
  }

  pub fn with_request_body(mut self, request_body: RequestBodyType) -> Self {
    self.request_body = request_body;
    self
  }

  /// Field defaults applied to query-string bodies.
  pub fn with_body_defaults(mut self, defaults: Map<String, Value>) -> Self {
    self.body_defaults = defaults;
    self
  }

  /// Force streaming on or off instead of asking the body.
  pub fn with_streaming_response(mut self, streaming: bool) -> Self {
    self.streaming_response = Some(streaming);
    self
  }

  pub fn with_streaming_predicate(mut self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
    self.streaming_predicate = Arc::new(predicate);
    self
  }

  pub fn with_response_media_type(mut self, media_type: impl Into<String>) -> Self {
    self.response_media_type = Some(media_type.into());
    self
  }

  pub fn with_status_code(mut self, status_code: StatusCode) -> Self {
    self.status_code = status_code;
    self
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn methods(&self) -> &[Method] {
    &self.methods
  }

  pub fn is_streaming(&self, body: &Value) -> bool {
    self
      .streaming_response
      .unwrap_or_else(|| (self.streaming_predicate)(body))
  }

  /// The route path under `prefix` with `{dag_id}` substituted.
  pub fn resolve_path(&self, prefix: &str, dag_id: &str) -> String {
    let endpoint = self.endpoint.replace("{dag_id}", dag_id);
    let endpoint = endpoint.trim_start_matches('/');
    let prefix = prefix.trim_end_matches('/');
    format!("{prefix}/{endpoint}")
  }

  /// Turn an incoming request into call data.
  pub fn parse_body(&self, parts: &Parts, bytes: &[u8]) -> Result<Value, TriggerError> {
    if self.request_body == RequestBodyType::Request {
      return Ok(request_value(parts, bytes));
    }
    if parts.method == Method::GET || parts.method == Method::DELETE {
      return self.query_body(parts.uri.query().unwrap_or_default());
    }

    match self.request_body {
      RequestBodyType::Str => String::from_utf8(bytes.to_vec())
        .map(Value::String)
        .map_err(|_| TriggerError::invalid_body("body is not valid UTF-8")),
      RequestBodyType::Dict => match parse_json(bytes)? {
        Value::Object(mut body) => {
          for (key, value) in &self.body_defaults {
            body.entry(key.clone()).or_insert_with(|| value.clone());
          }
          Ok(Value::Object(body))
        }
        other => Err(TriggerError::invalid_body(format!("expected a JSON object, got {other}"))),
      },
      RequestBodyType::CommonLlm => {
        let body: CommonLlmHttpRequestBody =
          serde_json::from_value(parse_json(bytes)?).map_err(|e| TriggerError::invalid_body(e.to_string()))?;
        serde_json::to_value(body).map_err(|e| TriggerError::invalid_body(e.to_string()))
      }
      RequestBodyType::Request => Ok(request_value(parts, bytes)),
    }
  }

  fn query_body(&self, query: &str) -> Result<Value, TriggerError> {
    let pairs: Vec<(String, String)> =
      serde_urlencoded::from_str(query).map_err(|e| TriggerError::invalid_body(e.to_string()))?;
    let mut body = self.body_defaults.clone();
    for (key, value) in pairs {
      body.insert(key, Value::String(value));
    }
    Ok(Value::Object(body))
  }

  fn metadata(&self, path: String, dag: &Dag, trigger_id: &str, leaf_id: &str) -> HttpTriggerMetadata {
    HttpTriggerMetadata {
      path,
      methods: self.methods.iter().map(ToString::to_string).collect(),
      dag_id: dag.dag_id().to_string(),
      trigger_id: trigger_id.to_string(),
      leaf_id: leaf_id.to_string(),
      request_body: self.request_body,
      streaming_response: self.streaming_response,
    }
  }

  /// One method router per declared method, all driving `dag` from the
  /// trigger node `trigger_id`.
  pub(crate) fn mount(
    &self,
    prefix: &str,
    dag: Arc<Dag>,
    trigger_id: &str,
    runner: Arc<WorkflowRunner>,
  ) -> Result<(HttpTriggerMetadata, Vec<(Method, MethodRouter)>), TriggerError> {
    if self.methods.is_empty() {
      return Err(TriggerError::invalid_config("trigger declares no HTTP methods"));
    }
    let leaf_id = single_leaf(&dag, trigger_id)?;
    let path = self.resolve_path(prefix, dag.dag_id());
    validate_path(&path)?;
    let metadata = self.metadata(path, &dag, trigger_id, &leaf_id);

    let state = RouteState {
      trigger: Arc::new(self.clone()),
      dag,
      leaf_id: Arc::from(leaf_id),
      runner,
    };
    let routers = self
      .methods
      .iter()
      .map(|method| {
        let filter = MethodFilter::try_from(method.clone())
          .map_err(|_| TriggerError::invalid_config(format!("unsupported HTTP method {method}")))?;
        let router: MethodRouter = on(filter, dispatch).with_state(state.clone());
        Ok((method.clone(), router))
      })
      .collect::<Result<Vec<_>, TriggerError>>()?;
    Ok((metadata, routers))
  }

  /// Add this trigger's route to a caller-owned router.
  pub fn mount_to_router(
    &self,
    router: Router,
    dag: Arc<Dag>,
    trigger_id: &str,
    runner: Arc<WorkflowRunner>,
  ) -> Result<(Router, HttpTriggerMetadata), TriggerError> {
    let (metadata, routers) = self.mount("", dag, trigger_id, runner)?;
    let router = try_route(
      router,
      routers
        .into_iter()
        .map(|(_, method_router)| (metadata.path.clone(), method_router)),
    )?;
    info!(path = %metadata.path, dag_id = %metadata.dag_id, "http_trigger_mounted");
    Ok((router, metadata))
  }
}

#[async_trait]
impl Operator for HttpTrigger {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Trigger
  }

  async fn run(&self, task: &mut TaskContext<Value>, dag_ctx: &DagContext) -> Result<(), OperatorError> {
    TriggerOperator::new().run(task, dag_ctx).await
  }
}

/// The one leaf a trigger drives.
pub(crate) fn single_leaf(dag: &Dag, trigger_id: &str) -> Result<String, TriggerError> {
  match dag.leaves_reachable_from(trigger_id).as_slice() {
    [leaf] => Ok(leaf.node_id().to_string()),
    leaves => Err(TriggerError::LeafCount {
      dag_id: dag.dag_id().to_string(),
      node_id: trigger_id.to_string(),
      count: leaves.len(),
    }),
  }
}

/// Reject paths axum cannot route: captures are written `{name}` or
/// `{*name}`, span a whole segment, and a wildcard comes last.
pub(crate) fn validate_path(path: &str) -> Result<(), TriggerError> {
  let invalid = |message: String| TriggerError::invalid_config(format!("invalid endpoint '{path}': {message}"));
  if !path.starts_with('/') {
    return Err(invalid("must start with '/'".to_string()));
  }
  let segments: Vec<&str> = path.split('/').skip(1).collect();
  for (i, segment) in segments.iter().enumerate() {
    if segment.starts_with(':') || segment.starts_with('*') {
      return Err(invalid(format!(
        "segment '{segment}' starts with '{}', use {{name}} or {{*name}}",
        &segment[..1]
      )));
    }
    if !segment.contains(['{', '}']) {
      continue;
    }
    let name = segment
      .strip_prefix('{')
      .and_then(|s| s.strip_suffix('}'))
      .ok_or_else(|| invalid(format!("capture '{segment}' must span the whole segment")))?;
    let (wildcard, name) = match name.strip_prefix('*') {
      Some(name) => (true, name),
      None => (false, name),
    };
    if name.is_empty() || name.contains(['{', '}', '*', ':']) {
      return Err(invalid(format!("bad capture name in '{segment}'")));
    }
    if wildcard && i + 1 != segments.len() {
      return Err(invalid(format!("wildcard '{segment}' must be the last segment")));
    }
  }
  Ok(())
}

/// Add `routes` to `router`. Axum panics on routes it cannot insert, such
/// as two captures with different names at the same position; that panic
/// becomes an error here.
pub(crate) fn try_route(
  router: Router,
  routes: impl IntoIterator<Item = (String, MethodRouter)>,
) -> Result<Router, TriggerError> {
  let routes: Vec<_> = routes.into_iter().collect();
  panic::catch_unwind(AssertUnwindSafe(move || {
    routes
      .into_iter()
      .fold(router, |router, (path, method_router)| router.route(&path, method_router))
  }))
  .map_err(|payload| {
    let message = payload
      .downcast_ref::<String>()
      .cloned()
      .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
      .unwrap_or_else(|| "route rejected by the router".to_string());
    TriggerError::invalid_config(message)
  })
}

fn parse_json(bytes: &[u8]) -> Result<Value, TriggerError> {
  if bytes.is_empty() {
    return Ok(Value::Object(Map::new()));
  }
  serde_json::from_slice(bytes).map_err(|e| TriggerError::invalid_body(e.to_string()))
}

fn request_value(parts: &Parts, bytes: &[u8]) -> Value {
  let query: Map<String, Value> = parts
    .uri
    .query()
    .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
    .unwrap_or_default()
    .into_iter()
    .map(|(k, v)| (k, Value::String(v)))
    .collect();
  let headers: Map<String, Value> = parts
    .headers
    .iter()
    .map(|(name, value)| {
      let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
      (name.as_str().to_string(), Value::String(value))
    })
    .collect();
  let body = serde_json::from_slice(bytes)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()));
  json!({
    "method": parts.method.as_str(),
    "path": parts.uri.path(),
    "query": query,
    "headers": headers,
    "body": body,
  })
}

#[derive(Clone)]
struct RouteState {
  trigger: Arc<HttpTrigger>,
  dag: Arc<Dag>,
  leaf_id: Arc<str>,
  runner: Arc<WorkflowRunner>,
}

#[instrument(
  name = "http_trigger",
  skip_all,
  fields(
    dag_id = %state.dag.dag_id(),
    method = %request.method(),
    path = %request.uri().path(),
  )
)]
async fn dispatch(State(state): State<RouteState>, request: Request) -> Response {
  let (parts, body) = request.into_parts();
  let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
    Ok(bytes) => bytes,
    Err(e) => return error_response(&TriggerError::invalid_body(e.to_string())),
  };
  let body = match state.trigger.parse_body(&parts, &bytes) {
    Ok(body) => body,
    Err(e) => {
      warn!(error = %e, "http_trigger_bad_request");
      return error_response(&e);
    }
  };

  if state.trigger.is_streaming(&body) {
    match state.runner.call_stream(&state.dag, &state.leaf_id, Some(body)).await {
      Ok(stream) => stream_response(&state.trigger, stream),
      Err(e) => {
        let e = TriggerError::from(e);
        error!(error = %e, "http_trigger_failed");
        let events = futures::stream::once(async move { Ok::<Event, Infallible>(error_event(&e)) });
        sse_response(&state.trigger, events)
      }
    }
  } else {
    match state.runner.call(&state.dag, &state.leaf_id, Some(body)).await {
      Ok(output) => value_response(&state.trigger, output).await,
      Err(e) => {
        let e = TriggerError::from(e);
        error!(error = %e, "http_trigger_failed");
        error_response(&e)
      }
    }
  }
}

async fn value_response(trigger: &HttpTrigger, output: TaskOutput<Value>) -> Response {
  let value = match output {
    TaskOutput::Value(value) => value,
    TaskOutput::Stream(_) => match output.unstreamify().await {
      Ok(items) => Value::Array(items.into_value().unwrap_or_default()),
      Err(e) => return error_response(&TriggerError::Runner(e.into())),
    },
    TaskOutput::Empty | TaskOutput::Skip => Value::Null,
  };

  match (&trigger.response_media_type, value) {
    (Some(media_type), Value::String(text)) if media_type != JSON_MEDIA_TYPE => {
      (trigger.status_code, [(header::CONTENT_TYPE, media_type.clone())], text).into_response()
    }
    (_, value) => (trigger.status_code, Json(value)).into_response(),
  }
}

fn error_response(err: &TriggerError) -> Response {
  let status = err.status_code();
  (
    status,
    Json(json!({
      "error_code": status.as_u16(),
      "message": err.to_string(),
    })),
  )
    .into_response()
}

fn error_event(err: &TriggerError) -> Event {
  let payload = json!({
    "error_code": err.status_code().as_u16(),
    "message": err.to_string(),
  });
  Event::default().event("error").data(payload.to_string())
}

/// Text form of a stream item; SSE data may not carry carriage returns.
fn item_text(item: &Value) -> String {
  match item {
    Value::String(s) => s.replace('\r', ""),
    other => other.to_string(),
  }
}

fn stream_response(trigger: &HttpTrigger, mut items: OutputStream<Value>) -> Response {
  let media_type = trigger
    .response_media_type
    .clone()
    .unwrap_or_else(|| DEFAULT_STREAM_MEDIA_TYPE.to_string());

  if media_type != DEFAULT_STREAM_MEDIA_TYPE {
    let chunks = stream! {
      while let Some(item) = items.next().await {
        match item {
          Ok(value) => yield Ok::<String, Infallible>(item_text(&value)),
          Err(e) => {
            warn!(error = %e, "http_trigger_stream_failed");
            yield Ok(format!("\nerror: {e}"));
            break;
          }
        }
      }
    };
    return (trigger.status_code, [(header::CONTENT_TYPE, media_type)], Body::from_stream(chunks)).into_response();
  }

  let events = stream! {
    while let Some(item) = items.next().await {
      match item {
        Ok(value) => yield Ok::<Event, Infallible>(Event::default().data(item_text(&value))),
        Err(e) => {
          warn!(error = %e, "http_trigger_stream_failed");
          yield Ok(error_event(&TriggerError::Runner(e.into())));
          break;
        }
      }
    }
  };
  sse_response(trigger, events)
}

fn sse_response<S>(trigger: &HttpTrigger, events: S) -> Response
where
  S: futures::Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
  (
    trigger.status_code,
    [
      (header::CACHE_CONTROL, "no-cache"),
      (header::CONNECTION, "keep-alive"),
      (header::TRANSFER_ENCODING, "chunked"),
    ],
    Sse::new(events).keep_alive(KeepAlive::default()),
  )
    .into_response()
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::Request as HttpRequest;

  fn parts(method: Method, uri: &str) -> Parts {
    HttpRequest::builder().method(method).uri(uri).body(()).unwrap().into_parts().0
  }

  #[test]
  fn test_streaming_decision() {
    let trigger = HttpTrigger::new("/x");
    assert!(trigger.is_streaming(&json!({"stream": true})));
    assert!(trigger.is_streaming(&json!({"streaming": true})));
    assert!(!trigger.is_streaming(&json!({"stream": "yes"})));
    assert!(!trigger.is_streaming(&json!("text")));

    let forced = HttpTrigger::new("/x").with_streaming_response(false);
    assert!(!forced.is_streaming(&json!({"stream": true})));
  }

  #[test]
  fn test_repeated_methods_kept_once() {
    let trigger = HttpTrigger::new("/x").with_methods(vec![Method::GET, Method::POST, Method::GET]);
    assert_eq!(trigger.methods(), &[Method::GET, Method::POST]);
  }

  #[test]
  fn test_validate_path() {
    assert!(validate_path("/users/{id}").is_ok());
    assert!(validate_path("/files/{*rest}").is_ok());
    assert!(validate_path("/plain/path").is_ok());

    for bad in ["/users/:id", "/files/*rest", "/a/{*rest}/b", "/a/x{id}", "/a/{}", "no-slash"] {
      assert!(
        matches!(validate_path(bad), Err(TriggerError::InvalidConfig { .. })),
        "{bad} should be rejected"
      );
    }
  }

  #[test]
  fn test_resolve_path() {
    let trigger = HttpTrigger::new("/flows/{dag_id}/run");
    assert_eq!(trigger.resolve_path("/api/v1/", "d1"), "/api/v1/flows/d1/run");
    assert_eq!(HttpTrigger::new("greet").resolve_path("", "d1"), "/greet");
  }

  #[test]
  fn test_query_string_becomes_dict() {
    let mut defaults = Map::new();
    defaults.insert("limit".to_string(), json!(10));
    defaults.insert("name".to_string(), json!("nobody"));
    let trigger = HttpTrigger::new("/q")
      .with_methods(vec![Method::GET])
      .with_body_defaults(defaults);

    let body = trigger.parse_body(&parts(Method::GET, "/q?name=Ada&x=1"), b"").unwrap();
    assert_eq!(body, json!({"name": "Ada", "x": "1", "limit": 10}));
  }

  #[test]
  fn test_body_types() {
    let post = parts(Method::POST, "/b?debug=1");

    let dict = HttpTrigger::new("/b");
    assert_eq!(dict.parse_body(&post, br#"{"a":1}"#).unwrap(), json!({"a": 1}));
    assert!(matches!(
      dict.parse_body(&post, b"[1]"),
      Err(TriggerError::InvalidBody { .. })
    ));
    assert!(matches!(
      dict.parse_body(&post, b"{oops"),
      Err(TriggerError::InvalidBody { .. })
    ));

    let text = HttpTrigger::new("/b").with_request_body(RequestBodyType::Str);
    assert_eq!(text.parse_body(&post, b"hello").unwrap(), json!("hello"));

    let raw = HttpTrigger::new("/b").with_request_body(RequestBodyType::Request);
    let body = raw.parse_body(&post, br#"{"a":1}"#).unwrap();
    assert_eq!(body["method"], "POST");
    assert_eq!(body["query"], json!({"debug": "1"}));
    assert_eq!(body["body"], json!({"a": 1}));

    let llm = HttpTrigger::new("/b").with_request_body(RequestBodyType::CommonLlm);
    let body = llm
      .parse_body(&post, br#"{"messages":"hi","stream":true,"user":"u1"}"#)
      .unwrap();
    assert_eq!(body["messages"], "hi");
    assert_eq!(body["user"], "u1");
    assert!(llm.is_streaming(&body));
    assert!(matches!(
      llm.parse_body(&post, br#"{"model":"m"}"#),
      Err(TriggerError::InvalidBody { .. })
    ));
  }

  #[test]
  fn test_error_status_codes() {
    assert_eq!(
      TriggerError::invalid_body("x").status_code(),
      StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(
      TriggerError::Timeout {
        timeout: std::time::Duration::from_secs(1)
      }
      .status_code(),
      StatusCode::GATEWAY_TIMEOUT
    );
  }
}
