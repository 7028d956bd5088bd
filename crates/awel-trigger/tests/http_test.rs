use std::sync::Arc;

use awel_dag::{Dag, DagBuilder, MapOperator, OperatorError, StreamifyOperator, WorkflowRunner};
use awel_trigger::{HttpTrigger, TriggerError, TriggerManager};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

fn greet_dag(dag_id: &str, trigger: HttpTrigger, greeting: &'static str) -> Arc<Dag> {
  let mut builder = DagBuilder::new(dag_id);
  let trigger = builder.add_named("trigger", trigger);
  let greet = builder.add_named(
    "greet",
    MapOperator::from_fn(move |body| {
      let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| OperatorError::failed("name is required"))?;
      Ok(json!({"msg": format!("{greeting} {name}")}))
    }),
  );
  builder.connect(&trigger, &greet);
  Arc::new(builder.build().unwrap())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = router.oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn post(uri: &str, body: Value) -> Request<Body> {
  Request::builder()
    .method(Method::POST)
    .uri(uri)
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

fn manager() -> TriggerManager {
  TriggerManager::new(Arc::new(WorkflowRunner::new()))
}

#[tokio::test]
async fn test_post_returns_leaf_value() {
  let manager = manager();
  let dag = greet_dag("greet", HttpTrigger::new("/greet"), "hi");
  let mounted = manager.register_dag(&dag).unwrap();
  assert_eq!(mounted.len(), 1);
  assert_eq!(mounted[0].path, "/api/v1/awel/trigger/greet");
  assert_eq!(mounted[0].leaf_id, "greet");

  let (status, body) = send(manager.router(), post("/api/v1/awel/trigger/greet", json!({"name": "Ada"}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"msg": "hi Ada"}));
}

#[tokio::test]
async fn test_errors_map_to_status_codes() {
  let manager = manager();
  manager
    .register_dag(&greet_dag("greet", HttpTrigger::new("/greet"), "hi"))
    .unwrap();

  let request = Request::builder()
    .method(Method::POST)
    .uri("/api/v1/awel/trigger/greet")
    .body(Body::from("not json"))
    .unwrap();
  let (status, body) = send(manager.router(), request).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(body["error_code"], 422);

  let (status, body) = send(manager.router(), post("/api/v1/awel/trigger/greet", json!({"nobody": 1}))).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(body["message"].as_str().unwrap().contains("name is required"));
}

#[tokio::test]
async fn test_get_query_and_dag_id_endpoint() {
  let manager = manager().with_api_prefix("/api");
  let trigger = HttpTrigger::new("/{dag_id}/greet").with_methods(vec![Method::GET]);
  manager.register_dag(&greet_dag("d1", trigger, "hello")).unwrap();

  let request = Request::builder()
    .method(Method::GET)
    .uri("/api/d1/greet?name=Bob")
    .body(Body::empty())
    .unwrap();
  let (status, body) = send(manager.router(), request).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"msg": "hello Bob"}));

  let (status, _) = send(manager.router(), post("/api/d1/greet", json!({"name": "Bob"}))).await;
  assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_streaming_response_is_sse() {
  let mut builder = DagBuilder::new("numbers");
  let trigger = builder.add_named("trigger", HttpTrigger::new("/numbers"));
  let items = builder.add_named(
    "items",
    MapOperator::from_fn(|body| Ok(body.get("items").cloned().unwrap_or(json!([])))),
  );
  let stream = builder.add_named("stream", StreamifyOperator::array());
  builder.chain(&[&trigger, &items, &stream]);
  let dag = Arc::new(builder.build().unwrap());

  let manager = manager();
  manager.register_dag(&dag).unwrap();

  let request = post("/api/v1/awel/trigger/numbers", json!({"items": [1, "two"], "stream": true}));
  let response = manager.router().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let headers = response.headers();
  assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
  assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
  assert_eq!(headers[header::CONNECTION], "keep-alive");

  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let text = String::from_utf8(bytes.to_vec()).unwrap();
  assert!(text.contains("data: 1\n\n"), "{text}");
  assert!(text.contains("data: two\n\n"), "{text}");

  // Without the flag the stream is collected into one JSON array.
  let (status, body) = send(manager.router(), post("/api/v1/awel/trigger/numbers", json!({"items": [1, 2]}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!([1, 2]));
}

#[tokio::test]
async fn test_route_priority() {
  let manager = manager();
  manager
    .register_dag(&greet_dag("first", HttpTrigger::new("/greet"), "hi"))
    .unwrap();

  let err = manager
    .register_dag_with_priority(&greet_dag("low", HttpTrigger::new("/greet"), "yo"), 5)
    .unwrap_err();
  assert!(matches!(err, TriggerError::RouteConflict { priority: 10, .. }));

  manager
    .register_dag_with_priority(&greet_dag("high", HttpTrigger::new("/greet"), "hey"), 20)
    .unwrap();
  let routes = manager.routes();
  assert_eq!(routes.len(), 1);
  assert_eq!(routes[0].dag_id, "high");

  let (_, body) = send(manager.router(), post("/api/v1/awel/trigger/greet", json!({"name": "Ada"}))).await;
  assert_eq!(body, json!({"msg": "hey Ada"}));

  assert_eq!(manager.unregister_dag("high"), 1);
  let (status, _) = send(manager.router(), post("/api/v1/awel/trigger/greet", json!({"name": "Ada"}))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mount_into_user_router() {
  let dag = greet_dag("own", HttpTrigger::new("/own"), "hi");
  let trigger = HttpTrigger::new("/own");
  let (router, metadata) = trigger
    .mount_to_router(Router::new(), Arc::clone(&dag), "trigger", Arc::new(WorkflowRunner::new()))
    .unwrap();
  assert_eq!(metadata.path, "/own");
  assert_eq!(metadata.methods, vec!["POST".to_string()]);

  let (status, body) = send(router, post("/own", json!({"name": "Cy"}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"msg": "hi Cy"}));
}

#[test]
fn test_trigger_must_reach_one_leaf() {
  let mut builder = DagBuilder::new("forked");
  let trigger = builder.add_named("trigger", HttpTrigger::new("/forked"));
  let a = builder.add_named("a", MapOperator::from_fn(Ok));
  let b = builder.add_named("b", MapOperator::from_fn(Ok));
  builder.connect(&trigger, &a);
  builder.connect(&trigger, &b);
  let dag = Arc::new(builder.build().unwrap());

  let err = manager().register_dag(&dag).unwrap_err();
  assert!(matches!(err, TriggerError::LeafCount { count: 2, .. }));
}

#[tokio::test]
async fn test_colon_capture_is_rejected() {
  let manager = manager();
  let err = manager
    .register_dag(&greet_dag("users", HttpTrigger::new("/users/:id"), "hi"))
    .unwrap_err();
  assert!(matches!(err, TriggerError::InvalidConfig { .. }));
  assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
  assert!(manager.routes().is_empty());

  let (status, _) = send(manager.router(), post("/api/v1/awel/trigger/users/1", json!({}))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);

  let err = HttpTrigger::new("/users/:id")
    .mount_to_router(
      Router::new(),
      greet_dag("users", HttpTrigger::new("/users/:id"), "hi"),
      "trigger",
      Arc::new(WorkflowRunner::new()),
    )
    .unwrap_err();
  assert!(matches!(err, TriggerError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_conflicting_captures_leave_routes_intact() {
  let manager = manager();
  manager
    .register_dag(&greet_dag("by_x", HttpTrigger::new("/a/{x}"), "hi"))
    .unwrap();

  let err = manager
    .register_dag(&greet_dag("by_y", HttpTrigger::new("/a/{y}"), "yo"))
    .unwrap_err();
  assert!(matches!(err, TriggerError::InvalidConfig { .. }));

  let routes = manager.routes();
  assert_eq!(routes.len(), 1);
  assert_eq!(routes[0].dag_id, "by_x");

  let (status, body) = send(manager.router(), post("/api/v1/awel/trigger/a/1", json!({"name": "Ada"}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"msg": "hi Ada"}));
}

#[tokio::test]
async fn test_repeated_methods_mount_once() {
  let manager = manager();
  let trigger = HttpTrigger::new("/twice").with_methods(vec![Method::POST, Method::POST]);
  let mounted = manager.register_dag(&greet_dag("twice", trigger, "hi")).unwrap();
  assert_eq!(mounted[0].methods, vec!["POST".to_string()]);

  let (status, _) = send(manager.router(), post("/api/v1/awel/trigger/twice", json!({"name": "Bo"}))).await;
  assert_eq!(status, StatusCode::OK);
}
