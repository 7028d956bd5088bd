use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use awel_dag::operator::placeholders;
use awel_dag::{
  BranchJoinOperator, BranchOperator, DagBuilder, DagContext, DagError, InputOperator, MapOperator, Operator,
  OperatorError, OperatorKind, Param, ReduceStreamOperator, RunId, RunnerError, StreamifyOperator, TriggerOperator,
  UnstreamifyOperator, WorkflowRunner, current_dag_context,
};
use awel_task::{TaskContext, TaskOutput, TaskState};
use awel_variables::{
  AesGcmEncryption, DagVariables, InMemoryStorage, StorageVariables, StorageVariablesProvider, VariablesPlaceHolder,
  VariablesProvider,
};
use futures::TryStreamExt;
use serde_json::{Value, json};

fn as_i64(v: &Value) -> Result<i64, OperatorError> {
  v.as_i64().ok_or_else(|| OperatorError::failed(format!("not an integer: {v}")))
}

#[tokio::test]
async fn test_linear_map() {
  let mut builder = DagBuilder::new("linear");
  let input = builder.add_named("input", InputOperator::from_value(json!("hello")));
  let upper = builder.add_named(
    "upper",
    MapOperator::from_fn(|v| Ok(json!(v.as_str().unwrap_or_default().to_uppercase()))),
  );
  builder.connect(&input, &upper);
  let dag = Arc::new(builder.build().unwrap());

  let output = WorkflowRunner::new().call(&dag, "upper", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!("HELLO")));
}

fn branch_dag() -> Arc<awel_dag::Dag> {
  let mut builder = DagBuilder::new("branch");
  let input = builder.add_named("input", InputOperator::from_value(json!(7)));
  let branch = builder.add_named(
    "branch",
    BranchOperator::new()
      .with_branch_fn(|v| v.as_i64().is_some_and(|x| x % 2 == 0), "even")
      .with_branch_fn(|v| v.as_i64().is_some_and(|x| x % 2 == 1), "odd"),
  );
  let even = builder.add_named("even", MapOperator::from_fn(|v| Ok(json!(as_i64(&v)? + 100))));
  let odd = builder.add_named("odd", MapOperator::from_fn(|v| Ok(json!(as_i64(&v)? - 1))));
  let join = builder.add_named("join", BranchJoinOperator::new());
  builder.connect(&input, &branch);
  builder.connect(&branch, &even);
  builder.connect(&branch, &odd);
  builder.connect(&even, &join);
  builder.connect(&odd, &join);
  Arc::new(builder.build().unwrap())
}

#[tokio::test]
async fn test_branch_and_join() {
  let dag = branch_dag();
  let runner = WorkflowRunner::new();
  let ctx = runner.execute_workflow(&dag, "join", None, false, None, None).await.unwrap();

  let join = ctx.task("join").unwrap();
  assert_eq!(join.state(), TaskState::Success);
  assert_eq!(join.task_output().value(), Some(&json!(6)));

  let branch = ctx.task("branch").unwrap();
  assert_eq!(branch.metadata_value("skip_node_names"), Some(&json!(["even"])));
  assert_eq!(ctx.task_state("even"), Some(TaskState::Skip));
  assert!(ctx.task("even").unwrap().task_output().is_skip());
  assert_eq!(ctx.skipped_nodes(), HashSet::from(["even".to_string()]));
}

#[tokio::test]
async fn test_branch_all_false_skips_every_target() {
  let mut builder = DagBuilder::new("none");
  let input = builder.add_named("input", InputOperator::from_value(json!("x")));
  let branch = builder.add_named(
    "branch",
    BranchOperator::new()
      .with_branch_fn(|_| false, "a")
      .with_branch_fn(|_| false, "b"),
  );
  let a = builder.add_named("a", MapOperator::from_fn(Ok));
  let b = builder.add_named("b", MapOperator::from_fn(Ok));
  let after_a = builder.add_named("after_a", MapOperator::from_fn(Ok));
  let join = builder.add_named("join", BranchJoinOperator::new());
  builder.connect(&input, &branch);
  builder.connect(&branch, &a);
  builder.connect(&branch, &b);
  builder.connect(&a, &after_a);
  builder.connect(&after_a, &join);
  builder.connect(&b, &join);
  let dag = Arc::new(builder.build().unwrap());

  let ctx = WorkflowRunner::new()
    .execute_workflow(&dag, "join", None, false, None, None)
    .await
    .unwrap();
  for node in ["a", "b", "after_a"] {
    assert_eq!(ctx.task_state(node), Some(TaskState::Skip), "{node}");
  }
  let join = ctx.task("join").unwrap();
  assert_eq!(join.state(), TaskState::Success);
  assert!(join.task_output().is_empty());
}

#[tokio::test]
async fn test_streaming_reduce() {
  let mut builder = DagBuilder::new("reduce");
  let input = builder.add_named("input", InputOperator::from_value(json!([1, 2, 3, 4])));
  let streamify = builder.add_named("streamify", StreamifyOperator::array());
  let sum = builder.add_named(
    "sum",
    ReduceStreamOperator::from_fn(|a, b| Ok(json!(as_i64(&a)? + as_i64(&b)?))),
  );
  builder.chain(&[&input, &streamify, &sum]);
  let dag = Arc::new(builder.build().unwrap());

  let output = WorkflowRunner::new().call(&dag, "sum", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!(10)));
}

#[tokio::test]
async fn test_stream_shared_by_two_consumers() {
  let mut builder = DagBuilder::new("fan_out");
  let input = builder.add_named("input", InputOperator::from_items(vec![json!(1), json!(2), json!(3)]));
  let sum = builder.add_named(
    "sum",
    ReduceStreamOperator::from_fn(|a, b| Ok(json!(as_i64(&a)? + as_i64(&b)?))),
  );
  let collect = builder.add_named("collect", UnstreamifyOperator::new());
  let join = builder.add_named("join", awel_dag::JoinOperator::from_fn(|v| Ok(json!(v))));
  builder.connect(&input, &sum);
  builder.connect(&input, &collect);
  builder.connect(&sum, &join);
  builder.connect(&collect, &join);
  let dag = Arc::new(builder.build().unwrap());

  let output = WorkflowRunner::new().call(&dag, "join", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!([6, [1, 2, 3]])));
}

struct KeyedOperator {
  api_key: Param,
}

#[async_trait]
impl Operator for KeyedOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Map
  }

  fn variable_placeholders(&self) -> Vec<VariablesPlaceHolder> {
    placeholders([&self.api_key])
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let api_key = self.api_key.resolve(task)?;
    task.set_task_output(TaskOutput::Value(api_key));
    Ok(())
  }
}

#[tokio::test]
async fn test_variables_resolved_before_run() {
  let provider = StorageVariablesProvider::new(
    Arc::new(InMemoryStorage::new()),
    Arc::new(AesGcmEncryption::with_iterations("test-key", 1_000)),
  );
  provider
    .save(StorageVariables::new("llm.key", "prod", json!("abc")))
    .await
    .unwrap();

  let mut builder = DagBuilder::new("vars");
  builder.add_named(
    "op",
    KeyedOperator {
      api_key: Param::from_value("api_key", json!("${llm.key:prod@global}")),
    },
  );
  let dag = Arc::new(builder.build().unwrap());

  let output = WorkflowRunner::new()
    .with_provider(Arc::new(provider))
    .call(&dag, "op", None)
    .await
    .unwrap();
  assert_eq!(output.value(), Some(&json!("abc")));
}

#[tokio::test]
async fn test_dag_variables_supply_missing_key() {
  let mut builder = DagBuilder::new("vars");
  builder.add_named(
    "op",
    KeyedOperator {
      api_key: Param::from_value("api_key", json!("${missing:key}")),
    },
  );
  let dag = Arc::new(builder.build().unwrap());
  let runner = WorkflowRunner::new();

  let err = runner.call(&dag, "op", None).await.unwrap_err();
  assert!(matches!(
    err,
    RunnerError::NodeFailed { ref node_id, source: OperatorError::Variables(_) } if node_id == "op"
  ));

  let vars = DagVariables::new(vec![StorageVariables::new("missing", "key", json!("found"))]);
  let ctx = runner
    .execute_workflow(&dag, "op", None, false, None, Some(vars))
    .await
    .unwrap();
  assert_eq!(ctx.task("op").unwrap().task_output().value(), Some(&json!("found")));
}

#[tokio::test]
async fn test_single_node_receives_call_data() {
  let mut builder = DagBuilder::new("single");
  builder.add_named("trigger", TriggerOperator::new());
  let dag = Arc::new(builder.build().unwrap());

  let runner = WorkflowRunner::new();
  let ctx = runner
    .execute_workflow(&dag, "trigger", Some(json!({"a": 1})), false, None, None)
    .await
    .unwrap();
  let task = ctx.task("trigger").unwrap();
  assert_eq!(task.call_data(), Some(&json!({"a": 1})));
  assert_eq!(task.task_output().value(), Some(&json!({"a": 1})));
  assert!(task.log_id().is_some());
}

#[tokio::test]
async fn test_invalid_dags_rejected() {
  assert!(matches!(DagBuilder::new("empty").build(), Err(DagError::Empty { .. })));

  let mut builder = DagBuilder::new("cycle");
  let a = builder.add_named("a", MapOperator::from_fn(Ok));
  let b = builder.add_named("b", MapOperator::from_fn(Ok));
  builder.connect(&a, &b);
  builder.connect(&b, &a);
  assert!(matches!(builder.build(), Err(DagError::Cycle { .. })));

  let dag = branch_dag();
  let err = WorkflowRunner::new().call(&dag, "nope", None).await.unwrap_err();
  assert!(err.is_validation());
}

#[tokio::test]
async fn test_failed_node_state() {
  let mut builder = DagBuilder::new("fail");
  let input = builder.add_named("input", InputOperator::from_value(json!(1)));
  let boom = builder.add_named("boom", MapOperator::from_fn(|_| Err(OperatorError::failed("boom"))));
  let after = builder.add_named("after", MapOperator::from_fn(Ok));
  builder.chain(&[&input, &boom, &after]);
  let dag = Arc::new(builder.build().unwrap());

  let runner = WorkflowRunner::new();
  let err = runner.call(&dag, "after", None).await.unwrap_err();
  match err {
    RunnerError::NodeFailed { node_id, source } => {
      assert_eq!(node_id, "boom");
      assert_eq!(source.to_string(), "boom");
    }
    other => panic!("unexpected error: {other}"),
  }
}

struct HookCounter {
  before: Arc<AtomicUsize>,
  after: Arc<AtomicUsize>,
}

#[async_trait]
impl Operator for HookCounter {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Map
  }

  async fn before_dag_run(&self, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    self.before.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn after_dag_end(&self, _run_id: RunId) -> Result<(), OperatorError> {
    self.after.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let run_id = current_dag_context()
      .map(|ctx| ctx.run_id().as_u64())
      .ok_or_else(|| OperatorError::failed("no current dag context"))?;
    task.set_task_output(TaskOutput::Value(json!(run_id)));
    Ok(())
  }
}

#[tokio::test]
async fn test_hooks_fire_once_per_run() {
  let before = Arc::new(AtomicUsize::new(0));
  let after = Arc::new(AtomicUsize::new(0));
  let mut builder = DagBuilder::new("hooks");
  builder.add_named(
    "hook",
    HookCounter {
      before: Arc::clone(&before),
      after: Arc::clone(&after),
    },
  );
  let dag = Arc::new(builder.build().unwrap());

  let runner = WorkflowRunner::new();
  let ctx = runner.execute_workflow(&dag, "hook", None, false, None, None).await.unwrap();
  assert_eq!(
    ctx.task("hook").unwrap().task_output().value(),
    Some(&json!(ctx.run_id().as_u64()))
  );
  assert_eq!(before.load(Ordering::SeqCst), 1);
  assert_eq!(after.load(Ordering::SeqCst), 1);

  // A second end for the same run is a no-op.
  dag.after_dag_end(ctx.run_id()).await;
  assert_eq!(after.load(Ordering::SeqCst), 1);
  assert!(dag.dag_context(ctx.run_id()).is_none());
}

#[tokio::test]
async fn test_streaming_call_defers_hooks_until_drop() {
  let after = Arc::new(AtomicUsize::new(0));
  let mut builder = DagBuilder::new("stream_hooks");
  let hook = builder.add_named(
    "hook",
    HookCounter {
      before: Arc::new(AtomicUsize::new(0)),
      after: Arc::clone(&after),
    },
  );
  let streamify = builder.add_named("streamify", StreamifyOperator::array());
  builder.connect(&hook, &streamify);
  let dag = Arc::new(builder.build().unwrap());

  let stream = WorkflowRunner::new().call_stream(&dag, "streamify", None).await.unwrap();
  assert_eq!(after.load(Ordering::SeqCst), 0);
  let items: Vec<Value> = stream.try_collect().await.unwrap();
  assert_eq!(items.len(), 1);

  for _ in 0..50 {
    if after.load(Ordering::SeqCst) == 1 {
      break;
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
  }
  assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sub_dag_shares_context() {
  let mut outer = DagBuilder::new("outer");
  outer.add_named("outer_input", InputOperator::from_value(json!(2)));
  let outer = Arc::new(outer.build().unwrap());

  let mut inner = DagBuilder::new("inner");
  let trigger = inner.add_named("inner_trigger", TriggerOperator::new());
  let double = inner.add_named("double", MapOperator::from_fn(|v| Ok(json!(as_i64(&v)? * 2))));
  inner.connect(&trigger, &double);
  let inner = Arc::new(inner.build().unwrap());

  let runner = WorkflowRunner::new();
  let ctx = runner
    .execute_workflow(&outer, "outer_input", None, false, None, None)
    .await
    .unwrap();
  let ctx = runner
    .execute_workflow(&inner, "double", Some(json!(21)), false, Some(Arc::clone(&ctx)), None)
    .await
    .unwrap();

  let states: Vec<String> = ctx.task_states().into_iter().map(|(id, _)| id).collect();
  assert_eq!(states, vec!["outer_input", "inner_trigger", "double"]);
  assert_eq!(ctx.task("double").unwrap().task_output().value(), Some(&json!(42)));
}
