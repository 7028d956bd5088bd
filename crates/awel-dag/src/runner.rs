//! The workflow runner.
//!
//! A run starts at a leaf and descends recursively through its upstream
//! nodes, so every node executes after all of its parents: an implicit
//! topological order. Siblings run one after another, in input-pin order.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use awel_task::{InputContext, OutputStream, TaskContext, TaskError, TaskOutput, TaskState};
use awel_variables::{DagVariables, VariablesProvider};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::context::{CURRENT_DAG_CONTEXT, DagContext};
use crate::dag::{Dag, DagNode};
use crate::error::{OperatorError, RunnerError};
use crate::job::JobManager;
use crate::operator::{OperatorKind, RESOLVED_VARIABLES, SKIP_NODE_NAMES};

/// Executes DAGs. One runner can drive any number of DAGs and concurrent
/// runs; per-run state lives in each run's [`DagContext`].
pub struct WorkflowRunner {
  provider: Option<Arc<dyn VariablesProvider>>,
  next_log_id: AtomicU64,
}

impl Default for WorkflowRunner {
  fn default() -> Self {
    Self::new()
  }
}

impl WorkflowRunner {
  pub fn new() -> Self {
    Self {
      provider: None,
      next_log_id: AtomicU64::new(1),
    }
  }

  /// Resolve variable placeholders against `provider` after the DAG's own
  /// variables.
  pub fn with_provider(mut self, provider: Arc<dyn VariablesProvider>) -> Self {
    self.provider = Some(provider);
    self
  }

  pub fn provider(&self) -> Option<&Arc<dyn VariablesProvider>> {
    self.provider.as_ref()
  }

  /// Run the part of `dag` that `leaf_id` depends on and return the run's
  /// context.
  ///
  /// Passing `exist_ctx` runs inside an existing run (sub-DAG composition):
  /// nodes already finished there are not run again, and the outer run owns
  /// the lifecycle hooks. Otherwise a fresh context is created and, unless
  /// the call is streaming, post-run hooks fire before returning. Failed
  /// runs always fire them.
  #[instrument(
    name = "workflow_execute",
    skip(self, dag, call_data, exist_ctx, dag_variables),
    fields(
      dag_id = %dag.dag_id(),
      leaf = %leaf_id,
    )
  )]
  pub async fn execute_workflow(
    &self,
    dag: &Arc<Dag>,
    leaf_id: &str,
    call_data: Option<Value>,
    streaming_call: bool,
    exist_ctx: Option<Arc<DagContext>>,
    dag_variables: Option<DagVariables>,
  ) -> Result<Arc<DagContext>, RunnerError> {
    let job = JobManager::build_from_end_node(dag, leaf_id, call_data)?;

    let nested = exist_ctx.is_some();
    let ctx = match exist_ctx {
      Some(ctx) => ctx,
      None => {
        let variables = match (dag_variables, dag.default_variables()) {
          (Some(run), Some(defaults)) => Some(run.merge(defaults)),
          (Some(run), None) => Some(run),
          (None, defaults) => defaults.cloned(),
        };
        Arc::new(DagContext::new(dag.dag_id(), streaming_call, variables))
      }
    };

    info!(
      run_id = %ctx.run_id(),
      dag_id = %dag.dag_id(),
      nodes = job.len(),
      streaming = streaming_call,
      nested,
      "workflow_started"
    );

    if !nested {
      dag.save_dag_context(Arc::clone(&ctx));
      if let Err((node_id, source)) = job.before_dag_run(dag, &ctx).await {
        error!(run_id = %ctx.run_id(), node_id = %node_id, error = %source, "before_dag_run_failed");
        dag.after_dag_end(ctx.run_id()).await;
        return Err(RunnerError::NodeFailed { node_id, source });
      }
    }

    let result = self.execute_node(dag, job.leaf(), &job, &ctx).await;

    match &result {
      Ok(()) => info!(run_id = %ctx.run_id(), "workflow_completed"),
      Err(e) => error!(run_id = %ctx.run_id(), error = %e, "workflow_failed"),
    }
    if !nested && (!streaming_call || result.is_err()) {
      dag.after_dag_end(ctx.run_id()).await;
    }
    result.map(|()| ctx)
  }

  /// Run to `leaf_id` and return its output.
  pub async fn call(&self, dag: &Arc<Dag>, leaf_id: &str, call_data: Option<Value>) -> Result<TaskOutput<Value>, RunnerError> {
    let ctx = self.execute_workflow(dag, leaf_id, call_data, false, None, None).await?;
    leaf_output(&ctx, leaf_id)
  }

  /// Run to `leaf_id` and return its output as a stream. A value output
  /// becomes a single item.
  ///
  /// Post-run hooks fire once the returned stream is dropped.
  pub async fn call_stream(
    &self,
    dag: &Arc<Dag>,
    leaf_id: &str,
    call_data: Option<Value>,
  ) -> Result<OutputStream<Value>, RunnerError> {
    let ctx = self.execute_workflow(dag, leaf_id, call_data, true, None, None).await?;
    let guard = DagEndGuard {
      dag: Arc::clone(dag),
      ctx: Arc::clone(&ctx),
    };
    let stream = match leaf_output(&ctx, leaf_id).and_then(|out| Ok(out.to_stream()?)) {
      Ok(stream) => stream,
      Err(e) => {
        drop(guard);
        return Err(e);
      }
    };
    Ok(Box::pin(GuardedStream { inner: stream, _guard: guard }))
  }

  fn execute_node<'a>(
    &'a self,
    dag: &'a Dag,
    index: usize,
    job: &'a JobManager,
    ctx: &'a Arc<DagContext>,
  ) -> BoxFuture<'a, Result<(), RunnerError>> {
    Box::pin(async move {
      let node = dag.node_at(index);
      if is_finished(ctx, node) {
        return Ok(());
      }

      for &parent in node.upstream() {
        self.execute_node(dag, parent, job, ctx).await?;
      }
      // A branch among the parents may have skipped this node.
      if is_finished(ctx, node) {
        return Ok(());
      }

      let parents = node
        .upstream()
        .iter()
        .filter_map(|&i| ctx.task(dag.node_at(i).node_id()))
        .collect();
      let mut task = TaskContext::new(node.node_id());
      task.set_task_input(InputContext::new(parents));
      task.set_call_data(job.call_data(node.node_id()).cloned());
      task.set_log_id(self.next_log_id.fetch_add(1, Ordering::Relaxed));

      match self.resolve_placeholders(dag, node, ctx).await {
        Ok(resolved) if !resolved.is_empty() => task.set_metadata(RESOLVED_VARIABLES, Value::Object(resolved)),
        Ok(_) => {}
        Err(source) => return Err(fail(ctx, node, task, source)),
      }

      if let Err(e) = task.set_state(TaskState::Running) {
        return Err(fail(ctx, node, task, e.into()));
      }
      ctx.set_task(node.node_id(), Arc::new(task.clone()));

      if let Err(source) = self.run_node(node, &mut task, ctx).await {
        return Err(fail(ctx, node, task, source));
      }

      if node.downstream().len() > 1 && task.task_output().is_stream() {
        let output = task.take_task_output().into_reentrant()?;
        task.set_task_output(output);
      }
      let skip_names = skip_node_names(node, &task);
      if let Err(e) = task.set_state(TaskState::Success) {
        return Err(fail(ctx, node, task, e.into()));
      }
      ctx.set_task(node.node_id(), Arc::new(task));

      for name in skip_names {
        skip_branch(dag, node, &name, ctx);
      }
      Ok(())
    })
  }

  #[instrument(
    name = "node_execute",
    skip(self, node, task, ctx),
    fields(
      run_id = %ctx.run_id(),
      node_id = %node.node_id(),
      kind = %node.operator().kind(),
    )
  )]
  async fn run_node(&self, node: &DagNode, task: &mut TaskContext<Value>, ctx: &Arc<DagContext>) -> Result<(), OperatorError> {
    debug!(log_id = ?task.log_id(), "node_started");
    CURRENT_DAG_CONTEXT
      .scope(Arc::clone(ctx), node.operator().run(task, ctx))
      .await?;
    debug!(output = task.task_output().kind(), "node_completed");
    Ok(())
  }

  async fn resolve_placeholders(
    &self,
    dag: &Dag,
    node: &DagNode,
    ctx: &DagContext,
  ) -> Result<Map<String, Value>, OperatorError> {
    let mut resolved = Map::new();
    for holder in node.operator().variable_placeholders() {
      let value = ctx
        .resolve_variable(&holder, dag.dag_id(), self.provider.as_deref())
        .await?;
      resolved.insert(holder.param_name.clone(), value);
    }
    Ok(resolved)
  }
}

fn is_finished(ctx: &DagContext, node: &DagNode) -> bool {
  ctx
    .task_state(node.node_id())
    .is_some_and(TaskState::is_finished)
}

fn fail(ctx: &DagContext, node: &DagNode, mut task: TaskContext<Value>, source: OperatorError) -> RunnerError {
  error!(run_id = %ctx.run_id(), node_id = %node.node_id(), error = %source, "node_failed");
  if let Err(e) = task.set_state(TaskState::Failed) {
    warn!(node_id = %node.node_id(), error = %e, "task_state_unchanged");
  }
  ctx.set_task(node.node_id(), Arc::new(task));
  RunnerError::NodeFailed {
    node_id: node.node_id().to_string(),
    source,
  }
}

fn skip_node_names(node: &DagNode, task: &TaskContext<Value>) -> Vec<String> {
  if node.operator().kind() != OperatorKind::Branch {
    return Vec::new();
  }
  match task.metadata_value(SKIP_NODE_NAMES) {
    Some(Value::Array(names)) => names.iter().filter_map(|n| n.as_str().map(str::to_string)).collect(),
    _ => Vec::new(),
  }
}

/// Mark the branch target called `name` and every skippable node below it
/// as skipped. Nodes that cannot be skipped stop the walk.
fn skip_branch(dag: &Dag, branch: &DagNode, name: &str, ctx: &DagContext) {
  let mut stack: Vec<usize> = branch
    .downstream()
    .iter()
    .copied()
    .filter(|&i| dag.node_at(i).name() == name)
    .collect();
  if stack.is_empty() {
    warn!(run_id = %ctx.run_id(), node_id = %branch.node_id(), target = %name, "branch_target_not_found");
  }
  while let Some(i) = stack.pop() {
    let node = dag.node_at(i);
    if !node.operator().can_skip_in_branch() || is_finished(ctx, node) {
      continue;
    }
    debug!(run_id = %ctx.run_id(), node_id = %node.node_id(), "node_skipped");
    ctx.set_task(node.node_id(), Arc::new(TaskContext::skipped(node.node_id())));
    stack.extend(node.downstream().iter().copied());
  }
}

fn leaf_output(ctx: &DagContext, leaf_id: &str) -> Result<TaskOutput<Value>, RunnerError> {
  ctx
    .task(leaf_id)
    .map(|task| task.task_output().clone())
    .ok_or_else(|| RunnerError::MissingOutput {
      node_id: leaf_id.to_string(),
      run_id: ctx.run_id().as_u64(),
    })
}

/// Fires the post-run hooks of a streaming run when dropped.
struct DagEndGuard {
  dag: Arc<Dag>,
  ctx: Arc<DagContext>,
}

impl Drop for DagEndGuard {
  fn drop(&mut self) {
    let dag = Arc::clone(&self.dag);
    let run_id = self.ctx.run_id();
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn(async move { dag.after_dag_end(run_id).await });
      }
      Err(_) => warn!(run_id = %run_id, "after_dag_end_skipped_no_runtime"),
    }
  }
}

struct GuardedStream {
  inner: OutputStream<Value>,
  _guard: DagEndGuard,
}

impl Stream for GuardedStream {
  type Item = Result<Value, TaskError>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.inner.poll_next_unpin(cx)
  }
}
