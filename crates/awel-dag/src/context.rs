use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use awel_task::{TaskContext, TaskState};
use awel_variables::{DagVariables, VariablesIdentifier, VariablesPlaceHolder, VariablesProvider};
use serde_json::Value;
use tracing::debug;

use crate::error::OperatorError;

tokio::task_local! {
  /// The context of the run the current task belongs to.
  pub static CURRENT_DAG_CONTEXT: Arc<DagContext>;
}

/// The context of the run executing on the current task, if any.
pub fn current_dag_context() -> Option<Arc<DagContext>> {
  CURRENT_DAG_CONTEXT.try_with(Arc::clone).ok()
}

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one DAG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl RunId {
  pub(crate) fn next() -> Self {
    RunId(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
  }

  pub fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for RunId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Default)]
struct TaskArena {
  index: HashMap<String, usize>,
  tasks: Vec<Arc<TaskContext<Value>>>,
}

impl TaskArena {
  fn get(&self, node_id: &str) -> Option<Arc<TaskContext<Value>>> {
    self.index.get(node_id).map(|&i| Arc::clone(&self.tasks[i]))
  }

  fn set(&mut self, node_id: &str, task: Arc<TaskContext<Value>>) {
    match self.index.get(node_id) {
      Some(&i) => self.tasks[i] = task,
      None => {
        self.index.insert(node_id.to_string(), self.tasks.len());
        self.tasks.push(task);
      }
    }
  }
}

/// Per-run state shared by every node of the run.
///
/// Task contexts live in an arena indexed by node id; a sub-DAG run that
/// reuses this context appends its own nodes.
pub struct DagContext {
  run_id: RunId,
  dag_id: String,
  streaming_call: bool,
  variables: Option<DagVariables>,
  tasks: RwLock<TaskArena>,
  share_data: Mutex<HashMap<String, Value>>,
  resolved: Mutex<HashMap<String, Value>>,
}

impl fmt::Debug for DagContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DagContext")
      .field("run_id", &self.run_id)
      .field("dag_id", &self.dag_id)
      .field("streaming_call", &self.streaming_call)
      .finish_non_exhaustive()
  }
}

impl DagContext {
  pub fn new(dag_id: impl Into<String>, streaming_call: bool, variables: Option<DagVariables>) -> Self {
    Self {
      run_id: RunId::next(),
      dag_id: dag_id.into(),
      streaming_call,
      variables,
      tasks: RwLock::new(TaskArena::default()),
      share_data: Mutex::new(HashMap::new()),
      resolved: Mutex::new(HashMap::new()),
    }
  }

  pub fn run_id(&self) -> RunId {
    self.run_id
  }

  pub fn dag_id(&self) -> &str {
    &self.dag_id
  }

  pub fn streaming_call(&self) -> bool {
    self.streaming_call
  }

  pub fn variables(&self) -> Option<&DagVariables> {
    self.variables.as_ref()
  }

  pub fn task(&self, node_id: &str) -> Option<Arc<TaskContext<Value>>> {
    self.tasks.read().unwrap_or_else(|e| e.into_inner()).get(node_id)
  }

  pub fn set_task(&self, node_id: &str, task: Arc<TaskContext<Value>>) {
    self
      .tasks
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .set(node_id, task);
  }

  pub fn task_state(&self, node_id: &str) -> Option<TaskState> {
    self.task(node_id).map(|t| t.state())
  }

  /// Node ids and states in the order nodes were first recorded.
  pub fn task_states(&self) -> Vec<(String, TaskState)> {
    let arena = self.tasks.read().unwrap_or_else(|e| e.into_inner());
    let mut ids: Vec<(&String, &usize)> = arena.index.iter().collect();
    ids.sort_by_key(|(_, i)| **i);
    ids
      .into_iter()
      .map(|(id, &i)| (id.clone(), arena.tasks[i].state()))
      .collect()
  }

  /// Node ids marked skipped in this run.
  pub fn skipped_nodes(&self) -> HashSet<String> {
    self
      .task_states()
      .into_iter()
      .filter(|(_, state)| *state == TaskState::Skip)
      .map(|(id, _)| id)
      .collect()
  }

  pub fn share_data(&self, key: &str) -> Option<Value> {
    self.share_data.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
  }

  /// Store shared data; the last writer wins.
  pub fn save_share_data(&self, key: impl Into<String>, value: Value) {
    self
      .share_data
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(key.into(), value);
  }

  /// Resolve a placeholder for a node of `dag_id`: DAG variables first, then
  /// `provider`. Results are cached for the rest of the run.
  pub async fn resolve_variable(
    &self,
    holder: &VariablesPlaceHolder,
    dag_id: &str,
    provider: Option<&dyn VariablesProvider>,
  ) -> Result<Value, OperatorError> {
    let mut id: VariablesIdentifier = holder.identifier()?;
    if id.is_flow_private() && id.scope_key.is_none() {
      id.scope_key = Some(dag_id.to_string());
    }
    let cache_key = id.str_identifier();
    if let Some(value) = self.resolved.lock().unwrap_or_else(|e| e.into_inner()).get(&cache_key) {
      return Ok(value.clone());
    }

    let local = self.variables.as_ref().and_then(|v| v.lookup(&id)).map(|v| v.value.clone());
    let value = match (local, provider) {
      (Some(value), _) => value,
      (None, Some(provider)) => provider.get_value(&id, holder.default.clone()).await?,
      (None, None) => match &holder.default {
        Some(default) => default.clone(),
        None => {
          return Err(
            awel_variables::VariablesError::NotFound {
              key: cache_key,
            }
            .into(),
          );
        }
      },
    };

    debug!(run_id = %self.run_id, variable = %cache_key, "variable_resolved");
    self
      .resolved
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(cache_key, value.clone());
    Ok(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use awel_variables::{StorageVariables, VARIABLES_SCOPE_FLOW_PRIVATE};
  use serde_json::json;

  #[test]
  fn test_run_ids_unique() {
    let a = DagContext::new("d", false, None);
    let b = DagContext::new("d", false, None);
    assert_ne!(a.run_id(), b.run_id());
  }

  #[test]
  fn test_arena_replace_and_append() {
    let ctx = DagContext::new("d", false, None);
    ctx.set_task("a", Arc::new(TaskContext::new("a")));
    ctx.set_task("b", Arc::new(TaskContext::skipped("b")));
    let mut done = TaskContext::new("a");
    done.set_state(TaskState::Running).unwrap();
    done.set_state(TaskState::Success).unwrap();
    ctx.set_task("a", Arc::new(done));
    assert_eq!(
      ctx.task_states(),
      vec![("a".to_string(), TaskState::Success), ("b".to_string(), TaskState::Skip)]
    );
    assert_eq!(ctx.skipped_nodes(), HashSet::from(["b".to_string()]));
  }

  #[test]
  fn test_share_data_last_writer_wins() {
    let ctx = DagContext::new("d", false, None);
    ctx.save_share_data("k", json!(1));
    ctx.save_share_data("k", json!(2));
    assert_eq!(ctx.share_data("k"), Some(json!(2)));
    assert_eq!(ctx.share_data("missing"), None);
  }

  #[tokio::test]
  async fn test_flow_private_variable_scoped_to_dag() {
    let vars = DagVariables::new(vec![
      StorageVariables::new("k", "n", json!("mine")).with_scope(VARIABLES_SCOPE_FLOW_PRIVATE, Some("dag_1".into())),
    ]);
    let ctx = DagContext::new("dag_1", false, Some(vars));
    let holder = VariablesPlaceHolder::new("p", "${k:n@flow_priv}", None);
    let value = ctx.resolve_variable(&holder, "dag_1", None).await.unwrap();
    assert_eq!(value, json!("mine"));

    let err = ctx.resolve_variable(&holder, "dag_2", None).await.unwrap_err();
    assert!(matches!(err, OperatorError::Variables(_)));
  }

  #[tokio::test]
  async fn test_current_dag_context_scope() {
    assert!(current_dag_context().is_none());
    let ctx = Arc::new(DagContext::new("d", false, None));
    let run_id = ctx.run_id();
    let seen = CURRENT_DAG_CONTEXT
      .scope(ctx, async { current_dag_context().map(|c| c.run_id()) })
      .await;
    assert_eq!(seen, Some(run_id));
  }
}
