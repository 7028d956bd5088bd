use std::collections::HashMap;

use serde_json::Value;

use crate::error::TaskError;
use crate::input::InputContext;
use crate::output::TaskOutput;

/// Execution state of one task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
  #[default]
  Init,
  Running,
  Success,
  Failed,
  Skip,
}

impl TaskState {
  pub fn is_finished(self) -> bool {
    matches!(self, TaskState::Success | TaskState::Failed | TaskState::Skip)
  }

  /// Whether a task may move from `self` to `next`. Staying put is allowed.
  pub fn can_transition_to(self, next: TaskState) -> bool {
    use TaskState::*;
    self == next
      || matches!(
        (self, next),
        (Init, Running) | (Init, Skip) | (Init, Failed) | (Running, Success) | (Running, Failed)
      )
  }

  pub fn as_str(self) -> &'static str {
    match self {
      TaskState::Init => "init",
      TaskState::Running => "running",
      TaskState::Success => "success",
      TaskState::Failed => "failed",
      TaskState::Skip => "skip",
    }
  }
}

impl std::fmt::Display for TaskState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Per-run record of one operator.
#[derive(Debug, Clone)]
pub struct TaskContext<T> {
  task_id: String,
  state: TaskState,
  task_input: InputContext<T>,
  task_output: TaskOutput<T>,
  call_data: Option<T>,
  log_id: Option<u64>,
  metadata: HashMap<String, Value>,
}

impl<T> TaskContext<T> {
  pub fn new(task_id: impl Into<String>) -> Self {
    Self {
      task_id: task_id.into(),
      state: TaskState::Init,
      task_input: InputContext::default(),
      task_output: TaskOutput::Empty,
      call_data: None,
      log_id: None,
      metadata: HashMap::new(),
    }
  }

  /// A context for a node elided by a branch.
  pub fn skipped(task_id: impl Into<String>) -> Self {
    let mut ctx = Self::new(task_id);
    ctx.state = TaskState::Skip;
    ctx.task_output = TaskOutput::Skip;
    ctx
  }

  pub fn task_id(&self) -> &str {
    &self.task_id
  }

  pub fn state(&self) -> TaskState {
    self.state
  }

  /// Move to `state`. Finished states are final, and only a running task
  /// can succeed.
  pub fn set_state(&mut self, state: TaskState) -> Result<(), TaskError> {
    if !self.state.can_transition_to(state) {
      return Err(TaskError::InvalidStateTransition {
        from: self.state,
        to: state,
      });
    }
    self.state = state;
    Ok(())
  }

  pub fn task_input(&self) -> &InputContext<T> {
    &self.task_input
  }

  pub fn set_task_input(&mut self, input: InputContext<T>) {
    self.task_input = input;
  }

  pub fn task_output(&self) -> &TaskOutput<T> {
    &self.task_output
  }

  pub fn set_task_output(&mut self, output: TaskOutput<T>) {
    self.task_output = output;
  }

  pub fn take_task_output(&mut self) -> TaskOutput<T> {
    std::mem::replace(&mut self.task_output, TaskOutput::Empty)
  }

  pub fn call_data(&self) -> Option<&T> {
    self.call_data.as_ref()
  }

  pub fn set_call_data(&mut self, call_data: Option<T>) {
    self.call_data = call_data;
  }

  pub fn log_id(&self) -> Option<u64> {
    self.log_id
  }

  pub fn set_log_id(&mut self, log_id: u64) {
    self.log_id = Some(log_id);
  }

  pub fn metadata(&self) -> &HashMap<String, Value> {
    &self.metadata
  }

  pub fn metadata_value(&self, key: &str) -> Option<&Value> {
    self.metadata.get(key)
  }

  pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
    self.metadata.insert(key.into(), value);
  }
}
