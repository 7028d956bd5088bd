//! The operator contract and the built-in operator kinds.

mod branch;
mod input;
mod join;
mod map;
mod reduce;
mod stream;

pub use branch::{BranchOperator, SKIP_NODE_NAMES};
pub use input::{
  CallDataInputSource, InputOperator, InputSource, IterableInputSource, StreamInputSource, TriggerOperator,
  ValueInputSource,
};
pub use join::{BranchJoinOperator, JoinOperator};
pub use map::MapOperator;
pub use reduce::ReduceStreamOperator;
pub use stream::{StreamifyOperator, TransformStreamOperator, UnstreamifyOperator, array_items};

use std::fmt;

use async_trait::async_trait;
use awel_task::{TaskContext, TaskOutput};
use awel_variables::{VariablesPlaceHolder, is_variable_string};
use serde_json::Value;

use crate::context::{DagContext, RunId};
use crate::error::OperatorError;

/// Metadata key under which the runner stores resolved variables.
pub const RESOLVED_VARIABLES: &str = "resolved_variables";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
  Map,
  Reduce,
  Join,
  BranchJoin,
  Branch,
  Input,
  Trigger,
  Streamify,
  Unstreamify,
  TransformStream,
}

impl OperatorKind {
  pub fn as_str(self) -> &'static str {
    match self {
      OperatorKind::Map => "map",
      OperatorKind::Reduce => "reduce",
      OperatorKind::Join => "join",
      OperatorKind::BranchJoin => "branch_join",
      OperatorKind::Branch => "branch",
      OperatorKind::Input => "input",
      OperatorKind::Trigger => "trigger",
      OperatorKind::Streamify => "streamify",
      OperatorKind::Unstreamify => "unstreamify",
      OperatorKind::TransformStream => "transform_stream",
    }
  }
}

impl fmt::Display for OperatorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

mod sealed {
  use std::any::Any;
  /// Upcast to [`Any`]. Not nameable outside this crate, so it can only be
  /// reached through a `dyn Operator` and never through a smart pointer.
  pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
  }

  impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
      self
    }
  }
}

/// A node body.
///
/// `run` reads its inputs from `task` (call data and parent outputs) and must
/// leave its result in `task`'s output. Operators are shared by every run of
/// a DAG, so per-run state belongs in the task or the [`DagContext`].
#[async_trait]
pub trait Operator: sealed::AsAny + Send + Sync + 'static {
  fn kind(&self) -> OperatorKind;

  /// Whether a branch may elide this node.
  fn can_skip_in_branch(&self) -> bool {
    true
  }

  /// Attributes configured as variable references, resolved by the runner
  /// before `run`.
  fn variable_placeholders(&self) -> Vec<VariablesPlaceHolder> {
    Vec::new()
  }

  async fn before_dag_run(&self, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    Ok(())
  }

  async fn after_dag_end(&self, _run_id: RunId) -> Result<(), OperatorError> {
    Ok(())
  }

  async fn run(&self, task: &mut TaskContext<Value>, dag_ctx: &DagContext) -> Result<(), OperatorError>;
}

impl<'a> dyn Operator + 'a {
  /// The concrete operator behind this node, if it is a `T`.
  pub fn downcast_ref<T: Operator>(&self) -> Option<&T> {
    sealed::AsAny::as_any(self).downcast_ref::<T>()
  }

  pub fn is<T: Operator>(&self) -> bool {
    self.downcast_ref::<T>().is_some()
  }
}

/// An operator attribute: either a literal or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
  Literal(Value),
  Variable(VariablesPlaceHolder),
}

impl Param {
  /// Promote strings of the form `${...}` to variable references.
  pub fn from_value(name: &str, value: Value) -> Self {
    match value {
      Value::String(s) if is_variable_string(&s) => Param::Variable(VariablesPlaceHolder::new(name, s, None)),
      other => Param::Literal(other),
    }
  }

  pub fn variable(name: &str, full_key: &str, default: Option<Value>) -> Self {
    Param::Variable(VariablesPlaceHolder::new(name, full_key, default))
  }

  pub fn placeholder(&self) -> Option<&VariablesPlaceHolder> {
    match self {
      Param::Variable(holder) => Some(holder),
      Param::Literal(_) => None,
    }
  }

  /// The value for the current run.
  pub fn resolve(&self, task: &TaskContext<Value>) -> Result<Value, OperatorError> {
    match self {
      Param::Literal(value) => Ok(value.clone()),
      Param::Variable(holder) => task
        .metadata_value(RESOLVED_VARIABLES)
        .and_then(|vars| vars.get(&holder.param_name))
        .cloned()
        .ok_or_else(|| OperatorError::UnresolvedParameter {
          name: holder.param_name.clone(),
        }),
    }
  }
}

impl From<Value> for Param {
  fn from(value: Value) -> Self {
    Param::Literal(value)
  }
}

/// Collect the placeholders of a set of params.
pub fn placeholders<'a>(params: impl IntoIterator<Item = &'a Param>) -> Vec<VariablesPlaceHolder> {
  params.into_iter().filter_map(|p| p.placeholder().cloned()).collect()
}

/// The input of a single-input operator: its call data when present,
/// otherwise its only parent's output.
pub fn single_input(task: &TaskContext<Value>) -> Result<TaskOutput<Value>, OperatorError> {
  if let Some(data) = task.call_data() {
    return Ok(TaskOutput::Value(data.clone()));
  }
  Ok(task.task_input().check_single_parent()?.task_output().clone())
}
