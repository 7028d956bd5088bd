use std::sync::Arc;

use async_trait::async_trait;
use awel_task::TaskContext;
use serde_json::Value;

use crate::context::DagContext;
use crate::error::OperatorError;
use crate::functions::{JoinFunction, SyncFn};
use crate::operator::{Operator, OperatorKind};

/// Combines the values of all parents, in input-pin order.
pub struct JoinOperator {
  func: Arc<dyn JoinFunction>,
}

impl JoinOperator {
  pub fn new(func: impl JoinFunction + 'static) -> Self {
    Self { func: Arc::new(func) }
  }

  pub fn from_fn<F>(f: F) -> Self
  where
    F: Fn(Vec<Option<Value>>) -> Result<Value, OperatorError> + Send + Sync + 'static,
  {
    Self::new(SyncFn(f))
  }
}

#[async_trait]
impl Operator for JoinOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Join
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let values = task.task_input().values()?;
    let joined = self.func.join(values).await?;
    task.set_task_output(joined.into());
    Ok(())
  }
}

/// The reconciling end of a branch. Never skipped; by default forwards the
/// first parent output that is neither empty nor skipped.
#[derive(Default)]
pub struct BranchJoinOperator {
  func: Option<Arc<dyn JoinFunction>>,
}

impl BranchJoinOperator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_join(func: impl JoinFunction + 'static) -> Self {
    Self {
      func: Some(Arc::new(func)),
    }
  }
}

#[async_trait]
impl Operator for BranchJoinOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::BranchJoin
  }

  fn can_skip_in_branch(&self) -> bool {
    false
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let output = match &self.func {
      Some(func) => func.join(task.task_input().values()?).await?.into(),
      None => task.task_input().first_non_empty(),
    };
    task.set_task_output(output);
    Ok(())
  }
}
