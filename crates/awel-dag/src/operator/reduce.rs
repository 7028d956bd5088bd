use std::sync::Arc;

use async_trait::async_trait;
use awel_task::{TaskContext, TaskError};
use serde_json::Value;

use crate::context::DagContext;
use crate::error::OperatorError;
use crate::functions::{ReduceFunction, SyncFn};
use crate::operator::{Operator, OperatorKind};

/// Folds its single parent's stream into one value, seeded with the first
/// item.
pub struct ReduceStreamOperator {
  func: Arc<dyn ReduceFunction>,
}

impl ReduceStreamOperator {
  pub fn new(func: impl ReduceFunction + 'static) -> Self {
    Self { func: Arc::new(func) }
  }

  pub fn from_fn<F>(f: F) -> Self
  where
    F: Fn(Value, Value) -> Result<Value, OperatorError> + Send + Sync + 'static,
  {
    Self::new(SyncFn(f))
  }
}

#[async_trait]
impl Operator for ReduceStreamOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Reduce
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let func = &self.func;
    let output = task
      .task_input()
      .reduce(|acc, item| async move { func.reduce(acc, item).await.map_err(TaskError::from) })
      .await?;
    task.set_task_output(output);
    Ok(())
  }
}
