use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use awel_task::{TaskContext, TaskError, TaskOutput};
use serde_json::Value;

use crate::context::DagContext;
use crate::error::OperatorError;
use crate::functions::{MapFunction, SyncFn};
use crate::operator::{Operator, OperatorKind, single_input};

/// Applies a function to its call data or its single parent's output.
///
/// Stream inputs are mapped lazily, item by item.
pub struct MapOperator {
  func: Arc<dyn MapFunction>,
}

impl MapOperator {
  pub fn new(func: impl MapFunction + 'static) -> Self {
    Self { func: Arc::new(func) }
  }

  pub fn from_arc(func: Arc<dyn MapFunction>) -> Self {
    Self { func }
  }

  pub fn from_fn<F>(f: F) -> Self
  where
    F: Fn(Value) -> Result<Value, OperatorError> + Send + Sync + 'static,
  {
    Self::new(SyncFn(f))
  }

  pub fn from_async_fn<F, Fut>(f: F) -> Self
  where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, OperatorError>> + Send + 'static,
  {
    Self::new(f)
  }
}

#[async_trait]
impl Operator for MapOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Map
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let input = single_input(task)?;
    let output = match &input {
      TaskOutput::Value(v) => TaskOutput::Value(self.func.map(v.clone()).await?),
      TaskOutput::Stream(_) => {
        let func = Arc::clone(&self.func);
        input
          .map_async(move |v| {
            let func = Arc::clone(&func);
            async move { func.map(v).await.map_err(TaskError::from) }
          })
          .await?
      }
      TaskOutput::Empty | TaskOutput::Skip => input.clone(),
    };
    task.set_task_output(output);
    Ok(())
  }
}
