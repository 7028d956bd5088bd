use std::sync::Arc;

use async_trait::async_trait;
use awel_task::{OutputStream, TaskContext, TaskOutput};
use futures::StreamExt;
use serde_json::Value;

use crate::context::DagContext;
use crate::error::OperatorError;
use crate::functions::{StreamifyFunction, TransformStreamFunction, UnstreamifyFunction};
use crate::operator::{Operator, OperatorKind, single_input};

/// Stream the elements of an array; any other value becomes a single item.
pub fn array_items(value: Value) -> OutputStream<Value> {
  let items = match value {
    Value::Array(items) => items,
    other => vec![other],
  };
  futures::stream::iter(items.into_iter().map(Ok)).boxed()
}

/// Turns a value into a stream.
pub struct StreamifyOperator {
  func: Arc<dyn StreamifyFunction>,
}

impl StreamifyOperator {
  pub fn new(func: impl StreamifyFunction + 'static) -> Self {
    Self { func: Arc::new(func) }
  }

  /// Streamify the elements of an array value.
  pub fn array() -> Self {
    Self::new(array_items)
  }
}

#[async_trait]
impl Operator for StreamifyOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Streamify
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let output = match single_input(task)? {
      TaskOutput::Empty => TaskOutput::Empty,
      input => input.streamify(|v| self.func.streamify(v))?,
    };
    task.set_task_output(output);
    Ok(())
  }
}

/// Collects a stream into one value. Without a function the items are
/// gathered into an array.
#[derive(Default)]
pub struct UnstreamifyOperator {
  func: Option<Arc<dyn UnstreamifyFunction>>,
}

impl UnstreamifyOperator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_fn(func: impl UnstreamifyFunction + 'static) -> Self {
    Self {
      func: Some(Arc::new(func)),
    }
  }
}

#[async_trait]
impl Operator for UnstreamifyOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Unstreamify
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let output = match task.task_input().check_single_parent()?.task_output().unstreamify().await? {
      TaskOutput::Value(items) => match &self.func {
        Some(func) => TaskOutput::Value(func.unstreamify(items).await?),
        None => TaskOutput::Value(Value::Array(items)),
      },
      TaskOutput::Skip => TaskOutput::Skip,
      _ => TaskOutput::Empty,
    };
    task.set_task_output(output);
    Ok(())
  }
}

/// Rewrites a stream into another stream.
pub struct TransformStreamOperator {
  func: Arc<dyn TransformStreamFunction>,
}

impl TransformStreamOperator {
  pub fn new(func: impl TransformStreamFunction + 'static) -> Self {
    Self { func: Arc::new(func) }
  }
}

#[async_trait]
impl Operator for TransformStreamOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::TransformStream
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let output = task
      .task_input()
      .check_single_parent()?
      .task_output()
      .transform_stream(|s| self.func.transform(s))?;
    task.set_task_output(output);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::TryStreamExt;
  use serde_json::json;

  #[tokio::test]
  async fn test_array_items() {
    let items: Vec<Value> = array_items(json!([1, 2])).try_collect().await.unwrap();
    assert_eq!(items, vec![json!(1), json!(2)]);
    let items: Vec<Value> = array_items(json!("x")).try_collect().await.unwrap();
    assert_eq!(items, vec![json!("x")]);
  }
}
