use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use awel_task::{OutputStream, StreamOutput, TaskContext, TaskError, TaskOutput};
use serde_json::Value;

use crate::context::DagContext;
use crate::error::OperatorError;
use crate::operator::{Operator, OperatorKind};

/// Where an input operator gets its data from.
#[async_trait]
pub trait InputSource: Send + Sync {
  async fn read(&self, task: &TaskContext<Value>) -> Result<TaskOutput<Value>, OperatorError>;
}

/// Emits the same value on every run.
pub struct ValueInputSource(pub Value);

#[async_trait]
impl InputSource for ValueInputSource {
  async fn read(&self, _task: &TaskContext<Value>) -> Result<TaskOutput<Value>, OperatorError> {
    Ok(TaskOutput::Value(self.0.clone()))
  }
}

/// Emits its items as a fresh stream on every run.
pub struct IterableInputSource(pub Vec<Value>);

#[async_trait]
impl InputSource for IterableInputSource {
  async fn read(&self, _task: &TaskContext<Value>) -> Result<TaskOutput<Value>, OperatorError> {
    Ok(TaskOutput::from_items(self.0.clone()))
  }
}

/// Hands out a stream exactly once.
pub struct StreamInputSource {
  stream: Mutex<Option<OutputStream<Value>>>,
}

impl StreamInputSource {
  pub fn new(stream: OutputStream<Value>) -> Self {
    Self {
      stream: Mutex::new(Some(stream)),
    }
  }
}

#[async_trait]
impl InputSource for StreamInputSource {
  async fn read(&self, _task: &TaskContext<Value>) -> Result<TaskOutput<Value>, OperatorError> {
    let stream = self
      .stream
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take()
      .ok_or(TaskError::StreamConsumed)?;
    Ok(TaskOutput::Stream(StreamOutput::new(stream)))
  }
}

/// Reads the call data the runner attached to the task.
pub struct CallDataInputSource;

#[async_trait]
impl InputSource for CallDataInputSource {
  async fn read(&self, task: &TaskContext<Value>) -> Result<TaskOutput<Value>, OperatorError> {
    task
      .call_data()
      .map(|data| TaskOutput::Value(data.clone()))
      .ok_or(OperatorError::MissingCallData)
  }
}

/// A root operator fed by an [`InputSource`].
pub struct InputOperator {
  source: Arc<dyn InputSource>,
}

impl InputOperator {
  pub fn new(source: impl InputSource + 'static) -> Self {
    Self {
      source: Arc::new(source),
    }
  }

  pub fn from_value(value: Value) -> Self {
    Self::new(ValueInputSource(value))
  }

  pub fn from_items(items: Vec<Value>) -> Self {
    Self::new(IterableInputSource(items))
  }

  pub fn from_stream(stream: OutputStream<Value>) -> Self {
    Self::new(StreamInputSource::new(stream))
  }

  pub fn from_call_data() -> Self {
    Self::new(CallDataInputSource)
  }
}

#[async_trait]
impl Operator for InputOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Input
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let output = self.source.read(task).await?;
    task.set_task_output(output);
    Ok(())
  }
}

/// Entry point for external data. Emits whatever the trigger passed as call
/// data, or nothing when invoked without it.
#[derive(Default)]
pub struct TriggerOperator;

impl TriggerOperator {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl Operator for TriggerOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Trigger
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let output = match CallDataInputSource.read(task).await {
      Ok(output) => output,
      Err(OperatorError::MissingCallData) => TaskOutput::Empty,
      Err(e) => return Err(e),
    };
    task.set_task_output(output);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;
  use serde_json::json;

  #[tokio::test]
  async fn test_call_data_source_requires_data() {
    let task = TaskContext::new("t");
    let err = CallDataInputSource.read(&task).await.unwrap_err();
    assert!(matches!(err, OperatorError::MissingCallData));

    let mut task = TaskContext::new("t");
    task.set_call_data(Some(json!({"a": 1})));
    let out = CallDataInputSource.read(&task).await.unwrap();
    assert_eq!(out.value(), Some(&json!({"a": 1})));
  }

  #[tokio::test]
  async fn test_stream_source_reads_once() {
    let source = StreamInputSource::new(futures::stream::iter(vec![Ok::<_, TaskError>(json!(1))]).boxed());
    let task = TaskContext::new("t");
    assert!(source.read(&task).await.unwrap().is_stream());
    let err = source.read(&task).await.unwrap_err();
    assert!(matches!(err, OperatorError::Task(TaskError::StreamConsumed)));
  }
}
