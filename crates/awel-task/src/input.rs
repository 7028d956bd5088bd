use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::TaskContext;
use crate::error::TaskError;
use crate::output::TaskOutput;

/// Read-only view over a node's parent task contexts, in input-pin order.
pub struct InputContext<T> {
  parents: Vec<Arc<TaskContext<T>>>,
}

impl<T> Default for InputContext<T> {
  fn default() -> Self {
    Self { parents: Vec::new() }
  }
}

impl<T> Clone for InputContext<T> {
  fn clone(&self) -> Self {
    Self {
      parents: self.parents.clone(),
    }
  }
}

impl<T> fmt::Debug for InputContext<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list()
      .entries(self.parents.iter().map(|p| p.task_id()))
      .finish()
  }
}

impl<T> InputContext<T> {
  pub fn new(parents: Vec<Arc<TaskContext<T>>>) -> Self {
    Self { parents }
  }

  pub fn parents(&self) -> &[Arc<TaskContext<T>>] {
    &self.parents
  }

  pub fn len(&self) -> usize {
    self.parents.len()
  }

  pub fn is_empty(&self) -> bool {
    self.parents.is_empty()
  }

  pub fn outputs(&self) -> impl Iterator<Item = &TaskOutput<T>> {
    self.parents.iter().map(|p| p.task_output())
  }

  pub fn check_single_parent(&self) -> Result<&TaskContext<T>, TaskError> {
    match self.parents.as_slice() {
      [parent] => Ok(parent),
      other => Err(TaskError::WrongParentCount {
        expected: 1,
        actual: other.len(),
      }),
    }
  }

  /// True if every parent produced a stream, false if none did.
  pub fn check_stream(&self) -> Result<bool, TaskError> {
    let streams = self.outputs().filter(|o| o.is_stream()).count();
    match streams {
      0 => Ok(false),
      n if n == self.parents.len() => Ok(true),
      _ => Err(TaskError::MixedStreamInputs),
    }
  }
}

impl<T: Clone + Send + 'static> InputContext<T> {
  /// Apply `f` to the single parent's output.
  pub fn map<U, F>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    U: Clone + Send + 'static,
    F: Fn(T) -> Result<U, TaskError> + Send + Sync + 'static,
  {
    self.check_single_parent()?.task_output().map(f)
  }

  pub async fn map_async<U, F, Fut>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    U: Clone + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, TaskError>> + Send + 'static,
  {
    self.check_single_parent()?.task_output().map_async(f).await
  }

  /// Positional parent values; empty and skipped parents are `None`.
  pub fn values(&self) -> Result<Vec<Option<T>>, TaskError> {
    self
      .outputs()
      .map(|out| match out {
        TaskOutput::Value(v) => Ok(Some(v.clone())),
        TaskOutput::Empty | TaskOutput::Skip => Ok(None),
        TaskOutput::Stream(_) => Err(TaskError::WrongTaskType {
          expected: "value",
          actual: "stream",
        }),
      })
      .collect()
  }

  /// Combine every parent's value into one output.
  pub fn map_all<U, F>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    F: FnOnce(Vec<Option<T>>) -> Result<U, TaskError>,
  {
    Ok(TaskOutput::Value(f(self.values()?)?))
  }

  /// Reduce the single parent's stream.
  pub async fn reduce<F, Fut>(&self, f: F) -> Result<TaskOutput<T>, TaskError>
  where
    F: FnMut(T, T) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
  {
    self.check_single_parent()?.task_output().reduce(f).await
  }

  /// Keep the single parent's value when `predicate` holds, otherwise
  /// produce `failed_value`. A skipped parent stays skipped.
  pub async fn predicate_map<F, Fut>(
    &self,
    predicate: F,
    failed_value: TaskOutput<T>,
  ) -> Result<TaskOutput<T>, TaskError>
  where
    F: FnOnce(T) -> Fut,
    Fut: Future<Output = Result<bool, TaskError>>,
  {
    match self.check_single_parent()?.task_output() {
      TaskOutput::Value(v) => {
        if predicate(v.clone()).await? {
          Ok(TaskOutput::Value(v.clone()))
        } else {
          Ok(failed_value)
        }
      }
      TaskOutput::Skip => Ok(TaskOutput::Skip),
      TaskOutput::Empty => Ok(failed_value),
      TaskOutput::Stream(_) => Err(TaskError::WrongTaskType {
        expected: "value",
        actual: "stream",
      }),
    }
  }

  /// The first parent output that is neither empty nor skipped.
  pub fn first_non_empty(&self) -> TaskOutput<T> {
    self
      .outputs()
      .find(|o| !o.is_none())
      .cloned()
      .unwrap_or(TaskOutput::Empty)
  }
}
