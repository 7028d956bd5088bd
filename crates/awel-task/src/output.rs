use std::fmt;
use std::future::Future;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};

use crate::error::TaskError;
use crate::stream::StreamOutput;

/// A lazily produced sequence of task results.
pub type OutputStream<T> = BoxStream<'static, Result<T, TaskError>>;

/// The result of running one operator.
pub enum TaskOutput<T> {
  Value(T),
  Stream(StreamOutput<T>),
  /// The operator produced nothing (e.g. a predicate that did not match).
  Empty,
  /// The node was elided by a branch.
  Skip,
}

impl<T: Clone> Clone for TaskOutput<T> {
  fn clone(&self) -> Self {
    match self {
      TaskOutput::Value(v) => TaskOutput::Value(v.clone()),
      TaskOutput::Stream(s) => TaskOutput::Stream(s.clone()),
      TaskOutput::Empty => TaskOutput::Empty,
      TaskOutput::Skip => TaskOutput::Skip,
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for TaskOutput<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskOutput::Value(v) => f.debug_tuple("Value").field(v).finish(),
      TaskOutput::Stream(_) => f.write_str("Stream(..)"),
      TaskOutput::Empty => f.write_str("Empty"),
      TaskOutput::Skip => f.write_str("Skip"),
    }
  }
}

impl<T> From<T> for TaskOutput<T> {
  fn from(value: T) -> Self {
    TaskOutput::Value(value)
  }
}

fn wrong_type(expected: &'static str, actual: &'static str) -> TaskError {
  TaskError::WrongTaskType { expected, actual }
}

impl<T> TaskOutput<T> {
  pub fn kind(&self) -> &'static str {
    match self {
      TaskOutput::Value(_) => "value",
      TaskOutput::Stream(_) => "stream",
      TaskOutput::Empty => "empty",
      TaskOutput::Skip => "skip",
    }
  }

  pub fn is_stream(&self) -> bool {
    matches!(self, TaskOutput::Stream(_))
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, TaskOutput::Empty)
  }

  pub fn is_skip(&self) -> bool {
    matches!(self, TaskOutput::Skip)
  }

  /// Empty or skipped: nothing a downstream node can consume.
  pub fn is_none(&self) -> bool {
    matches!(self, TaskOutput::Empty | TaskOutput::Skip)
  }

  pub fn value(&self) -> Option<&T> {
    match self {
      TaskOutput::Value(v) => Some(v),
      _ => None,
    }
  }

  pub fn into_value(self) -> Option<T> {
    match self {
      TaskOutput::Value(v) => Some(v),
      _ => None,
    }
  }
}

impl<T: Clone + Send + 'static> TaskOutput<T> {
  pub fn from_stream<S>(stream: S) -> Self
  where
    S: Stream<Item = Result<T, TaskError>> + Send + 'static,
  {
    TaskOutput::Stream(StreamOutput::new(stream.boxed()))
  }

  /// A stream over already materialized items.
  pub fn from_items<I>(items: I) -> Self
  where
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
  {
    Self::from_stream(futures::stream::iter(items.into_iter().map(Ok)))
  }

  /// Apply `f` to the value, or to every item of the stream.
  ///
  /// Empty and skipped outputs pass through unchanged.
  pub fn map<U, F>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    U: Clone + Send + 'static,
    F: Fn(T) -> Result<U, TaskError> + Send + Sync + 'static,
  {
    match self {
      TaskOutput::Value(v) => Ok(TaskOutput::Value(f(v.clone())?)),
      TaskOutput::Stream(s) => {
        let stream = s.take()?;
        Ok(TaskOutput::from_stream(stream.map(move |item| item.and_then(&f))))
      }
      TaskOutput::Empty => Ok(TaskOutput::Empty),
      TaskOutput::Skip => Ok(TaskOutput::Skip),
    }
  }

  /// Async variant of [`TaskOutput::map`].
  pub async fn map_async<U, F, Fut>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    U: Clone + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, TaskError>> + Send + 'static,
  {
    match self {
      TaskOutput::Value(v) => Ok(TaskOutput::Value(f(v.clone()).await?)),
      TaskOutput::Stream(s) => {
        let stream = s.take()?;
        Ok(TaskOutput::from_stream(stream.and_then(f)))
      }
      TaskOutput::Empty => Ok(TaskOutput::Empty),
      TaskOutput::Skip => Ok(TaskOutput::Skip),
    }
  }

  /// Fold the stream using its first item as the seed.
  ///
  /// An empty stream reduces to [`TaskOutput::Empty`].
  pub async fn reduce<F, Fut>(&self, mut f: F) -> Result<TaskOutput<T>, TaskError>
  where
    F: FnMut(T, T) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
  {
    let TaskOutput::Stream(s) = self else {
      return Err(wrong_type("stream", self.kind()));
    };
    let mut stream = s.take()?;
    let mut acc = match stream.next().await {
      Some(first) => first?,
      None => return Ok(TaskOutput::Empty),
    };
    while let Some(item) = stream.next().await {
      acc = f(acc, item?).await?;
    }
    Ok(TaskOutput::Value(acc))
  }

  /// Fold the stream starting from `seed`.
  pub async fn fold<U, F, Fut>(&self, seed: U, mut f: F) -> Result<TaskOutput<U>, TaskError>
  where
    F: FnMut(U, T) -> Fut,
    Fut: Future<Output = Result<U, TaskError>>,
  {
    let TaskOutput::Stream(s) = self else {
      return Err(wrong_type("stream", self.kind()));
    };
    let mut stream = s.take()?;
    let mut acc = seed;
    while let Some(item) = stream.next().await {
      acc = f(acc, item?).await?;
    }
    Ok(TaskOutput::Value(acc))
  }

  /// Turn a value into a stream via `f`. Skip passes through.
  pub fn streamify<U, F>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> OutputStream<U>,
  {
    match self {
      TaskOutput::Value(v) => Ok(TaskOutput::Stream(StreamOutput::new(f(v.clone())))),
      TaskOutput::Skip => Ok(TaskOutput::Skip),
      other => Err(wrong_type("value", other.kind())),
    }
  }

  /// Collect the stream into a single list value.
  pub async fn unstreamify(&self) -> Result<TaskOutput<Vec<T>>, TaskError> {
    match self {
      TaskOutput::Stream(s) => {
        let items: Vec<T> = s.take()?.try_collect().await?;
        Ok(TaskOutput::Value(items))
      }
      TaskOutput::Skip => Ok(TaskOutput::Skip),
      other => Err(wrong_type("stream", other.kind())),
    }
  }

  /// Rewrite the stream with a stream-to-stream function.
  pub fn transform_stream<U, F>(&self, f: F) -> Result<TaskOutput<U>, TaskError>
  where
    U: Clone + Send + 'static,
    F: FnOnce(OutputStream<T>) -> OutputStream<U>,
  {
    match self {
      TaskOutput::Stream(s) => Ok(TaskOutput::Stream(StreamOutput::new(f(s.take()?)))),
      TaskOutput::Skip => Ok(TaskOutput::Skip),
      other => Err(wrong_type("stream", other.kind())),
    }
  }

  /// View any output as a stream: a value becomes a single item, empty and
  /// skipped outputs become an empty stream.
  pub fn to_stream(&self) -> Result<OutputStream<T>, TaskError> {
    match self {
      TaskOutput::Value(v) => Ok(futures::stream::once(futures::future::ready(Ok(v.clone()))).boxed()),
      TaskOutput::Stream(s) => s.take(),
      TaskOutput::Empty | TaskOutput::Skip => Ok(futures::stream::empty().boxed()),
    }
  }

  /// Make a stream output replayable by every consumer. Other variants are
  /// returned unchanged.
  pub fn into_reentrant(self) -> Result<Self, TaskError> {
    match self {
      TaskOutput::Stream(s) => Ok(TaskOutput::Stream(s.into_reentrant()?)),
      other => Ok(other),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::TryStreamExt;

  #[test]
  fn test_map_value() {
    let out = TaskOutput::Value("hello".to_string());
    let mapped = out.map(|s| Ok(s.to_uppercase())).unwrap();
    assert_eq!(mapped.value().map(String::as_str), Some("HELLO"));
  }

  #[test]
  fn test_map_composition() {
    let f = |x: i64| Ok(x + 3);
    let g = |x: i64| Ok(x * 2);
    let out = TaskOutput::Value(5);
    let chained = out.map(f).unwrap().map(g).unwrap();
    let composed = out.map(move |x| f(x).and_then(g)).unwrap();
    assert_eq!(chained.value(), composed.value());
    assert_eq!(chained.value(), Some(&16));
  }

  #[test]
  fn test_map_passes_through_skip_and_empty() {
    let skip: TaskOutput<i64> = TaskOutput::Skip;
    assert!(skip.map(|x| Ok(x + 1)).unwrap().is_skip());
    let empty: TaskOutput<i64> = TaskOutput::Empty;
    assert!(empty.map(|x| Ok(x + 1)).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_map_stream_is_lazy() {
    let out = TaskOutput::from_items(vec![1, 2, 3]);
    let mapped = out.map(|x| Ok(x * 10)).unwrap();
    let TaskOutput::Stream(s) = mapped else {
      panic!("expected stream");
    };
    let items: Vec<i64> = s.take().unwrap().try_collect().await.unwrap();
    assert_eq!(items, vec![10, 20, 30]);
  }

  #[tokio::test]
  async fn test_map_async_value() {
    let out = TaskOutput::Value(2);
    let mapped = out.map_async(|x| async move { Ok(x * x) }).await.unwrap();
    assert_eq!(mapped.value(), Some(&4));
  }

  #[tokio::test]
  async fn test_reduce_stream() {
    let out = TaskOutput::from_items(vec![1, 2, 3, 4]);
    let reduced = out.reduce(|a, b| async move { Ok(a + b) }).await.unwrap();
    assert_eq!(reduced.value(), Some(&10));
  }

  #[tokio::test]
  async fn test_reduce_empty_stream() {
    let out: TaskOutput<i64> = TaskOutput::from_items(Vec::new());
    let reduced = out.reduce(|a, b| async move { Ok(a + b) }).await.unwrap();
    assert!(reduced.is_empty());
  }

  #[tokio::test]
  async fn test_reduce_requires_stream() {
    let out = TaskOutput::Value(1);
    let err = out.reduce(|a, b| async move { Ok(a + b) }).await.unwrap_err();
    assert_eq!(
      err,
      TaskError::WrongTaskType {
        expected: "stream",
        actual: "value"
      }
    );
  }

  #[tokio::test]
  async fn test_fold_with_seed() {
    let out = TaskOutput::from_items(vec![1, 2, 3]);
    let folded = out
      .fold(String::new(), |acc, x| async move { Ok(format!("{acc}{x}")) })
      .await
      .unwrap();
    assert_eq!(folded.value().map(String::as_str), Some("123"));
  }

  #[tokio::test]
  async fn test_streamify_then_unstreamify() {
    let f = |x: i64| -> OutputStream<i64> { futures::stream::iter((0..x).map(Ok)).boxed() };
    let out = TaskOutput::Value(4);
    let list = out.streamify(f).unwrap().unstreamify().await.unwrap();
    assert_eq!(list.value(), Some(&vec![0, 1, 2, 3]));
  }

  #[tokio::test]
  async fn test_transform_stream() {
    let out = TaskOutput::from_items(vec![1, 2, 3, 4]);
    let evens = out
      .transform_stream(|s| s.try_filter(|x| futures::future::ready(x % 2 == 0)).boxed())
      .unwrap();
    let list = evens.unstreamify().await.unwrap();
    assert_eq!(list.value(), Some(&vec![2, 4]));
  }

  #[tokio::test]
  async fn test_stream_read_twice_fails() {
    let out = TaskOutput::from_items(vec![1]);
    let _first = out.to_stream().unwrap();
    assert_eq!(out.to_stream().err(), Some(TaskError::StreamConsumed));
  }

  #[tokio::test]
  async fn test_reentrant_output_read_twice() {
    let out = TaskOutput::from_items(vec![1, 2]).into_reentrant().unwrap();
    let a = out.unstreamify().await.unwrap();
    let b = out.unstreamify().await.unwrap();
    assert_eq!(a.value(), b.value());
  }

  #[tokio::test]
  async fn test_value_as_stream() {
    let out = TaskOutput::Value(7);
    let items: Vec<i64> = out.to_stream().unwrap().try_collect().await.unwrap();
    assert_eq!(items, vec![7]);
  }
}
