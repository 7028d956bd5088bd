use std::sync::{Arc, Mutex};

use futures::StreamExt;

use crate::error::TaskError;
use crate::output::OutputStream;

/// Shared handle to a stream output.
///
/// Clones share the same underlying stream: a one-shot stream can be taken
/// by exactly one of them, a reentrant one replays from the start for every
/// taker.
pub struct StreamOutput<T> {
  slot: Arc<Slot<T>>,
}

enum Slot<T> {
  Once(Mutex<Option<OutputStream<T>>>),
  Replay(Arc<ReplayBuffer<T>>),
}

impl<T> Clone for StreamOutput<T> {
  fn clone(&self) -> Self {
    Self {
      slot: Arc::clone(&self.slot),
    }
  }
}

impl<T: Send + 'static> StreamOutput<T> {
  pub fn new(stream: OutputStream<T>) -> Self {
    Self {
      slot: Arc::new(Slot::Once(Mutex::new(Some(stream)))),
    }
  }

  pub fn is_reentrant(&self) -> bool {
    matches!(*self.slot, Slot::Replay(_))
  }

  /// True if this is a one-shot stream that has already been taken.
  pub fn is_consumed(&self) -> bool {
    match &*self.slot {
      Slot::Once(cell) => cell.lock().map(|s| s.is_none()).unwrap_or(true),
      Slot::Replay(_) => false,
    }
  }

  fn take_once(cell: &Mutex<Option<OutputStream<T>>>) -> Result<OutputStream<T>, TaskError> {
    let mut guard = cell.lock().unwrap_or_else(|e| e.into_inner());
    guard.take().ok_or(TaskError::StreamConsumed)
  }
}

impl<T: Clone + Send + 'static> StreamOutput<T> {
  /// Take the stream for consumption.
  pub fn take(&self) -> Result<OutputStream<T>, TaskError> {
    match &*self.slot {
      Slot::Once(cell) => Self::take_once(cell),
      Slot::Replay(buffer) => Ok(buffer.replay()),
    }
  }

  /// Convert into a reentrant stream. Fails if the one-shot stream was
  /// already taken.
  pub fn into_reentrant(self) -> Result<Self, TaskError> {
    let source = match &*self.slot {
      Slot::Replay(_) => None,
      Slot::Once(cell) => Some(Self::take_once(cell)?),
    };
    match source {
      None => Ok(self),
      Some(source) => Ok(Self {
        slot: Arc::new(Slot::Replay(Arc::new(ReplayBuffer::new(source)))),
      }),
    }
  }
}

/// Buffer filled lazily as the fastest consumer pulls from the source.
struct ReplayBuffer<T> {
  state: tokio::sync::Mutex<ReplayState<T>>,
}

struct ReplayState<T> {
  source: Option<OutputStream<T>>,
  items: Vec<Result<T, TaskError>>,
}

impl<T: Clone + Send + 'static> ReplayBuffer<T> {
  fn new(source: OutputStream<T>) -> Self {
    Self {
      state: tokio::sync::Mutex::new(ReplayState {
        source: Some(source),
        items: Vec::new(),
      }),
    }
  }

  async fn get(&self, index: usize) -> Option<Result<T, TaskError>> {
    let mut state = self.state.lock().await;
    if let Some(item) = state.items.get(index) {
      return Some(item.clone());
    }
    let source = state.source.as_mut()?;
    match source.next().await {
      Some(item) => {
        state.items.push(item.clone());
        Some(item)
      }
      None => {
        state.source = None;
        None
      }
    }
  }

  fn replay(self: &Arc<Self>) -> OutputStream<T> {
    futures::stream::unfold((Arc::clone(self), 0usize), |(buffer, index)| async move {
      let item = buffer.get(index).await?;
      Some((item, (buffer, index + 1)))
    })
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::TryStreamExt;

  fn numbers() -> OutputStream<i64> {
    futures::stream::iter(vec![Ok(1), Ok(2), Ok(3)]).boxed()
  }

  #[tokio::test]
  async fn test_once_stream_consumed_once() {
    let out = StreamOutput::new(numbers());
    let other = out.clone();
    let items: Vec<i64> = out.take().unwrap().try_collect().await.unwrap();
    assert_eq!(items, vec![1, 2, 3]);
    assert!(other.is_consumed());
    assert_eq!(other.take().err(), Some(TaskError::StreamConsumed));
  }

  #[tokio::test]
  async fn test_reentrant_stream_replays() {
    let out = StreamOutput::new(numbers()).into_reentrant().unwrap();
    let a = out.take().unwrap();
    let b = out.take().unwrap();
    let first: Vec<i64> = a.try_collect().await.unwrap();
    let second: Vec<i64> = b.try_collect().await.unwrap();
    assert_eq!(first, second);
    assert!(out.is_reentrant());
  }

  #[tokio::test]
  async fn test_reentrant_interleaved_consumers() {
    let out = StreamOutput::new(numbers()).into_reentrant().unwrap();
    let mut a = out.take().unwrap();
    let mut b = out.take().unwrap();
    assert_eq!(a.next().await, Some(Ok(1)));
    assert_eq!(a.next().await, Some(Ok(2)));
    assert_eq!(b.next().await, Some(Ok(1)));
    assert_eq!(a.next().await, Some(Ok(3)));
    assert_eq!(a.next().await, None);
    let rest: Vec<i64> = b.try_collect().await.unwrap();
    assert_eq!(rest, vec![2, 3]);
  }

  #[tokio::test]
  async fn test_reentrant_after_take_fails() {
    let out = StreamOutput::new(numbers());
    let _stream = out.take().unwrap();
    assert!(matches!(out.into_reentrant(), Err(TaskError::StreamConsumed)));
  }
}
