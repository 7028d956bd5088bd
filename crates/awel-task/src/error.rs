use crate::context::TaskState;

/// Errors raised by task output and input context operations.
///
/// Cloneable so it can travel inside replayable streams.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
  #[error("wrong task output type: expected {expected}, got {actual}")]
  WrongTaskType {
    expected: &'static str,
    actual: &'static str,
  },

  #[error("stream output already consumed")]
  StreamConsumed,

  #[error("expected {expected} parent(s), got {actual}")]
  WrongParentCount { expected: usize, actual: usize },

  #[error("parents mix stream and non-stream outputs")]
  MixedStreamInputs,

  #[error("task cannot move from {from} to {to}")]
  InvalidStateTransition { from: TaskState, to: TaskState },

  #[error("{message}")]
  Failed { message: String },
}

impl TaskError {
  pub fn failed(message: impl Into<String>) -> Self {
    TaskError::Failed {
      message: message.into(),
    }
  }
}
