use std::time::Duration;

use awel_cache::CacheError;
use awel_dag::{DagError, OperatorError, RunnerError};
use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  #[error("trigger '{node_id}' in DAG '{dag_id}' must reach exactly one leaf, found {count}")]
  LeafCount {
    dag_id: String,
    node_id: String,
    count: usize,
  },

  #[error("invalid request body: {message}")]
  InvalidBody { message: String },

  #[error("invalid trigger configuration: {message}")]
  InvalidConfig { message: String },

  #[error("route {method} {path} is already served at priority {priority}")]
  RouteConflict {
    method: String,
    path: String,
    priority: i32,
  },

  #[error(transparent)]
  Dag(#[from] DagError),

  #[error(transparent)]
  Runner(#[from] RunnerError),

  #[error("task timed out after {timeout:?}")]
  Timeout { timeout: Duration },

  #[error("gave up after {attempts} attempts: {source}")]
  RetryExceeded {
    attempts: usize,
    #[source]
    source: Box<TriggerError>,
  },

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("failed to read trigger input: {0}")]
  Source(#[from] OperatorError),
}

impl TriggerError {
  pub fn invalid_body(message: impl Into<String>) -> Self {
    TriggerError::InvalidBody {
      message: message.into(),
    }
  }

  pub fn invalid_config(message: impl Into<String>) -> Self {
    TriggerError::InvalidConfig {
      message: message.into(),
    }
  }

  /// HTTP status for this error: caller mistakes are 4xx, execution
  /// failures 5xx.
  pub fn status_code(&self) -> StatusCode {
    match self {
      TriggerError::InvalidBody { .. } => StatusCode::UNPROCESSABLE_ENTITY,
      TriggerError::Runner(e) if e.is_validation() => StatusCode::BAD_REQUEST,
      TriggerError::Dag(_) | TriggerError::LeafCount { .. } | TriggerError::InvalidConfig { .. } => {
        StatusCode::BAD_REQUEST
      }
      TriggerError::RouteConflict { .. } => StatusCode::CONFLICT,
      TriggerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
      TriggerError::Runner(_)
      | TriggerError::RetryExceeded { .. }
      | TriggerError::Cache(_)
      | TriggerError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}
