use awel_task::TaskError;
use awel_variables::VariablesError;

/// Structural problems found while building a DAG.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DagError {
  #[error("DAG '{dag_id}' has no nodes")]
  Empty { dag_id: String },

  #[error("duplicate node id '{node_id}'")]
  DuplicateNodeId { node_id: String },

  #[error("duplicate node name '{node_name}'")]
  DuplicateNodeName { node_name: String },

  #[error("cycle detected involving nodes: {}", nodes.join(", "))]
  Cycle { nodes: Vec<String> },

  #[error("node '{node_id}' not found")]
  NodeNotFound { node_id: String },

  #[error("edge references a node outside this DAG")]
  ForeignNode,
}

/// Errors raised from inside an operator.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
  #[error(transparent)]
  Task(#[from] TaskError),

  #[error(transparent)]
  Variables(#[from] VariablesError),

  #[error("missing call data")]
  MissingCallData,

  #[error("parameter '{name}' was not resolved for this run")]
  UnresolvedParameter { name: String },

  #[error("{message}")]
  Failed { message: String },
}

impl OperatorError {
  pub fn failed(message: impl Into<String>) -> Self {
    OperatorError::Failed {
      message: message.into(),
    }
  }
}

impl From<OperatorError> for TaskError {
  fn from(err: OperatorError) -> Self {
    match err {
      OperatorError::Task(task) => task,
      other => TaskError::failed(other.to_string()),
    }
  }
}

/// Errors surfaced to callers of the workflow runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  #[error("invalid DAG: {0}")]
  Dag(#[from] DagError),

  #[error("node '{node_id}' failed: {source}")]
  NodeFailed {
    node_id: String,
    #[source]
    source: OperatorError,
  },

  #[error("node '{node_id}' has no output in run {run_id}")]
  MissingOutput { node_id: String, run_id: u64 },

  #[error("stream error: {0}")]
  Stream(#[from] TaskError),
}

impl RunnerError {
  /// True when the failure is a caller mistake rather than an execution fault.
  pub fn is_validation(&self) -> bool {
    matches!(self, RunnerError::Dag(_))
  }
}
