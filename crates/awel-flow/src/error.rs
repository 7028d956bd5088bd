use awel_config::StateTransitionError;
use awel_dag::DagError;
use awel_registry::RegistryError;

/// Errors raised while turning a flow document into a DAG, or while
/// managing stored flows.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
  /// The document itself is malformed: bad wiring, unknown node, type
  /// mismatch, resource cycle.
  #[error("invalid flow metadata: {message}")]
  Metadata { message: String },

  /// A node references a type the registry cannot build.
  #[error("node '{node_id}' ({type_cls}): {source}")]
  ClassMetadata {
    node_id: String,
    type_cls: String,
    #[source]
    source: RegistryError,
  },

  /// The materialized graph is not a valid DAG.
  #[error("failed to build DAG '{dag_id}': {source}")]
  DagMetadata {
    dag_id: String,
    #[source]
    source: DagError,
  },

  #[error("flow '{uid}' not found")]
  NotFound { uid: String },

  #[error(transparent)]
  State(#[from] StateTransitionError),
}

impl FlowError {
  pub fn metadata(message: impl Into<String>) -> Self {
    FlowError::Metadata {
      message: message.into(),
    }
  }

  /// True when the flow document, not the runtime, is at fault.
  pub fn is_validation(&self) -> bool {
    !matches!(self, FlowError::NotFound { .. })
  }
}
