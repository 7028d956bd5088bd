//! AWEL Config
//!
//! Serializable flow document types. A [`FlowPanel`] is what a visual editor
//! saves and what the flow factory materializes into a runnable DAG:
//! operator and resource nodes, the edges between them, and flow-level
//! variables.
//!
//! Configuration can be loaded from:
//! - JSON files (via the CLI, `awel run flow.json`)
//! - Any store that keeps flow documents as JSON blobs
//!
//! Nothing here knows how to run a flow; see `awel-flow` for that.

mod edge;
mod flow;
mod metadata;
mod state;
mod variables;

pub use edge::{EdgeError, FlowEdgeData};
pub use flow::{FlowCategory, FlowData, FlowNodeData, FlowNodeMetadata, FlowPanel, Position, Viewport};
pub use metadata::{
  IoField, OperatorType, OptionValue, Parameter, ParameterCategory, ParameterOptions,
  RefreshOptionDependency, RefreshOptionRequest, ResourceMetadata, ResourceType, ViewMetadata,
};
pub use state::{FlowState, StateTransitionError};
pub use variables::FlowVariables;
