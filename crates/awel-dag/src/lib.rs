//! AWEL DAG
//!
//! Graph model, operators and the workflow runner:
//!
//! - [`DagBuilder`] / [`Dag`]: a validated acyclic graph of operators
//! - [`Operator`]: the node contract, with map, reduce, join, branch, input,
//!   trigger and stream operators built in
//! - [`WorkflowRunner`]: executes the part of a DAG a leaf depends on,
//!   honoring branch skips and resolving variable placeholders per run
//! - [`DagContext`]: per-run state, visible to operators through
//!   [`current_dag_context`]

mod context;
mod dag;
mod error;
mod functions;
mod job;
pub mod operator;
mod runner;

pub use context::{CURRENT_DAG_CONTEXT, DagContext, RunId, current_dag_context};
pub use dag::{Dag, DagBuilder, DagNode, NodeHandle};
pub use error::{DagError, OperatorError, RunnerError};
pub use functions::{
  BranchPredicate, JoinFunction, MapFunction, ReduceFunction, StreamifyFunction, SyncFn, TransformStreamFunction,
  UnstreamifyFunction,
};
pub use job::JobManager;
pub use operator::{
  BranchJoinOperator, BranchOperator, InputOperator, InputSource, JoinOperator, MapOperator, Operator,
  OperatorKind, Param, ReduceStreamOperator, StreamifyOperator, TransformStreamOperator, TriggerOperator,
  UnstreamifyOperator,
};
pub use runner::WorkflowRunner;
