use std::sync::Arc;

use async_trait::async_trait;
use awel_task::{TaskContext, TaskError, TaskOutput};
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::debug;

use crate::context::DagContext;
use crate::error::OperatorError;
use crate::functions::{BranchPredicate, SyncFn};
use crate::operator::{Operator, OperatorKind};

/// Task metadata key listing the downstream node names a branch disabled.
pub const SKIP_NODE_NAMES: &str = "skip_node_names";

/// Conditional fork.
///
/// Each predicate guards one downstream node, addressed by name. Every
/// predicate runs against the parent's value; the targets of those that
/// fail are recorded under [`SKIP_NODE_NAMES`] and skipped by the runner.
/// The parent's output passes through unchanged.
#[derive(Default)]
pub struct BranchOperator {
  branches: Vec<(Arc<dyn BranchPredicate>, String)>,
}

impl BranchOperator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_branch(mut self, predicate: impl BranchPredicate + 'static, target: impl Into<String>) -> Self {
    self.branches.push((Arc::new(predicate), target.into()));
    self
  }

  pub fn with_branch_fn<F>(self, predicate: F, target: impl Into<String>) -> Self
  where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
  {
    self.with_branch(SyncFn(predicate), target)
  }

  pub fn targets(&self) -> impl Iterator<Item = &str> {
    self.branches.iter().map(|(_, name)| name.as_str())
  }
}

#[async_trait]
impl Operator for BranchOperator {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Branch
  }

  async fn run(&self, task: &mut TaskContext<Value>, _dag_ctx: &DagContext) -> Result<(), OperatorError> {
    let input = task.task_input();
    let parent_output = input.check_single_parent()?.task_output().clone();

    let checks = self.branches.iter().map(|(predicate, target)| async move {
      let kept = input
        .predicate_map(
          |value| async move { predicate.check(value).await.map_err(TaskError::from) },
          TaskOutput::Empty,
        )
        .await?;
      Ok::<_, OperatorError>((target, kept.is_none()))
    });

    let mut skip_node_names = Vec::new();
    for result in join_all(checks).await {
      let (target, skipped) = result?;
      if skipped {
        skip_node_names.push(target.clone());
      }
    }

    debug!(task_id = %task.task_id(), skip = ?skip_node_names, "branch_evaluated");
    task.set_metadata(SKIP_NODE_NAMES, json!(skip_node_names));
    task.set_task_output(parent_output);
    Ok(())
  }
}
