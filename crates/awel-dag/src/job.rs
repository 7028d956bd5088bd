use std::collections::HashMap;

use futures::future::join_all;
use serde_json::Value;

use crate::context::DagContext;
use crate::dag::Dag;
use crate::error::{DagError, OperatorError};

/// The part of a DAG one run touches: the leaf and everything upstream of
/// it, with call data assigned to the roots.
#[derive(Debug)]
pub struct JobManager {
  leaf: usize,
  nodes: Vec<usize>,
  root_ids: Vec<String>,
  call_data: HashMap<String, Value>,
}

impl JobManager {
  /// Walk upstream from `leaf_id`.
  ///
  /// With a single root, `call_data` goes to that root as is. With several
  /// roots it must be an object keyed by root node id (or name); roots
  /// without an entry get nothing.
  pub fn build_from_end_node(dag: &Dag, leaf_id: &str, call_data: Option<Value>) -> Result<Self, DagError> {
    let leaf = dag.index_of(leaf_id).ok_or_else(|| DagError::NodeNotFound {
      node_id: leaf_id.to_string(),
    })?;

    let mut seen = vec![false; dag.len()];
    let mut stack = vec![leaf];
    let mut nodes = Vec::new();
    let mut roots = Vec::new();
    while let Some(i) = stack.pop() {
      if std::mem::replace(&mut seen[i], true) {
        continue;
      }
      nodes.push(i);
      let node = dag.node_at(i);
      if node.upstream().is_empty() {
        roots.push(i);
      }
      stack.extend(node.upstream().iter().copied());
    }
    roots.sort_unstable();

    let mut assigned = HashMap::new();
    match (roots.as_slice(), call_data) {
      (_, None) => {}
      ([root], Some(data)) => {
        assigned.insert(dag.node_at(*root).node_id().to_string(), data);
      }
      (roots, Some(Value::Object(mut by_node))) => {
        for &root in roots {
          let node = dag.node_at(root);
          let entry = by_node
            .remove(node.node_id())
            .or_else(|| node.node_name().and_then(|name| by_node.remove(name)));
          if let Some(data) = entry {
            assigned.insert(node.node_id().to_string(), data);
          }
        }
      }
      (_, Some(_)) => {}
    }

    Ok(Self {
      leaf,
      nodes,
      root_ids: roots.iter().map(|&i| dag.node_at(i).node_id().to_string()).collect(),
      call_data: assigned,
    })
  }

  pub(crate) fn leaf(&self) -> usize {
    self.leaf
  }

  /// Number of nodes the run may execute.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn root_ids(&self) -> &[String] {
    &self.root_ids
  }

  pub fn call_data(&self, node_id: &str) -> Option<&Value> {
    self.call_data.get(node_id)
  }

  /// Run the pre-run hook of every node in the job concurrently. Reports the
  /// first failing node.
  pub async fn before_dag_run(&self, dag: &Dag, ctx: &DagContext) -> Result<(), (String, OperatorError)> {
    let hooks = self.nodes.iter().map(|&i| {
      let node = dag.node_at(i);
      async move {
        node
          .operator()
          .before_dag_run(ctx)
          .await
          .map_err(|e| (node.node_id().to_string(), e))
      }
    });
    join_all(hooks).await.into_iter().collect()
  }
}
