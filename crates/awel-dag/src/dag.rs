//! The DAG container and its builder.
//!
//! Nodes are stored in an arena and addressed by index internally; callers
//! use node ids (unique) or node names (unique, optional). Edges carry the
//! source and target pin order so multi-input operators see their parents
//! in declaration order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use awel_variables::DagVariables;
use futures::future::join_all;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{DagContext, RunId};
use crate::error::DagError;
use crate::operator::{Operator, OperatorKind};

pub struct DagNode {
  node_id: String,
  node_name: Option<String>,
  operator: Arc<dyn Operator>,
  upstream: Vec<usize>,
  downstream: Vec<usize>,
}

impl DagNode {
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  pub fn node_name(&self) -> Option<&str> {
    self.node_name.as_deref()
  }

  /// The name branches address this node by: its name, else its id.
  pub fn name(&self) -> &str {
    self.node_name.as_deref().unwrap_or(&self.node_id)
  }

  pub fn operator(&self) -> &dyn Operator {
    self.operator.as_ref()
  }

  /// Parent indices, sorted by target pin.
  pub fn upstream(&self) -> &[usize] {
    &self.upstream
  }

  /// Child indices, sorted by source pin.
  pub fn downstream(&self) -> &[usize] {
    &self.downstream
  }
}

impl std::fmt::Debug for DagNode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DagNode")
      .field("node_id", &self.node_id)
      .field("node_name", &self.node_name)
      .field("kind", &self.operator.kind())
      .field("upstream", &self.upstream)
      .field("downstream", &self.downstream)
      .finish()
  }
}

/// A validated, acyclic graph of operators.
pub struct Dag {
  dag_id: String,
  nodes: Vec<DagNode>,
  id_index: HashMap<String, usize>,
  name_index: HashMap<String, usize>,
  variables: Option<DagVariables>,
  contexts: Mutex<HashMap<RunId, Arc<DagContext>>>,
}

impl std::fmt::Debug for Dag {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Dag")
      .field("dag_id", &self.dag_id)
      .field("nodes", &self.nodes)
      .finish()
  }
}

impl Dag {
  pub fn dag_id(&self) -> &str {
    &self.dag_id
  }

  pub fn nodes(&self) -> &[DagNode] {
    &self.nodes
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn node(&self, node_id: &str) -> Option<&DagNode> {
    self.id_index.get(node_id).map(|&i| &self.nodes[i])
  }

  pub fn node_by_name(&self, name: &str) -> Option<&DagNode> {
    self.name_index.get(name).map(|&i| &self.nodes[i])
  }

  pub(crate) fn node_at(&self, index: usize) -> &DagNode {
    &self.nodes[index]
  }

  pub(crate) fn index_of(&self, node_id: &str) -> Option<usize> {
    self.id_index.get(node_id).copied()
  }

  pub fn default_variables(&self) -> Option<&DagVariables> {
    self.variables.as_ref()
  }

  pub fn root_nodes(&self) -> Vec<&DagNode> {
    self.nodes.iter().filter(|n| n.upstream.is_empty()).collect()
  }

  pub fn leaf_nodes(&self) -> Vec<&DagNode> {
    self.nodes.iter().filter(|n| n.downstream.is_empty()).collect()
  }

  pub fn trigger_nodes(&self) -> Vec<&DagNode> {
    self
      .nodes
      .iter()
      .filter(|n| n.operator.kind() == OperatorKind::Trigger)
      .collect()
  }

  /// The only leaf, if there is exactly one.
  pub fn single_leaf(&self) -> Option<&DagNode> {
    match self.leaf_nodes().as_slice() {
      [leaf] => Some(leaf),
      _ => None,
    }
  }

  /// Every leaf reachable from `node_id`.
  pub fn leaves_reachable_from(&self, node_id: &str) -> Vec<&DagNode> {
    let Some(start) = self.index_of(node_id) else {
      return Vec::new();
    };
    let mut seen = vec![false; self.nodes.len()];
    let mut stack = vec![start];
    let mut leaves = Vec::new();
    while let Some(i) = stack.pop() {
      if std::mem::replace(&mut seen[i], true) {
        continue;
      }
      let node = &self.nodes[i];
      if node.downstream.is_empty() {
        leaves.push(node);
      }
      stack.extend(node.downstream.iter().copied());
    }
    leaves
  }

  /// Node ids in a valid execution order.
  pub fn topological_order(&self) -> Vec<&str> {
    match topological_sort(self.nodes.len(), |i| &self.nodes[i].downstream) {
      Ok(order) => order.into_iter().map(|i| self.nodes[i].node_id.as_str()).collect(),
      Err(_) => Vec::new(),
    }
  }

  /// Make a run's context discoverable until [`Dag::after_dag_end`].
  pub fn save_dag_context(&self, ctx: Arc<DagContext>) {
    self
      .contexts
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .insert(ctx.run_id(), ctx);
  }

  pub fn dag_context(&self, run_id: RunId) -> Option<Arc<DagContext>> {
    self
      .contexts
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .get(&run_id)
      .cloned()
  }

  /// Fire every node's post-run hook for `run_id`. Only the first call for a
  /// run does anything, so concurrent runs never see each other's hooks.
  pub async fn after_dag_end(&self, run_id: RunId) {
    let removed = self
      .contexts
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .remove(&run_id);
    if removed.is_none() {
      return;
    }
    let hooks = self.nodes.iter().map(|node| async move {
      if let Err(e) = node.operator.after_dag_end(run_id).await {
        warn!(run_id = %run_id, node_id = %node.node_id, error = %e, "after_dag_end_failed");
      }
    });
    join_all(hooks).await;
    debug!(run_id = %run_id, dag_id = %self.dag_id, "dag_end");
  }
}

/// Reference to a node added to a [`DagBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
  index: usize,
  node_id: String,
}

impl NodeHandle {
  pub fn node_id(&self) -> &str {
    &self.node_id
  }
}

struct PendingEdge {
  source: usize,
  target: usize,
  source_order: usize,
  target_order: usize,
}

/// Builds a [`Dag`].
///
/// ```ignore
/// let mut builder = DagBuilder::new("greet");
/// let input = builder.add(InputOperator::from_value(json!("hello")));
/// let upper = builder.add(MapOperator::from_fn(upper));
/// builder.connect(&input, &upper);
/// let dag = builder.build()?;
/// ```
pub struct DagBuilder {
  dag_id: String,
  nodes: Vec<(String, Option<String>, Arc<dyn Operator>)>,
  edges: Vec<PendingEdge>,
  variables: Option<DagVariables>,
}

impl DagBuilder {
  pub fn new(dag_id: impl Into<String>) -> Self {
    Self {
      dag_id: dag_id.into(),
      nodes: Vec::new(),
      edges: Vec::new(),
      variables: None,
    }
  }

  pub fn dag_id(&self) -> &str {
    &self.dag_id
  }

  /// Default variables for every run of the DAG.
  pub fn with_variables(mut self, variables: DagVariables) -> Self {
    self.variables = Some(variables);
    self
  }

  pub fn set_variables(&mut self, variables: DagVariables) {
    self.variables = Some(variables);
  }

  /// Add an unnamed node with a generated id.
  pub fn add(&mut self, operator: impl Operator + 'static) -> NodeHandle {
    self.add_node(Uuid::new_v4().to_string(), None, Arc::new(operator))
  }

  /// Add a node addressable by `name`; the name doubles as its id.
  pub fn add_named(&mut self, name: impl Into<String>, operator: impl Operator + 'static) -> NodeHandle {
    let name = name.into();
    self.add_node(name.clone(), Some(name), Arc::new(operator))
  }

  pub fn add_node(
    &mut self,
    node_id: impl Into<String>,
    node_name: Option<String>,
    operator: Arc<dyn Operator>,
  ) -> NodeHandle {
    let node_id = node_id.into();
    self.nodes.push((node_id.clone(), node_name, operator));
    NodeHandle {
      index: self.nodes.len() - 1,
      node_id,
    }
  }

  /// Connect `source → target` on the next free pins of both ends.
  pub fn connect(&mut self, source: &NodeHandle, target: &NodeHandle) {
    let source_order = self.edges.iter().filter(|e| e.source == source.index).count();
    let target_order = self.edges.iter().filter(|e| e.target == target.index).count();
    self.connect_with(source, target, source_order, target_order);
  }

  pub fn connect_with(&mut self, source: &NodeHandle, target: &NodeHandle, source_order: usize, target_order: usize) {
    self.edges.push(PendingEdge {
      source: source.index,
      target: target.index,
      source_order,
      target_order,
    });
  }

  /// Connect each node to the next.
  pub fn chain(&mut self, nodes: &[&NodeHandle]) {
    for pair in nodes.windows(2) {
      self.connect(pair[0], pair[1]);
    }
  }

  pub fn build(self) -> Result<Dag, DagError> {
    if self.nodes.is_empty() {
      return Err(DagError::Empty { dag_id: self.dag_id });
    }

    let mut id_index = HashMap::new();
    let mut name_index = HashMap::new();
    for (i, (node_id, node_name, _)) in self.nodes.iter().enumerate() {
      if id_index.insert(node_id.clone(), i).is_some() {
        return Err(DagError::DuplicateNodeId {
          node_id: node_id.clone(),
        });
      }
      if let Some(name) = node_name
        && name_index.insert(name.clone(), i).is_some()
      {
        return Err(DagError::DuplicateNodeName {
          node_name: name.clone(),
        });
      }
    }

    let count = self.nodes.len();
    let mut upstream: Vec<Vec<(usize, usize)>> = vec![Vec::new(); count];
    let mut downstream: Vec<Vec<(usize, usize)>> = vec![Vec::new(); count];
    for edge in &self.edges {
      if edge.source >= count || edge.target >= count {
        return Err(DagError::ForeignNode);
      }
      upstream[edge.target].push((edge.target_order, edge.source));
      downstream[edge.source].push((edge.source_order, edge.target));
    }
    // Stable sorts keep insertion order between equal pins.
    let upstream: Vec<Vec<usize>> = upstream
      .into_iter()
      .map(|mut v| {
        v.sort_by_key(|(order, _)| *order);
        v.into_iter().map(|(_, i)| i).collect()
      })
      .collect();
    let downstream: Vec<Vec<usize>> = downstream
      .into_iter()
      .map(|mut v| {
        v.sort_by_key(|(order, _)| *order);
        v.into_iter().map(|(_, i)| i).collect()
      })
      .collect();

    if let Err(remaining) = topological_sort(count, |i| &downstream[i]) {
      return Err(DagError::Cycle {
        nodes: remaining.into_iter().map(|i| self.nodes[i].0.clone()).collect(),
      });
    }

    let nodes = self
      .nodes
      .into_iter()
      .zip(upstream.into_iter().zip(downstream))
      .map(|((node_id, node_name, operator), (upstream, downstream))| DagNode {
        node_id,
        node_name,
        operator,
        upstream,
        downstream,
      })
      .collect();

    Ok(Dag {
      dag_id: self.dag_id,
      nodes,
      id_index,
      name_index,
      variables: self.variables,
      contexts: Mutex::new(HashMap::new()),
    })
  }
}

/// Kahn's algorithm. On a cycle, returns the nodes that could not be
/// ordered.
fn topological_sort<'a>(count: usize, children: impl Fn(usize) -> &'a Vec<usize>) -> Result<Vec<usize>, Vec<usize>> {
  let mut in_degree = vec![0usize; count];
  for i in 0..count {
    for &child in children(i) {
      in_degree[child] += 1;
    }
  }

  let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
  let mut order = Vec::with_capacity(count);
  while let Some(i) = queue.pop_front() {
    order.push(i);
    for &child in children(i) {
      in_degree[child] -= 1;
      if in_degree[child] == 0 {
        queue.push_back(child);
      }
    }
  }

  if order.len() == count {
    Ok(order)
  } else {
    Err((0..count).filter(|&i| in_degree[i] > 0).collect())
  }
}
