//! Flow document → DAG.
//!
//! Resources are built first, in dependency order, and shared by every
//! operator wired to them. Operators are then built from their registered
//! declarations and connected; each mapper listed on an edge becomes its
//! own map node spliced between the edge's ends.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use awel_config::{FlowEdgeData, FlowNodeMetadata, FlowPanel, FlowVariables, Parameter};
use awel_dag::{Dag, DagBuilder, NodeHandle};
use awel_registry::{Registry, RegistryError, Resource};
use awel_variables::{DagVariables, StorageVariables, ValueType, VariableCategory};
use tracing::{debug, info, instrument};

use crate::error::FlowError;

pub struct FlowFactory {
  registry: Arc<Registry>,
}

enum NodeRole {
  Operator,
  Resource,
}

impl FlowFactory {
  pub fn new(registry: Arc<Registry>) -> Self {
    Self { registry }
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  #[instrument(
    name = "flow_build",
    skip(self, panel),
    fields(
      uid = %panel.uid,
      name = %panel.name,
    )
  )]
  pub fn build(&self, panel: &FlowPanel) -> Result<Dag, FlowError> {
    let dag_id = panel.effective_dag_id();

    let mut roles = HashMap::new();
    let mut params: HashMap<&str, Vec<Parameter>> = HashMap::new();
    for node in &panel.flow_data.nodes {
      let (role, parameters) = match &node.data {
        FlowNodeMetadata::Operator(meta) => (NodeRole::Operator, meta.parameters.clone()),
        FlowNodeMetadata::Resource(meta) => (NodeRole::Resource, meta.parameters.clone()),
      };
      if roles.insert(node.id.as_str(), role).is_some() {
        return Err(FlowError::metadata(format!("duplicate node id '{}'", node.id)));
      }
      params.insert(node.id.as_str(), parameters);
    }

    let mut operator_edges = Vec::new();
    let mut resource_deps: HashMap<&str, Vec<&str>> = HashMap::new();
    for (index, edge) in panel.flow_data.edges.iter().enumerate() {
      let source = roles
        .get(edge.source.as_str())
        .ok_or_else(|| FlowError::metadata(format!("edge source '{}' is not a node", edge.source)))?;
      let target = roles
        .get(edge.target.as_str())
        .ok_or_else(|| FlowError::metadata(format!("edge target '{}' is not a node", edge.target)))?;
      match (source, target) {
        (NodeRole::Operator, NodeRole::Operator) => operator_edges.push((index, edge)),
        (NodeRole::Resource, _) => {
          self.wire_resource(panel, edge, &mut params)?;
          if matches!(target, NodeRole::Resource) {
            resource_deps.entry(edge.target.as_str()).or_default().push(edge.source.as_str());
          }
        }
        (NodeRole::Operator, NodeRole::Resource) => {
          return Err(FlowError::metadata(format!(
            "operator '{}' cannot feed resource '{}'",
            edge.source, edge.target
          )));
        }
      }
    }

    // Resources, dependencies first.
    let resource_ids: Vec<&str> = panel
      .flow_data
      .nodes
      .iter()
      .filter(|n| !n.data.is_operator())
      .map(|n| n.id.as_str())
      .collect();
    let mut built: HashMap<String, Resource> = HashMap::new();
    for id in resource_order(&resource_ids, &resource_deps)? {
      let type_cls = panel.node(id).map(|n| n.data.type_cls()).unwrap_or_default();
      let configured = params.get(id).map(Vec::as_slice).unwrap_or_default();
      let wired = wired_resources(configured, &built)?;
      let resource = self
        .registry
        .build_resource(type_cls, configured, &wired)
        .map_err(|source| class_error(id, type_cls, source))?;
      debug!(node_id = %id, type_cls = %type_cls, "resource_built");
      built.insert(id.to_string(), resource);
    }

    let mut builder = DagBuilder::new(dag_id.clone());
    let mut handles: HashMap<&str, NodeHandle> = HashMap::new();
    for node in panel.flow_data.nodes.iter().filter(|n| n.data.is_operator()) {
      let type_cls = node.data.type_cls();
      let configured = params.get(node.id.as_str()).map(Vec::as_slice).unwrap_or_default();
      let wired = wired_resources(configured, &built)?;
      let operator = self
        .registry
        .build_operator(type_cls, configured, &wired)
        .map_err(|source| class_error(&node.id, type_cls, source))?;
      let handle = builder.add_node(node.id.clone(), Some(node.id.clone()), operator);
      handles.insert(node.id.as_str(), handle);
    }

    for (index, edge) in operator_edges {
      let (Some(source), Some(target)) = (handles.get(edge.source.as_str()), handles.get(edge.target.as_str())) else {
        continue;
      };
      let mut previous = source.clone();
      let mut source_order = edge.source_order;
      // Edges without an id are keyed by their position in the document.
      let edge_key = edge.id.clone().unwrap_or_else(|| index.to_string());
      for (i, mapper) in edge.mappers.iter().enumerate() {
        let mapper_id = format!("{}_{}_{edge_key}_mapper_{i}", edge.source, edge.target);
        let operator = self
          .registry
          .build_operator(mapper, &[], &HashMap::new())
          .map_err(|source| class_error(&mapper_id, mapper, source))?;
        let handle = builder.add_node(mapper_id, None, operator);
        builder.connect_with(&previous, &handle, source_order, 0);
        previous = handle;
        source_order = 0;
      }
      builder.connect_with(&previous, target, source_order, edge.target_order);
    }

    if !panel.variables.is_empty() {
      let variables = panel
        .variables
        .iter()
        .map(storage_variable)
        .collect::<Result<Vec<_>, _>>()?;
      builder.set_variables(DagVariables::new(variables).scoped_to(&dag_id));
    }

    let dag = builder.build().map_err(|source| FlowError::DagMetadata {
      dag_id: dag_id.clone(),
      source,
    })?;
    info!(dag_id = %dag_id, nodes = dag.len(), resources = built.len(), "flow_built");
    Ok(dag)
  }

  /// Point the consumer's resource parameter at `target_order` to the
  /// source resource node.
  fn wire_resource(
    &self,
    panel: &FlowPanel,
    edge: &FlowEdgeData,
    params: &mut HashMap<&str, Vec<Parameter>>,
  ) -> Result<(), FlowError> {
    let source_cls = panel.node(&edge.source).map(|n| n.data.type_cls()).unwrap_or_default();
    let registered = self
      .registry
      .resource(source_cls)
      .map_err(|source| class_error(&edge.source, source_cls, source))?;

    let consumer = params
      .get_mut(edge.target.as_str())
      .ok_or_else(|| FlowError::metadata(format!("unknown node '{}'", edge.target)))?;
    let param = consumer
      .get_mut(edge.target_order)
      .filter(|p| p.is_resource())
      .ok_or_else(|| {
        FlowError::metadata(format!(
          "node '{}' has no resource parameter at position {}",
          edge.target, edge.target_order
        ))
      })?;
    if !registered.metadata().satisfies(&param.type_cls) {
      return Err(FlowError::metadata(format!(
        "resource '{}' ({source_cls}) cannot fill parameter '{}' of '{}', which expects {}",
        edge.source, param.name, edge.target, param.type_cls
      )));
    }
    param.value = Some(serde_json::Value::String(edge.source.clone()));
    Ok(())
  }
}

fn class_error(node_id: &str, type_cls: &str, source: RegistryError) -> FlowError {
  FlowError::ClassMetadata {
    node_id: node_id.to_string(),
    type_cls: type_cls.to_string(),
    source,
  }
}

/// The built resources a node's resource parameters point at, keyed by
/// parameter name.
fn wired_resources(
  parameters: &[Parameter],
  built: &HashMap<String, Resource>,
) -> Result<HashMap<String, Resource>, FlowError> {
  let mut out = HashMap::new();
  for param in parameters.iter().filter(|p| p.is_resource()) {
    let Some(resource_id) = param.value.as_ref().and_then(|v| v.as_str()) else {
      continue;
    };
    let resource = built
      .get(resource_id)
      .ok_or_else(|| FlowError::metadata(format!("resource '{resource_id}' for '{}' was not built", param.name)))?;
    out.insert(param.name.clone(), resource.clone());
  }
  Ok(out)
}

/// Kahn's algorithm over resource → consumer dependencies.
fn resource_order<'a>(ids: &[&'a str], deps: &HashMap<&'a str, Vec<&'a str>>) -> Result<Vec<&'a str>, FlowError> {
  let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
  let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
  for (&consumer, sources) in deps {
    for &source in sources {
      *in_degree.entry(consumer).or_default() += 1;
      consumers.entry(source).or_default().push(consumer);
    }
  }

  let mut queue: VecDeque<&str> = ids.iter().copied().filter(|id| in_degree[id] == 0).collect();
  let mut order = Vec::with_capacity(ids.len());
  while let Some(id) = queue.pop_front() {
    order.push(id);
    for &consumer in consumers.get(id).into_iter().flatten() {
      if let Some(degree) = in_degree.get_mut(consumer) {
        *degree -= 1;
        if *degree == 0 {
          queue.push_back(consumer);
        }
      }
    }
  }

  if order.len() < ids.len() {
    let mut stuck: Vec<&str> = ids.iter().copied().filter(|id| !order.contains(id)).collect();
    stuck.sort_unstable();
    return Err(FlowError::metadata(format!("cycle among resources: {}", stuck.join(", "))));
  }
  Ok(order)
}

fn storage_variable(var: &FlowVariables) -> Result<StorageVariables, FlowError> {
  let value_type = ValueType::parse(&var.value_type)
    .ok_or_else(|| FlowError::metadata(format!("variable '{}' has unknown type '{}'", var.key, var.value_type)))?;
  let category = VariableCategory::parse(&var.category)
    .ok_or_else(|| FlowError::metadata(format!("variable '{}' has unknown category '{}'", var.key, var.category)))?;
  let mut out = StorageVariables::new(&var.key, &var.name, var.value.clone())
    .with_value_type(value_type)
    .with_category(category)
    .with_scope(&var.scope, var.scope_key.clone());
  out.label = var.label.clone();
  out.description = var.description.clone();
  Ok(out)
}
