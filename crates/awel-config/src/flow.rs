use serde::{Deserialize, Serialize};

use crate::edge::FlowEdgeData;
use crate::metadata::{ResourceMetadata, ViewMetadata};
use crate::state::{FlowState, StateTransitionError};
use crate::variables::FlowVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCategory {
  #[default]
  Common,
  ChatFlow,
  ChatAgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
  pub x: f64,
  pub y: f64,
  pub zoom: f64,
}

impl Default for Viewport {
  fn default() -> Self {
    Self { x: 0.0, y: 0.0, zoom: 1.0 }
  }
}

/// The metadata carried by a node, tagged by `flow_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flow_type", rename_all = "snake_case")]
pub enum FlowNodeMetadata {
  Operator(ViewMetadata),
  Resource(ResourceMetadata),
}

impl FlowNodeMetadata {
  pub fn type_cls(&self) -> &str {
    match self {
      FlowNodeMetadata::Operator(meta) => &meta.type_cls,
      FlowNodeMetadata::Resource(meta) => &meta.type_cls,
    }
  }

  pub fn is_operator(&self) -> bool {
    matches!(self, FlowNodeMetadata::Operator(_))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNodeData {
  pub id: String,
  #[serde(default)]
  pub position: Position,
  #[serde(default = "default_node_type", rename = "type")]
  pub node_type: String,
  pub data: FlowNodeMetadata,
}

fn default_node_type() -> String {
  "customNode".to_string()
}

impl FlowNodeData {
  pub fn operator(id: impl Into<String>, meta: ViewMetadata) -> Self {
    Self {
      id: id.into(),
      position: Position::default(),
      node_type: default_node_type(),
      data: FlowNodeMetadata::Operator(meta),
    }
  }

  pub fn resource(id: impl Into<String>, meta: ResourceMetadata) -> Self {
    Self {
      id: id.into(),
      position: Position::default(),
      node_type: default_node_type(),
      data: FlowNodeMetadata::Resource(meta),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowData {
  #[serde(default)]
  pub nodes: Vec<FlowNodeData>,
  #[serde(default)]
  pub edges: Vec<FlowEdgeData>,
  #[serde(default)]
  pub viewport: Viewport,
}

/// A serializable flow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPanel {
  pub uid: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dag_id: Option<String>,
  pub name: String,
  pub label: String,
  #[serde(default)]
  pub flow_category: FlowCategory,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub state: FlowState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
  #[serde(default)]
  pub flow_data: FlowData,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub variables: Vec<FlowVariables>,
  #[serde(default = "default_version")]
  pub version: String,
}

fn default_version() -> String {
  "0.1.0".to_string()
}

impl FlowPanel {
  pub fn new(uid: impl Into<String>, name: impl Into<String>, flow_data: FlowData) -> Self {
    let name = name.into();
    Self {
      uid: uid.into(),
      dag_id: None,
      label: name.clone(),
      name,
      flow_category: FlowCategory::default(),
      description: None,
      state: FlowState::default(),
      error_message: None,
      flow_data,
      variables: Vec::new(),
      version: default_version(),
    }
  }

  /// The id the materialized DAG is registered under.
  pub fn effective_dag_id(&self) -> String {
    self
      .dag_id
      .clone()
      .unwrap_or_else(|| format!("flow_dag_{}_{}", self.name, self.uid))
  }

  /// Move to `next`, rejecting transitions outside the whitelist.
  pub fn change_state(&mut self, next: FlowState) -> Result<(), StateTransitionError> {
    self.state = self.state.transition(next)?;
    Ok(())
  }

  pub fn node(&self, id: &str) -> Option<&FlowNodeData> {
    self.flow_data.nodes.iter().find(|n| n.id == id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metadata::{OperatorType, Parameter};
  use serde_json::json;

  #[test]
  fn test_parse_flow_document() {
    let panel: FlowPanel = serde_json::from_value(json!({
      "uid": "f1",
      "name": "greet",
      "label": "Greet",
      "state": "developing",
      "flow_data": {
        "nodes": [
          {
            "id": "op_1",
            "position": {"x": 1.0, "y": 2.0},
            "type": "customNode",
            "data": {
              "flow_type": "operator",
              "label": "Template",
              "name": "template",
              "category": "common",
              "type_cls": "awel::builtin::TemplateOperator",
              "operator_type": "map",
              "parameters": [
                {"label": "T", "name": "template", "type_name": "str", "type_cls": "str", "value": "hi"}
              ]
            }
          },
          {
            "id": "res_1",
            "data": {
              "flow_type": "resource",
              "label": "Vars",
              "name": "vars",
              "category": "common",
              "type_cls": "awel::builtin::TemplateVariables"
            }
          }
        ],
        "edges": [
          {"source": "res_1", "target": "op_1", "source_handle": "res_1|outputs|0", "target_handle": "op_1|parameters|1"}
        ],
        "viewport": {"x": 0.0, "y": 0.0, "zoom": 1.5}
      }
    }))
    .unwrap();

    assert_eq!(panel.state, FlowState::Developing);
    assert_eq!(panel.flow_data.nodes.len(), 2);
    assert!(panel.flow_data.nodes[0].data.is_operator());
    assert!(!panel.flow_data.nodes[1].data.is_operator());
    assert_eq!(panel.flow_data.edges[0].target_order, 1);
    assert_eq!(panel.version, "0.1.0");
    assert_eq!(panel.effective_dag_id(), "flow_dag_greet_f1");
  }

  #[test]
  fn test_node_metadata_round_trips_tag() {
    let meta = ViewMetadata::new("Op", "op", "common", "awel::test::Op", OperatorType::Map)
      .with_parameter(Parameter::new("X", "x", "int"));
    let node = FlowNodeData::operator("n1", meta);
    let value = serde_json::to_value(&node).unwrap();
    assert_eq!(value["data"]["flow_type"], "operator");
    let back: FlowNodeData = serde_json::from_value(value).unwrap();
    assert_eq!(back, node);
  }

  #[test]
  fn test_change_state() {
    let mut panel = FlowPanel::new("u", "n", FlowData::default());
    panel.change_state(FlowState::Developing).unwrap();
    assert!(panel.change_state(FlowState::Running).is_err());
    assert_eq!(panel.state, FlowState::Developing);
  }
}
