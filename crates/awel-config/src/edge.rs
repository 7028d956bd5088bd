use serde::{Deserialize, Serialize};

/// An edge between two nodes of a flow document.
///
/// `source_order` selects the output pin of the source, `target_order` the
/// input pin (or parameter position, for resources) of the target. Older
/// documents only carry the ordinals encoded in the handles as `...|N`; both
/// forms are accepted on input and the explicit fields are always written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFlowEdgeData")]
pub struct FlowEdgeData {
  pub source: String,
  pub target: String,
  pub source_handle: Option<String>,
  pub target_handle: Option<String>,
  pub source_order: usize,
  pub target_order: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub edge_type: Option<String>,
  /// Stable ids of mapper operators spliced onto this edge, in order.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub mappers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EdgeError {
  #[error("edge {source_node} -> {target_node} has no {which} order and no parsable handle")]
  MissingOrder {
    source_node: String,
    target_node: String,
    which: &'static str,
  },
}

#[derive(Deserialize)]
struct RawFlowEdgeData {
  source: String,
  target: String,
  #[serde(default)]
  source_handle: Option<String>,
  #[serde(default)]
  target_handle: Option<String>,
  #[serde(default)]
  source_order: Option<usize>,
  #[serde(default)]
  target_order: Option<usize>,
  #[serde(default)]
  id: Option<String>,
  #[serde(default, rename = "type")]
  edge_type: Option<String>,
  #[serde(default)]
  mappers: Vec<String>,
}

/// Extract the trailing ordinal from a handle such as `node_1|inputs|0`.
fn order_from_handle(handle: Option<&str>) -> Option<usize> {
  handle?.rsplit('|').next()?.trim().parse().ok()
}

impl TryFrom<RawFlowEdgeData> for FlowEdgeData {
  type Error = EdgeError;

  fn try_from(raw: RawFlowEdgeData) -> Result<Self, Self::Error> {
    let source_order = raw
      .source_order
      .or_else(|| order_from_handle(raw.source_handle.as_deref()))
      .ok_or_else(|| EdgeError::MissingOrder {
        source_node: raw.source.clone(),
        target_node: raw.target.clone(),
        which: "source",
      })?;
    let target_order = raw
      .target_order
      .or_else(|| order_from_handle(raw.target_handle.as_deref()))
      .ok_or_else(|| EdgeError::MissingOrder {
        source_node: raw.source.clone(),
        target_node: raw.target.clone(),
        which: "target",
      })?;

    Ok(FlowEdgeData {
      source: raw.source,
      target: raw.target,
      source_handle: raw.source_handle,
      target_handle: raw.target_handle,
      source_order,
      target_order,
      id: raw.id,
      edge_type: raw.edge_type,
      mappers: raw.mappers,
    })
  }
}

impl FlowEdgeData {
  /// Build an edge with explicit pin ordinals.
  pub fn new(source: impl Into<String>, target: impl Into<String>, source_order: usize, target_order: usize) -> Self {
    let source = source.into();
    let target = target.into();
    Self {
      source_handle: Some(format!("{source}|outputs|{source_order}")),
      target_handle: Some(format!("{target}|inputs|{target_order}")),
      source,
      target,
      source_order,
      target_order,
      id: None,
      edge_type: None,
      mappers: Vec::new(),
    }
  }

  pub fn with_mappers(mut self, mappers: Vec<String>) -> Self {
    self.mappers = mappers;
    self
  }
}
