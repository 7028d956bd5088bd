use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use awel_config::{FlowPanel, FlowState};
use awel_dag::Dag;
use awel_registry::Registry;
use awel_variables::{BuiltinVariablesProvider, StorageVariables, VariablesError, VariablesFilter};
use serde_json::Value;
use tracing::{error, info};

use crate::error::FlowError;
use crate::factory::FlowFactory;

pub const BUILTIN_VARIABLES_CORE_FLOWS: &str = "awel.core.flow.flows";

struct FlowEntry {
  panel: FlowPanel,
  dag: Option<Arc<Dag>>,
}

/// Long-lived store of flow panels and their materialized DAGs, keyed by
/// flow uid.
pub struct FlowManager {
  factory: FlowFactory,
  flows: RwLock<HashMap<String, FlowEntry>>,
}

impl FlowManager {
  pub fn new(registry: Arc<Registry>) -> Self {
    Self {
      factory: FlowFactory::new(registry),
      flows: RwLock::new(HashMap::new()),
    }
  }

  pub fn factory(&self) -> &FlowFactory {
    &self.factory
  }

  /// Store `panel` and materialize it, replacing any flow with the same uid.
  ///
  /// A fresh panel moves to developing once built. When materialization
  /// fails the panel is still stored, in the load-failed state with the
  /// error recorded.
  pub fn register(&self, mut panel: FlowPanel) -> Result<Arc<Dag>, FlowError> {
    let uid = panel.uid.clone();
    match self.factory.build(&panel) {
      Ok(dag) => {
        let dag = Arc::new(dag);
        if panel.state == FlowState::Initializing {
          panel.change_state(FlowState::Developing)?;
        }
        panel.dag_id = Some(dag.dag_id().to_string());
        panel.error_message = None;
        info!(uid = %uid, dag_id = %dag.dag_id(), state = %panel.state, "flow_registered");
        self.insert(panel, Some(Arc::clone(&dag)));
        Ok(dag)
      }
      Err(e) => {
        error!(uid = %uid, error = %e, "flow_load_failed");
        panel.state = FlowState::LoadFailed;
        panel.error_message = Some(e.to_string());
        self.insert(panel, None);
        Err(e)
      }
    }
  }

  fn insert(&self, panel: FlowPanel, dag: Option<Arc<Dag>>) {
    self
      .flows
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(panel.uid.clone(), FlowEntry { panel, dag });
  }

  pub fn get(&self, uid: &str) -> Option<FlowPanel> {
    let flows = self.flows.read().unwrap_or_else(|e| e.into_inner());
    flows.get(uid).map(|entry| entry.panel.clone())
  }

  pub fn dag(&self, uid: &str) -> Option<Arc<Dag>> {
    let flows = self.flows.read().unwrap_or_else(|e| e.into_inner());
    flows.get(uid).and_then(|entry| entry.dag.clone())
  }

  pub fn dag_by_id(&self, dag_id: &str) -> Option<Arc<Dag>> {
    let flows = self.flows.read().unwrap_or_else(|e| e.into_inner());
    flows
      .values()
      .filter_map(|entry| entry.dag.as_ref())
      .find(|dag| dag.dag_id() == dag_id)
      .cloned()
  }

  /// Every stored panel, ordered by name.
  pub fn list(&self) -> Vec<FlowPanel> {
    let flows = self.flows.read().unwrap_or_else(|e| e.into_inner());
    let mut panels: Vec<FlowPanel> = flows.values().map(|entry| entry.panel.clone()).collect();
    panels.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.uid.cmp(&b.uid)));
    panels
  }

  pub fn change_state(&self, uid: &str, next: FlowState) -> Result<FlowState, FlowError> {
    let mut flows = self.flows.write().unwrap_or_else(|e| e.into_inner());
    let entry = flows.get_mut(uid).ok_or_else(|| FlowError::NotFound { uid: uid.to_string() })?;
    entry.panel.change_state(next)?;
    info!(uid = %uid, state = %next, "flow_state_changed");
    Ok(entry.panel.state)
  }

  pub fn remove(&self, uid: &str) -> Option<FlowPanel> {
    let mut flows = self.flows.write().unwrap_or_else(|e| e.into_inner());
    flows.remove(uid).map(|entry| entry.panel)
  }
}

/// Lists the flows held by a [`FlowManager`]; each variable's value is the
/// flow uid.
pub struct FlowsVariablesProvider {
  manager: Arc<FlowManager>,
}

impl FlowsVariablesProvider {
  pub fn new(manager: Arc<FlowManager>) -> Self {
    Self { manager }
  }
}

#[async_trait]
impl BuiltinVariablesProvider for FlowsVariablesProvider {
  fn keys(&self) -> Vec<String> {
    vec![BUILTIN_VARIABLES_CORE_FLOWS.to_string()]
  }

  async fn get_variables(&self, key: &str, _filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    Ok(
      self
        .manager
        .list()
        .into_iter()
        .map(|panel| {
          let mut var = StorageVariables::new(key, panel.name, Value::String(panel.uid));
          var.label = panel.label;
          var.description = panel.description;
          var
        })
        .collect(),
    )
  }
}
