use std::sync::{Arc, RwLock};

use awel_dag::{Dag, WorkflowRunner};
use axum::Router;
use axum::http::Method;
use axum::routing::MethodRouter;
use tracing::{info, warn};

use crate::error::TriggerError;
use crate::http::{HttpTrigger, HttpTriggerMetadata, try_route};

pub const DEFAULT_API_PREFIX: &str = "/api/v1/awel/trigger";
pub const DEFAULT_PRIORITY: i32 = 10;

#[derive(Clone)]
struct RouteEntry {
  path: String,
  method: Method,
  priority: i32,
  dag_id: String,
  trigger_id: String,
  router: MethodRouter,
}

/// A route currently served by a [`TriggerManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
  pub path: String,
  pub method: String,
  pub priority: i32,
  pub dag_id: String,
  pub trigger_id: String,
}

/// Owns the HTTP routes of every registered DAG.
///
/// Two triggers claiming the same method and path are resolved by
/// priority: a higher one replaces the route, a lower one is rejected and
/// an equal one replaces it with a warning. The combined [`Router`] is
/// built lazily and rebuilt after every change.
pub struct TriggerManager {
  runner: Arc<WorkflowRunner>,
  api_prefix: String,
  routes: RwLock<Vec<RouteEntry>>,
  cached: RwLock<Option<Router>>,
}

impl TriggerManager {
  pub fn new(runner: Arc<WorkflowRunner>) -> Self {
    Self {
      runner,
      api_prefix: DEFAULT_API_PREFIX.to_string(),
      routes: RwLock::new(Vec::new()),
      cached: RwLock::new(None),
    }
  }

  pub fn with_api_prefix(mut self, api_prefix: impl Into<String>) -> Self {
    self.api_prefix = api_prefix.into();
    self
  }

  pub fn api_prefix(&self) -> &str {
    &self.api_prefix
  }

  /// Mount every HTTP trigger node of `dag` at the default priority.
  pub fn register_dag(&self, dag: &Arc<Dag>) -> Result<Vec<HttpTriggerMetadata>, TriggerError> {
    self.register_dag_with_priority(dag, DEFAULT_PRIORITY)
  }

  pub fn register_dag_with_priority(
    &self,
    dag: &Arc<Dag>,
    priority: i32,
  ) -> Result<Vec<HttpTriggerMetadata>, TriggerError> {
    let mut mounted = Vec::new();
    for node in dag.trigger_nodes() {
      let Some(trigger) = node.operator().downcast_ref::<HttpTrigger>() else {
        continue;
      };
      mounted.push(self.register_trigger(trigger, dag, node.node_id(), priority)?);
    }
    Ok(mounted)
  }

  pub fn register_trigger(
    &self,
    trigger: &HttpTrigger,
    dag: &Arc<Dag>,
    trigger_id: &str,
    priority: i32,
  ) -> Result<HttpTriggerMetadata, TriggerError> {
    let (metadata, routers) = trigger.mount(&self.api_prefix, Arc::clone(dag), trigger_id, Arc::clone(&self.runner))?;

    let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
    for (method, _) in &routers {
      if let Some(existing) = routes
        .iter()
        .find(|r| r.path == metadata.path && r.method == *method)
      {
        if existing.priority > priority {
          return Err(TriggerError::RouteConflict {
            method: method.to_string(),
            path: metadata.path.clone(),
            priority: existing.priority,
          });
        }
        if existing.priority == priority && existing.dag_id != metadata.dag_id {
          warn!(
            method = %method,
            path = %metadata.path,
            replaced_dag_id = %existing.dag_id,
            dag_id = %metadata.dag_id,
            "http_trigger_replaced"
          );
        }
      }
    }

    let mut candidate = routes.clone();
    for (method, router) in routers {
      candidate.retain(|r| !(r.path == metadata.path && r.method == method));
      candidate.push(RouteEntry {
        path: metadata.path.clone(),
        method,
        priority,
        dag_id: metadata.dag_id.clone(),
        trigger_id: trigger_id.to_string(),
        router,
      });
    }
    // Build before committing so a route axum rejects leaves the table as it was.
    let router = try_route(
      Router::new(),
      candidate.iter().map(|r| (r.path.clone(), r.router.clone())),
    )?;
    *routes = candidate;
    *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(router);
    drop(routes);

    info!(
      path = %metadata.path,
      methods = ?metadata.methods,
      dag_id = %metadata.dag_id,
      priority,
      "http_trigger_registered"
    );
    Ok(metadata)
  }

  /// Drop every route of `dag_id`; returns how many were removed.
  pub fn unregister_dag(&self, dag_id: &str) -> usize {
    let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
    let before = routes.len();
    routes.retain(|r| r.dag_id != dag_id);
    let removed = before - routes.len();
    drop(routes);
    if removed > 0 {
      self.invalidate();
      info!(dag_id = %dag_id, removed, "http_trigger_unregistered");
    }
    removed
  }

  pub fn routes(&self) -> Vec<RouteInfo> {
    let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
    routes
      .iter()
      .map(|r| RouteInfo {
        path: r.path.clone(),
        method: r.method.to_string(),
        priority: r.priority,
        dag_id: r.dag_id.clone(),
        trigger_id: r.trigger_id.clone(),
      })
      .collect()
  }

  /// The router serving every registered trigger.
  pub fn router(&self) -> Router {
    if let Some(router) = self.cached.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
      return router.clone();
    }
    let router = {
      let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
      routes
        .iter()
        .fold(Router::new(), |router, r| router.route(&r.path, r.router.clone()))
    };
    *self.cached.write().unwrap_or_else(|e| e.into_inner()) = Some(router.clone());
    router
  }

  fn invalidate(&self) {
    *self.cached.write().unwrap_or_else(|e| e.into_inner()) = None;
  }
}
