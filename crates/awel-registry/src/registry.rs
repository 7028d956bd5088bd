//! The type registry.
//!
//! Flow documents reference operators and resources by a stable type id
//! (`type_cls`). The registry maps each id to its declared metadata and a
//! factory that builds the runtime object from configured parameters.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use awel_config::{OptionValue, Parameter, RefreshOptionRequest, ResourceMetadata, ResourceType, ViewMetadata};
use awel_dag::Operator;
use tracing::debug;

use crate::error::RegistryError;
use crate::options::OptionsProvider;
use crate::params::{Resource, ResourceClass, RunnableParameters};

pub type OperatorFactory = Arc<dyn Fn(&RunnableParameters) -> Result<Arc<dyn Operator>, RegistryError> + Send + Sync>;

pub type ResourceFactory =
  Arc<dyn Fn(&RunnableParameters) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> + Send + Sync>;

/// Maximum length of a compatibility rename chain.
const MAX_COMPAT_HOPS: usize = 8;

pub struct OperatorRegistration {
  metadata: ViewMetadata,
  factory: OperatorFactory,
}

impl OperatorRegistration {
  pub fn new<F, O>(metadata: ViewMetadata, factory: F) -> Self
  where
    F: Fn(&RunnableParameters) -> Result<O, RegistryError> + Send + Sync + 'static,
    O: Operator + 'static,
  {
    Self {
      metadata,
      factory: Arc::new(move |params: &RunnableParameters| {
        Ok(Arc::new(factory(params)?) as Arc<dyn Operator>)
      }),
    }
  }

  pub fn metadata(&self) -> &ViewMetadata {
    &self.metadata
  }

  pub fn build(&self, params: &RunnableParameters) -> Result<Arc<dyn Operator>, RegistryError> {
    (self.factory)(params)
  }
}

pub struct ResourceRegistration {
  metadata: ResourceMetadata,
  factory: Option<ResourceFactory>,
}

impl ResourceRegistration {
  pub fn new<F, R>(metadata: ResourceMetadata, factory: F) -> Self
  where
    F: Fn(&RunnableParameters) -> Result<R, RegistryError> + Send + Sync + 'static,
    R: Any + Send + Sync,
  {
    Self {
      metadata,
      factory: Some(Arc::new(move |params: &RunnableParameters| {
        Ok(Arc::new(factory(params)?) as Arc<dyn Any + Send + Sync>)
      })),
    }
  }

  /// A class-typed resource: consumers receive a [`ResourceClass`].
  pub fn class(metadata: ResourceMetadata) -> Self {
    Self {
      metadata: metadata.with_resource_type(ResourceType::Class),
      factory: None,
    }
  }

  pub fn metadata(&self) -> &ResourceMetadata {
    &self.metadata
  }

  pub fn build(&self, params: &RunnableParameters) -> Result<Resource, RegistryError> {
    let type_cls = self.metadata.type_cls.clone();
    match (&self.factory, self.metadata.resource_type) {
      (Some(factory), ResourceType::Instance) => Ok(Resource::from_arc(type_cls, factory(params)?)),
      _ => Ok(Resource::new(type_cls.clone(), ResourceClass { type_cls })),
    }
  }
}

#[derive(Default)]
pub struct Registry {
  operators: RwLock<HashMap<String, Arc<OperatorRegistration>>>,
  resources: RwLock<HashMap<String, Arc<ResourceRegistration>>>,
  compat: RwLock<HashMap<String, String>>,
  options: RwLock<HashMap<String, Arc<dyn OptionsProvider>>>,
}

impl Registry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding the builtin operators and resources.
  pub fn with_builtins() -> Self {
    let registry = Self::new();
    crate::builtin::register_builtins(&registry);
    registry
  }

  pub fn register_operator(&self, registration: OperatorRegistration) -> Result<(), RegistryError> {
    let type_cls = registration.metadata.type_cls.clone();
    let mut operators = self.operators.write().unwrap_or_else(|e| e.into_inner());
    if operators.contains_key(&type_cls) {
      return Err(RegistryError::DuplicateType { type_cls });
    }
    debug!(type_cls = %type_cls, "operator_registered");
    operators.insert(type_cls, Arc::new(registration));
    Ok(())
  }

  pub fn register_resource(&self, registration: ResourceRegistration) -> Result<(), RegistryError> {
    let type_cls = registration.metadata.type_cls.clone();
    let mut resources = self.resources.write().unwrap_or_else(|e| e.into_inner());
    if resources.contains_key(&type_cls) {
      return Err(RegistryError::DuplicateType { type_cls });
    }
    debug!(type_cls = %type_cls, "resource_registered");
    resources.insert(type_cls, Arc::new(registration));
    Ok(())
  }

  /// Record that `old` was renamed to `new`.
  pub fn register_compat(&self, old: impl Into<String>, new: impl Into<String>) {
    self
      .compat
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(old.into(), new.into());
  }

  /// The current id for `type_cls`, following renames.
  pub fn resolve_type(&self, type_cls: &str) -> String {
    let compat = self.compat.read().unwrap_or_else(|e| e.into_inner());
    let mut current = type_cls;
    for _ in 0..MAX_COMPAT_HOPS {
      match compat.get(current) {
        Some(next) => current = next,
        None => break,
      }
    }
    current.to_string()
  }

  pub fn operator(&self, type_cls: &str) -> Result<Arc<OperatorRegistration>, RegistryError> {
    let resolved = self.resolve_type(type_cls);
    self
      .operators
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(&resolved)
      .cloned()
      .ok_or_else(|| RegistryError::UnknownType {
        type_cls: type_cls.to_string(),
      })
  }

  pub fn resource(&self, type_cls: &str) -> Result<Arc<ResourceRegistration>, RegistryError> {
    let resolved = self.resolve_type(type_cls);
    self
      .resources
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(&resolved)
      .cloned()
      .ok_or_else(|| RegistryError::UnknownType {
        type_cls: type_cls.to_string(),
      })
  }

  /// Declared metadata of every operator, ordered by type id.
  pub fn operator_metadata(&self) -> Vec<ViewMetadata> {
    let operators = self.operators.read().unwrap_or_else(|e| e.into_inner());
    let mut out: Vec<ViewMetadata> = operators.values().map(|r| r.metadata.clone()).collect();
    out.sort_by(|a, b| a.type_cls.cmp(&b.type_cls));
    out
  }

  pub fn resource_metadata(&self) -> Vec<ResourceMetadata> {
    let resources = self.resources.read().unwrap_or_else(|e| e.into_inner());
    let mut out: Vec<ResourceMetadata> = resources.values().map(|r| r.metadata.clone()).collect();
    out.sort_by(|a, b| a.type_cls.cmp(&b.type_cls));
    out
  }

  /// Build an operator from its registered declaration, taking values from
  /// `configured` (typically a flow node's parameters).
  pub fn build_operator(
    &self,
    type_cls: &str,
    configured: &[Parameter],
    resources: &HashMap<String, Resource>,
  ) -> Result<Arc<dyn Operator>, RegistryError> {
    let registration = self.operator(type_cls)?;
    let parameters = merge_values(&registration.metadata.parameters, configured);
    let params = RunnableParameters::from_parameters(&parameters, resources)?;
    registration.build(&params)
  }

  pub fn build_resource(
    &self,
    type_cls: &str,
    configured: &[Parameter],
    resources: &HashMap<String, Resource>,
  ) -> Result<Resource, RegistryError> {
    let registration = self.resource(type_cls)?;
    let parameters = merge_values(&registration.metadata.parameters, configured);
    let params = RunnableParameters::from_parameters(&parameters, resources)?;
    registration.build(&params)
  }

  pub fn register_options_provider(&self, id: impl Into<String>, provider: Arc<dyn OptionsProvider>) {
    self
      .options
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert(id.into(), provider);
  }

  /// Recompute a parameter's options with the provider the request names.
  pub async fn refresh_options(&self, request: &RefreshOptionRequest) -> Result<Vec<OptionValue>, RegistryError> {
    let provider = self
      .options
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(&request.provider)
      .cloned()
      .ok_or_else(|| RegistryError::UnknownOptionsProvider {
        provider: request.provider.clone(),
      })?;
    provider.refresh(request).await
  }
}

/// Declared parameters with the values configured for them. Configured
/// entries are matched by name or alias; undeclared ones are ignored.
fn merge_values(declared: &[Parameter], configured: &[Parameter]) -> Vec<Parameter> {
  declared
    .iter()
    .map(|decl| {
      let mut param = decl.clone();
      if let Some(value) = configured
        .iter()
        .find(|c| decl.answers_to(&c.name))
        .and_then(|c| c.value.clone())
      {
        param.value = Some(value);
      }
      param
    })
    .collect()
}
