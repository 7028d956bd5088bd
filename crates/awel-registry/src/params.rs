//! Runtime arguments handed to operator and resource factories.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use awel_config::Parameter;
use awel_dag::Param;
use awel_variables::is_variable_string;
use serde_json::{Number, Value};

use crate::error::RegistryError;

/// A built resource instance, shared by every operator wired to it.
#[derive(Clone)]
pub struct Resource {
  type_cls: String,
  instance: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for Resource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Resource").field("type_cls", &self.type_cls).finish()
  }
}

impl Resource {
  pub fn new<T: Any + Send + Sync>(type_cls: impl Into<String>, instance: T) -> Self {
    Self::from_arc(type_cls, Arc::new(instance))
  }

  pub fn from_arc(type_cls: impl Into<String>, instance: Arc<dyn Any + Send + Sync>) -> Self {
    Self {
      type_cls: type_cls.into(),
      instance,
    }
  }

  pub fn type_cls(&self) -> &str {
    &self.type_cls
  }

  pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    Arc::clone(&self.instance).downcast::<T>().ok()
  }
}

/// Stand-in for a class-typed resource: the consumer receives the type,
/// not an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceClass {
  pub type_cls: String,
}

/// Named arguments for a factory: plain parameters (possibly variable
/// references) and resources.
#[derive(Debug, Clone, Default)]
pub struct RunnableParameters {
  params: HashMap<String, Param>,
  resources: HashMap<String, Resource>,
}

impl RunnableParameters {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build arguments from declared parameters carrying configured values.
  ///
  /// Values are coerced to the declared primitive type; strings of the form
  /// `${...}` become variable references resolved at run time. `resources`
  /// maps resource parameter names to their built instances.
  pub fn from_parameters(
    parameters: &[Parameter],
    resources: &HashMap<String, Resource>,
  ) -> Result<Self, RegistryError> {
    let mut out = Self::new();
    for param in parameters {
      if param.is_resource() {
        match resources.get(&param.name) {
          Some(resource) => {
            out.resources.insert(param.name.clone(), resource.clone());
          }
          None if param.optional => {}
          None => {
            return Err(RegistryError::MissingParameter {
              name: param.name.clone(),
            });
          }
        }
        continue;
      }

      match param.effective_value() {
        Some(Value::String(s)) if is_variable_string(s) => {
          out
            .params
            .insert(param.name.clone(), Param::from_value(&param.name, Value::String(s.clone())));
        }
        Some(value) => {
          let value = coerce(param, value.clone())?;
          out.params.insert(param.name.clone(), Param::Literal(value));
        }
        None if param.optional => {}
        None => {
          return Err(RegistryError::MissingParameter {
            name: param.name.clone(),
          });
        }
      }
    }
    Ok(out)
  }

  pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
    let name = name.into();
    let param = Param::from_value(&name, value);
    self.params.insert(name, param);
    self
  }

  pub fn with_resource(mut self, name: impl Into<String>, resource: Resource) -> Self {
    self.resources.insert(name.into(), resource);
    self
  }

  pub fn param(&self, name: &str) -> Option<&Param> {
    self.params.get(name)
  }

  pub fn require_param(&self, name: &str) -> Result<Param, RegistryError> {
    self.param(name).cloned().ok_or_else(|| RegistryError::MissingParameter {
      name: name.to_string(),
    })
  }

  /// A literal value. Variable references are not literals.
  pub fn value(&self, name: &str) -> Option<&Value> {
    match self.params.get(name) {
      Some(Param::Literal(value)) => Some(value),
      _ => None,
    }
  }

  pub fn require_value(&self, name: &str) -> Result<&Value, RegistryError> {
    match self.params.get(name) {
      Some(Param::Literal(value)) => Ok(value),
      Some(Param::Variable(_)) => Err(RegistryError::invalid(name, "must be a literal, not a variable")),
      None => Err(RegistryError::MissingParameter { name: name.to_string() }),
    }
  }

  pub fn require_str(&self, name: &str) -> Result<&str, RegistryError> {
    self
      .require_value(name)?
      .as_str()
      .ok_or_else(|| RegistryError::invalid(name, "expected a string"))
  }

  pub fn resource(&self, name: &str) -> Option<&Resource> {
    self.resources.get(name)
  }

  /// The resource wired into `name`, as its concrete type.
  pub fn require_resource<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
    let resource = self.resource(name).ok_or_else(|| RegistryError::MissingParameter {
      name: name.to_string(),
    })?;
    resource.downcast::<T>().ok_or_else(|| RegistryError::WrongResourceType {
      name: name.to_string(),
      expected: std::any::type_name::<T>().to_string(),
      actual: resource.type_cls().to_string(),
    })
  }

  /// Like [`Self::require_resource`], but absent resources are `None`.
  pub fn optional_resource<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>, RegistryError> {
    match self.resource(name) {
      Some(_) => self.require_resource(name).map(Some),
      None => Ok(None),
    }
  }
}

/// Coerce a configured value to the parameter's declared primitive type.
/// Non-primitive types pass through unchanged.
fn coerce(param: &Parameter, value: Value) -> Result<Value, RegistryError> {
  let mismatch = |value: &Value| RegistryError::invalid(&param.name, format!("expected {}, got {value}", param.type_cls));
  match (param.type_cls.as_str(), value) {
    (_, Value::Null) => Ok(Value::Null),
    ("str" | "string", Value::String(s)) => Ok(Value::String(s)),
    ("str" | "string", v @ (Value::Number(_) | Value::Bool(_))) => Ok(Value::String(v.to_string())),
    ("int" | "integer", Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
    ("int" | "integer", Value::String(s)) => s
      .trim()
      .parse::<i64>()
      .map(Value::from)
      .map_err(|_| mismatch(&Value::String(s))),
    ("float" | "number", Value::Number(n)) => Ok(Value::Number(n)),
    ("float" | "number", Value::String(s)) => s
      .trim()
      .parse::<f64>()
      .ok()
      .and_then(Number::from_f64)
      .map(Value::Number)
      .ok_or_else(|| mismatch(&Value::String(s))),
    ("bool" | "boolean", Value::Bool(b)) => Ok(Value::Bool(b)),
    ("bool" | "boolean", Value::String(s)) => match s.to_ascii_lowercase().as_str() {
      "true" | "1" | "yes" => Ok(Value::Bool(true)),
      "false" | "0" | "no" => Ok(Value::Bool(false)),
      _ => Err(mismatch(&Value::String(s))),
    },
    ("str" | "string" | "int" | "integer" | "float" | "number" | "bool" | "boolean", other) => Err(mismatch(&other)),
    (_, other) => Ok(other),
  }
}
