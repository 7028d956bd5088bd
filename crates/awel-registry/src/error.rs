use awel_variables::VariablesError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  #[error("unknown type '{type_cls}'")]
  UnknownType { type_cls: String },

  #[error("type '{type_cls}' is already registered")]
  DuplicateType { type_cls: String },

  #[error("missing required parameter '{name}'")]
  MissingParameter { name: String },

  #[error("invalid parameter '{name}': {message}")]
  InvalidParameter { name: String, message: String },

  #[error("parameter '{name}' expects a resource of type '{expected}', got '{actual}'")]
  WrongResourceType {
    name: String,
    expected: String,
    actual: String,
  },

  #[error("unknown options provider '{provider}'")]
  UnknownOptionsProvider { provider: String },

  #[error("failed to build '{type_cls}': {message}")]
  Build { type_cls: String, message: String },

  #[error(transparent)]
  Variables(#[from] VariablesError),
}

impl RegistryError {
  pub fn invalid(name: impl Into<String>, message: impl Into<String>) -> Self {
    RegistryError::InvalidParameter {
      name: name.into(),
      message: message.into(),
    }
  }
}
