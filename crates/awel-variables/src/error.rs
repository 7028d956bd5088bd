/// Error type for variable parsing, storage and resolution.
#[derive(Debug, thiserror::Error)]
pub enum VariablesError {
  #[error("invalid variable identifier '{input}': {message}")]
  InvalidIdentifier { input: String, message: String },

  #[error("variable not found: {key}")]
  NotFound { key: String },

  #[error("failed to decrypt variable {key}: {message}")]
  Decryption { key: String, message: String },

  #[error("failed to encrypt value: {message}")]
  Encryption { message: String },

  #[error("value of variable {key} is not a valid {value_type}: {message}")]
  InvalidValue {
    key: String,
    value_type: String,
    message: String,
  },

  #[error("unsupported operation: {message}")]
  Unsupported { message: String },

  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}
