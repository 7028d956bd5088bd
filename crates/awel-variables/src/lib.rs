//! AWEL Variables
//!
//! Scoped, typed, optionally encrypted values that operators reference as
//! `${key:name@scope:scope_key#sys_code%user_name}` and that the runner
//! resolves right before an operator executes.
//!
//! - [`StorageInterface`] persists [`StorageVariables`] ([`InMemoryStorage`],
//!   [`SqliteVariablesStorage`])
//! - [`Encryption`] seals secrets at rest ([`AesGcmEncryption`],
//!   [`SimpleEncryption`])
//! - [`VariablesProvider`] is what the runner resolves against
//! - [`DagVariables`] are per-DAG defaults consulted first

mod encryption;
mod error;
mod identifier;
mod placeholder;
mod provider;
mod sqlite;
mod storage;

pub use encryption::{AesGcmEncryption, DEFAULT_KDF_ITERATIONS, Encryption, SimpleEncryption, generate_salt};
pub use error::VariablesError;
pub use identifier::{
  ParsedVariable, VARIABLES_SCOPE_AGENT, VARIABLES_SCOPE_APP, VARIABLES_SCOPE_DATASOURCE, VARIABLES_SCOPE_FLOW,
  VARIABLES_SCOPE_FLOW_PRIVATE, VARIABLES_SCOPE_GLOBAL, VARIABLES_SCOPE_USER, VariablesIdentifier,
  build_variable_string, is_variable_string, parse_variable,
};
pub use placeholder::{DagVariables, VariablesPlaceHolder};
pub use provider::{
  AllSecretsProvider, AllVariablesProvider, BUILTIN_VARIABLES_CORE_SECRETS, BUILTIN_VARIABLES_CORE_VARIABLES,
  BuiltinVariablesProvider, BuiltinVariablesRegistry, StorageVariablesProvider, VariablesProvider,
};
pub use sqlite::SqliteVariablesStorage;
pub use storage::{InMemoryStorage, StorageInterface, StorageVariables, ValueType, VariableCategory, VariablesFilter};
