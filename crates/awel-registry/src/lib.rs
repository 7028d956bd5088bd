//! AWEL Registry
//!
//! Maps the stable type ids used in flow documents to operator and resource
//! declarations ([`awel_config::ViewMetadata`],
//! [`awel_config::ResourceMetadata`]) and the factories that build them.
//! Also hosts dynamic parameter options and the builtin node types.

pub mod builtin;
mod error;
mod nodes;
mod options;
mod params;
mod registry;

pub use error::RegistryError;
pub use nodes::{BUILTIN_VARIABLES_CORE_FLOW_NODES, FlowNodesVariablesProvider};
pub use options::{FunctionOptions, OptionsProvider, StaticOptions, VariablesOptions};
pub use params::{Resource, ResourceClass, RunnableParameters};
pub use registry::{OperatorFactory, OperatorRegistration, Registry, ResourceFactory, ResourceRegistration};
