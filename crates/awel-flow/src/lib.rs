//! AWEL Flow
//!
//! Turns [`awel_config::FlowPanel`] documents into runnable
//! [`awel_dag::Dag`]s using the types in an [`awel_registry::Registry`],
//! and keeps the materialized flows in a [`FlowManager`].

mod error;
mod factory;
mod manager;

pub use error::FlowError;
pub use factory::FlowFactory;
pub use manager::{BUILTIN_VARIABLES_CORE_FLOWS, FlowManager, FlowsVariablesProvider};
