//! AWEL Trigger
//!
//! Entry points that start DAG runs from outside:
//! - [`HttpTrigger`] serves a DAG over HTTP, mounted through a
//!   [`TriggerManager`] or straight into a caller's axum router
//! - [`IteratorTrigger`] runs a DAG once per item with bounded
//!   concurrency, retries, timeouts and an optional result cache

pub mod builtin;
mod error;
mod http;
mod iterator;
mod manager;

pub use error::TriggerError;
pub use http::{
  CommonLlmHttpRequestBody, DEFAULT_STREAM_MEDIA_TYPE, HttpTrigger, HttpTriggerMetadata, RequestBodyType,
  StreamingPredicate, default_streaming_predicate,
};
pub use iterator::{CacheKeyFn, IteratorCache, IteratorResult, IteratorTrigger, trigger_dag};
pub use manager::{DEFAULT_API_PREFIX, DEFAULT_PRIORITY, RouteInfo, TriggerManager};
