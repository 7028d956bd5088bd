//! AWEL Task
//!
//! The task/IO model shared by every operator:
//!
//! - [`TaskOutput`]: what one operator produced (a value, a lazy stream,
//!   nothing, or a branch skip)
//! - [`TaskContext`]: the per-run record of one operator
//! - [`InputContext`]: the read-only view of a node's parents
//!
//! Streams are consumed at most once unless made reentrant with
//! [`TaskOutput::into_reentrant`].

mod context;
mod error;
mod input;
mod output;
mod stream;

pub use context::{TaskContext, TaskState};
pub use error::TaskError;
pub use input::InputContext;
pub use output::{OutputStream, TaskOutput};
pub use stream::StreamOutput;
