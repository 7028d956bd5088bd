//! AWEL Cache
//!
//! Key/value storage for trigger results. Entries carry an optional expiry
//! and are added inside a soft transaction: [`CacheStorage::rollback`]
//! drops whatever was written since the last [`CacheStorage::commit`].
//!
//! Two backends are provided:
//! - [`MemoryCacheStorage`], process-local
//! - [`FileCacheStorage`], one `.cache` and one `.meta` file per entry

mod error;
mod file;
mod memory;
mod storage;

pub use error::CacheError;
pub use file::FileCacheStorage;
pub use memory::MemoryCacheStorage;
pub use storage::{CacheMeta, CacheStorage, CachedOutput};
