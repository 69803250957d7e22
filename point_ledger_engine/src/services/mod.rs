//! In-process implementations of the [`crate::traits::LockService`] and [`crate::traits::CacheService`] contracts.
mod memory_cache;
mod process_lock;

pub use memory_cache::MemoryCache;
pub use process_lock::{ProcessLock, ProcessLockToken};
