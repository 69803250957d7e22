//! # Collaborator contracts
//!
//! The engine never talks to storage, locking or caching infrastructure directly. Instead, it relies on three
//! narrow contracts that backends implement.
//!
//! ## Traits
//! * [`TabularDatastore`] is the system of record: named tables of row/column addressed cells, with bulk range reads
//!   and writes, row appends and row deletion. There are no transactions and no uniqueness constraints; the engine
//!   enforces both itself.
//! * [`LockService`] provides a process-wide mutual-exclusion lock with a bounded wait.
//! * [`CacheService`] is a string key/value cache with per-entry time-to-live.
mod cache_service;
mod lock_service;
mod tabular_datastore;

pub use cache_service::CacheService;
pub use lock_service::{LockService, LockTimeout};
pub use tabular_datastore::{validate_table_name, CellRange, DatastoreError, TabularDatastore};
