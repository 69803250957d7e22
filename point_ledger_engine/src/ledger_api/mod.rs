//! # Point ledger engine public API
//!
//! The `ledger_api` module exposes the programmatic API of the engine. It is split by concern:
//!
//! * [`LedgerApi`] owns the point ledger. It reconciles balances, rebuilds the attendance totals, serves the cached
//!   point map and reacts to raw edits of the datastore.
//! * [`AttendanceApi`] records boss spawns in the weekly attendance tables.
//! * [`AuctionApi`] lists items, runs auction sessions and writes each session's spend back to the ledger.
//!
//! The attendance and auction APIs are built on a `LedgerApi` and share its lock, debounce state and cache, so an
//! application should create one `LedgerApi` and hand clones of it to the others.
//!
//! # API usage
//!
//! ```rust,ignore
//! use point_ledger_engine::{AttendanceApi, EngineConfig, LedgerApi, SqliteDatastore, events::EventProducers};
//! let db = SqliteDatastore::new_with_url("sqlite://data/ledger.db", 5).await?;
//! let ledger = LedgerApi::new(db, EngineConfig::from_env_or_default(), EventProducers::default());
//! let attendance = AttendanceApi::new(ledger.clone());
//! attendance.submit_attendance("Venatus", "10/05/25 09:05", &["Alice Smith", "Bob"]).await?;
//! let points = ledger.get_ledger(false).await?;
//! ```
mod attendance_api;
mod auction_api;
mod errors;
mod ledger_api;
mod ledger_cache;
mod objects;

pub use attendance_api::AttendanceApi;
pub use auction_api::AuctionApi;
pub use errors::{LedgerError, LedgerWarning};
pub use ledger_api::LedgerApi;
pub use ledger_cache::{LedgerCache, LEDGER_SNAPSHOT_KEY};
pub use objects::*;
