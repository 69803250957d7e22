//! SQLite backend for the point ledger engine.
//!
//! Set `LEDGER_DATABASE_URL` (or pass a URL to [`SqliteDatastore::new_with_url`]) and call
//! [`SqliteDatastore::run_migrations`] once before use.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatastore;
