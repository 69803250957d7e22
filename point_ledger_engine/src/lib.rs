//! Point Ledger Engine
//!
//! The Point Ledger Engine keeps a community's point economy consistent. Members earn points by attending boss spawns
//! and spend them in auctions. This library contains the core logic for the engine. It is storage-agnostic.
//!
//! The library is divided into three main sections:
//! 1. Collaborator contracts ([`mod@traits`]). The engine stores everything in a [`traits::TabularDatastore`] of
//!    row/column addressed cells, serialises writers through a [`traits::LockService`] and caches the point map in a
//!    [`traits::CacheService`]. In-memory ([`MemoryDatastore`], [`services`]) and SQLite ([`SqliteDatastore`])
//!    implementations are provided.
//! 2. Pure domain logic: identity and timestamp normalization ([`mod@normalize`]), table layouts ([`mod@sheets`]),
//!    reconciliation planning ([`mod@reconcile`]), fuzzy catalog matching ([`mod@catalog`]) and the bid book
//!    ([`mod@bids`]).
//! 3. The engine public API ([`mod@ledger_api`]): [`LedgerApi`], [`AttendanceApi`] and [`AuctionApi`]. All writes go
//!    through the lock and debounce [`mod@gate`].
//!
//! The engine also emits events, for example when a reconciliation completes or an item is settled. The
//! [`mod@events`] module provides a small actor framework so that you can hook into these events.
pub mod bids;
pub mod boss_registry;
pub mod catalog;
pub mod config;
pub mod db_types;
pub mod events;
pub mod gate;
pub mod helpers;
pub mod ledger_api;
pub mod memory;
pub mod normalize;
pub mod reconcile;
pub mod services;
pub mod sheets;
pub mod state;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use boss_registry::BossRegistry;
pub use config::EngineConfig;
pub use ledger_api::{AttendanceApi, AuctionApi, LedgerApi, LedgerError, LedgerWarning};
pub use memory::MemoryDatastore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatastore;
