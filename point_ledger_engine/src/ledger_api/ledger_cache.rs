//! Read-through cache for the point ledger snapshot.
//!
//! A single entry is tracked. Every invalidation bumps a generation counter, and an entry is only served if it was
//! populated in the current generation, so a reader that raced an invalidation can never resurrect the old snapshot.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use serde::{Deserialize, Serialize};

use crate::{ledger_api::objects::LedgerSnapshot, traits::CacheService};

pub const LEDGER_SNAPSHOT_KEY: &str = "ledger snapshot";

#[derive(Serialize, Deserialize)]
struct CachedSnapshot {
    generation: u64,
    snapshot: LedgerSnapshot,
}

#[derive(Clone)]
pub struct LedgerCache {
    cache: Arc<dyn CacheService>,
    ttl: Duration,
    generation: Arc<AtomicU64>,
}

impl LedgerCache {
    pub fn new(cache: Arc<dyn CacheService>, ttl: Duration) -> Self {
        Self { cache, ttl, generation: Arc::new(AtomicU64::new(0)) }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The cached snapshot, if there is one from the current generation that has not expired.
    pub fn get(&self) -> Option<LedgerSnapshot> {
        let payload = self.cache.get(LEDGER_SNAPSHOT_KEY)?;
        match serde_json::from_str::<CachedSnapshot>(&payload) {
            Ok(cached) if cached.generation == self.generation() => {
                trace!("🗂️ Ledger snapshot cache hit");
                Some(cached.snapshot)
            },
            Ok(cached) => {
                debug!("🗂️ Ignoring a ledger snapshot from generation {}", cached.generation);
                None
            },
            Err(e) => {
                warn!("🗂️ The cached ledger snapshot is corrupt and has been evicted. {e}");
                self.cache.remove(LEDGER_SNAPSHOT_KEY);
                None
            },
        }
    }

    /// Stores `snapshot` if no invalidation has happened since `generation` was read.
    pub fn populate(&self, generation: u64, snapshot: &LedgerSnapshot) {
        if generation != self.generation() {
            debug!("🗂️ The ledger changed while it was being read. Not caching the snapshot");
            return;
        }
        let payload = CachedSnapshot { generation, snapshot: snapshot.clone() };
        match serde_json::to_string(&payload) {
            Ok(json) => self.cache.put(LEDGER_SNAPSHOT_KEY, json, self.ttl),
            Err(e) => warn!("🗂️ Could not serialize the ledger snapshot. {e}"),
        }
    }

    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.cache.remove(LEDGER_SNAPSHOT_KEY);
        debug!("🗂️ Ledger snapshot invalidated (generation {generation})");
    }
}
