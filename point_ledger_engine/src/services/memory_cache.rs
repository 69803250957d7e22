use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::*;
use tokio::time::Instant;

use crate::traits::CacheService;

/// A string cache held in process memory.
///
/// Expiry is measured with tokio's clock, so a paused test runtime controls it.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheService for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(e) => {
                error!("🗂️ The cache mutex is poisoned. Treating as a miss. {e}");
                return None;
            },
        };
        match entries.get(key) {
            Some((value, expiry)) if Instant::now() < *expiry => Some(value.clone()),
            Some(_) => {
                trace!("🗂️ Cache entry {key} has expired");
                entries.remove(key);
                None
            },
            None => None,
        }
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), (value, Instant::now() + ttl));
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache.put("k", "v".into(), Duration::from_secs(10));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn remove_evicts() {
        let cache = MemoryCache::new();
        cache.put("k", "v".into(), Duration::from_secs(10));
        cache.remove("k");
        assert_eq!(cache.get("k"), None);
    }
}
