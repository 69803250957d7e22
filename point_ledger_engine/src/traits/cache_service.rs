use std::time::Duration;

/// A process-wide string cache. Expired entries must never be returned by `get`.
pub trait CacheService: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn put(&self, key: &str, value: String, ttl: Duration);

    fn remove(&self, key: &str);
}
