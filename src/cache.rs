//! Query cache for characteristic reads.
//!
//! Remembers when a value was last fetched from the device and answers whether
//! a new fetch is due. A negative cache time disables re-querying entirely.

use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Cache {
    cache_time_ms: i64,
    last_queried: Option<Instant>,
}

impl Cache {
    /// Create a cache using `cache_time_ms` if given, otherwise `default_ms`.
    pub fn new(cache_time_ms: Option<i64>, default_ms: i64) -> Self {
        Self {
            cache_time_ms: cache_time_ms.unwrap_or(default_ms),
            last_queried: None,
        }
    }

    /// Create a cache from a raw config value. Anything that is not a number
    /// falls back to `default_ms`.
    pub fn from_config(value: &Value, default_ms: i64) -> Self {
        let cache_time = value.as_i64().or_else(|| value.as_f64().map(|v| v as i64));
        Self::new(cache_time, default_ms)
    }

    pub fn cache_time_ms(&self) -> i64 {
        self.cache_time_ms
    }

    /// Record that the value was just queried.
    pub fn queried(&mut self) {
        self.last_queried = Some(Instant::now());
    }

    pub fn is_infinite(&self) -> bool {
        self.cache_time_ms < 0
    }

    pub fn should_query(&self) -> bool {
        if self.is_infinite() {
            return false;
        }

        match self.last_queried {
            None => true,
            Some(at) => {
                at.elapsed() > Duration::from_millis(self.cache_time_ms.unsigned_abs())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_never_queried_is_due() {
        let cache = Cache::new(Some(1000), 0);
        assert!(cache.should_query());
        assert!(!cache.is_infinite());
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_query_after_cache_time() {
        let mut cache = Cache::new(Some(100), 0);
        cache.queried();
        assert!(!cache.should_query());

        tokio::time::advance(Duration::from_millis(100)).await;
        // strictly greater than the cache time
        assert!(!cache.should_query());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.should_query());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cache_time() {
        let mut cache = Cache::new(Some(0), 1000);
        cache.queried();
        assert!(!cache.should_query());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.should_query());
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_cache_never_queries() {
        let mut cache = Cache::new(Some(-1), 0);
        assert!(cache.is_infinite());
        assert!(!cache.should_query());

        cache.queried();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(cache.is_infinite());
        assert!(!cache.should_query());
    }

    #[test]
    fn test_from_config_uses_default_for_non_numbers() {
        assert_eq!(Cache::from_config(&json!(250), 0).cache_time_ms(), 250);
        assert_eq!(Cache::from_config(&json!(-1), 0).cache_time_ms(), -1);
        assert_eq!(Cache::from_config(&json!("250"), 42).cache_time_ms(), 42);
        assert_eq!(Cache::from_config(&Value::Null, 42).cache_time_ms(), 42);
    }
}
