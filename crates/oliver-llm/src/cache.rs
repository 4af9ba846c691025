//! Short-lived response cache.
//!
//! Keys are the SHA-256 of provider, model, context and prompt. A hit returns exactly the
//! text the backend produced earlier; errors are never stored.

use crate::backends::LanguageModel;
use async_trait::async_trait;
use oliver_core::OliverResult;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Entry bound used by [`ResponseCache::new`].
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// In-memory TTL cache of generated text.
///
/// Expired entries are dropped on lookup and swept on insert once the cache is full.
/// If it is still full after the sweep, the entry closest to expiry is evicted.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, (Instant, String)>>,
}

impl ResponseCache {
    /// Cache holding each response for `ttl`, bounded at [`DEFAULT_MAX_ENTRIES`].
    pub fn new(ttl: Duration) -> Self {
        Self::with_max_entries(ttl, DEFAULT_MAX_ENTRIES)
    }

    /// Cache bounded at `max_entries` (at least one).
    pub fn with_max_entries(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for one generation request.
    pub fn key(provider: &str, model: &str, context: Option<&str>, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [provider, model, context.unwrap_or_default(), prompt] {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }

    /// The cached text for `key`, unless it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((expires, value)) if Instant::now() < *expires => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key`, making room first when the cache is full.
    pub fn set(&self, key: String, value: String) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let before = entries.len();
            entries.retain(|_, (expires, _)| now < *expires);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, (expires, _))| *expires)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
            debug!(
                removed = before - entries.len(),
                max_entries = self.max_entries,
                "Response cache full, evicted entries"
            );
        }
        entries.insert(key, (now + self.ttl, value));
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (expires, _)| now < *expires);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`LanguageModel`] that consults a [`ResponseCache`] before calling `inner`.
pub struct CachedModel {
    inner: Arc<dyn LanguageModel>,
    cache: Arc<ResponseCache>,
}

impl CachedModel {
    /// Wrap `inner`; several models may share one cache since keys include the provider.
    pub fn new(inner: Arc<dyn LanguageModel>, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl LanguageModel for CachedModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate(&self, prompt: &str, context: Option<&str>) -> OliverResult<String> {
        let key = ResponseCache::key(self.inner.name(), self.inner.model(), context, prompt);
        if let Some(hit) = self.cache.get(&key) {
            debug!(provider = %self.inner.name(), "Response cache hit");
            return Ok(hit);
        }
        let text = self.inner.generate(prompt, context).await?;
        self.cache.set(key, text.clone());
        Ok(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use oliver_core::OliverError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn model(&self) -> &str {
            "m1"
        }
        async fn generate(&self, prompt: &str, _context: Option<&str>) -> OliverResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OliverError::Connection("down".into()));
            }
            Ok(format!("{prompt}#{n}"))
        }
    }

    fn counting(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail,
        })
    }

    #[test]
    fn test_key_separates_fields() {
        let a = ResponseCache::key("p", "m", None, "ab");
        let b = ResponseCache::key("p", "m", Some("a"), "b");
        let c = ResponseCache::key("p", "m", None, "ab");
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hit_returns_identical_text() {
        let inner = counting(false);
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let model = CachedModel::new(inner.clone(), cache.clone());

        let first = model.generate("hello", None).await.unwrap();
        let second = model.generate("hello", None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.name(), "counting");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let inner = counting(true);
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let model = CachedModel::new(inner.clone(), cache.clone());

        assert!(model.generate("x", None).await.is_err());
        assert!(model.generate("x", None).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = ResponseCache::new(Duration::from_millis(10));
        cache.set("k".into(), "v".into());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("k").is_none());

        cache.set("k2".into(), "v".into());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn test_full_cache_sweeps_expired_entries() {
        let cache = ResponseCache::with_max_entries(Duration::from_millis(10), 3);
        for i in 0..3 {
            cache.set(format!("old-{i}"), "v".into());
        }
        std::thread::sleep(Duration::from_millis(30));

        cache.set("fresh".into(), "v".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh").as_deref(), Some("v"));
    }

    #[test]
    fn test_full_cache_evicts_oldest_live_entry() {
        let cache = ResponseCache::with_max_entries(Duration::from_secs(60), 2);
        cache.set("a".into(), "1".into());
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b".into(), "2".into());
        std::thread::sleep(Duration::from_millis(2));
        cache.set("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some("2"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));

        // Overwriting an existing key never evicts.
        cache.set("c".into(), "4".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_unique_prompts_stay_bounded() {
        let inner = counting(false);
        let cache = Arc::new(ResponseCache::with_max_entries(Duration::from_secs(60), 8));
        let model = CachedModel::new(inner.clone(), cache.clone());
        for i in 0..50 {
            model.generate(&format!("prompt {i}"), None).await.unwrap();
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 50);
        assert_eq!(cache.len(), 8);
    }
}
