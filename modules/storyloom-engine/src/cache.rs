//! Completion response cache.
//!
//! Shared as `Arc<ResponseCache>` between concurrently running candidates.
//! Values are idempotent functions of their key, so duplicate writes resolve
//! last-writer-wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use ai_client::{AiResult, CompletionRequest};

/// First 16 hex chars of a sha256 digest.
pub fn short_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))[..16].to_string()
}

// =============================================================================
// CacheKey
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    pub component: String,
    pub model: String,
    pub template_version: String,
    pub params_hash: String,
    pub input_hash: String,
}

impl CacheKey {
    pub fn for_request(
        component: &str,
        model: &str,
        template_version: &str,
        request: &CompletionRequest,
    ) -> Self {
        let params = serde_json::to_vec(&request.params_json()).unwrap_or_default();
        Self {
            component: component.to_string(),
            model: model.to_string(),
            template_version: template_version.to_string(),
            params_hash: short_hash(&params),
            input_hash: short_hash(request.prompt.as_bytes()),
        }
    }

    /// Storage key: sha256 of the key's canonical JSON.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

// =============================================================================
// ResponseCache
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} hits, {} misses",
            self.entries, self.hits, self.misses
        )
    }
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let digest = key.digest();
        let found = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&digest)
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn put(&self, key: &CacheKey, value: String) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.digest(), value);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn memo(&self, key: CacheKey) -> Memo<'_> {
        Memo { cache: self, key }
    }

    /// Load a cache file written by [`ResponseCache::save`]. A missing file
    /// yields an empty cache.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse cache file: {}", path.display()))?;
        Ok(Self {
            entries: RwLock::new(entries),
            ..Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            serde_json::to_string(&*entries)?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;
        Ok(())
    }
}

/// Pending lookup created by [`ResponseCache::memo`].
pub struct Memo<'a> {
    cache: &'a ResponseCache,
    key: CacheKey,
}

impl Memo<'_> {
    /// Cached value, or the result of `f`. Only successful results are stored.
    pub async fn get_or<F, Fut>(self, f: F) -> AiResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AiResult<String>>,
    {
        if let Some(hit) = self.cache.get(&self.key) {
            return Ok(hit);
        }
        let value = f().await?;
        self.cache.put(&self.key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::AiError;

    fn key(prompt: &str) -> CacheKey {
        CacheKey::for_request("beat_generate", "mock-v1", "v1", &CompletionRequest::new(prompt))
    }

    #[test]
    fn key_changes_with_params_and_input() {
        let a = key("one");
        let b = key("two");
        assert_eq!(a.params_hash, b.params_hash);
        assert_ne!(a.input_hash, b.input_hash);

        let hotter = CacheKey::for_request(
            "beat_generate",
            "mock-v1",
            "v1",
            &CompletionRequest::new("one").temperature(1.2),
        );
        assert_ne!(a.params_hash, hotter.params_hash);
        assert_ne!(a.digest(), hotter.digest());
        assert_eq!(a.input_hash.len(), 16);
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = ResponseCache::new();
        assert!(cache.get(&key("a")).is_none());
        cache.put(&key("a"), "text".into());
        assert_eq!(cache.get(&key("a")).as_deref(), Some("text"));
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));
    }

    #[tokio::test]
    async fn memo_runs_closure_once() {
        let cache = ResponseCache::new();
        let first = cache
            .memo(key("p"))
            .get_or(|| async { Ok("fresh".to_string()) })
            .await
            .unwrap();
        let second = cache
            .memo(key("p"))
            .get_or(|| async { Ok("never used".to_string()) })
            .await
            .unwrap();
        assert_eq!(first, "fresh");
        assert_eq!(second, "fresh");
    }

    #[tokio::test]
    async fn memo_does_not_store_errors() {
        let cache = ResponseCache::new();
        let result = cache
            .memo(key("p"))
            .get_or(|| async { Err(AiError::EmptyResponse) })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
