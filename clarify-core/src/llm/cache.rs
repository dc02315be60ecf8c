//! Response caching for backend calls.
//!
//! Cache keys are content hashes over the request type, the input and a
//! context object. Context is canonicalised (object keys sorted) before
//! hashing so logically equal requests share a key regardless of field order.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

/// Cache key for a backend request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Generate a key from request type, input and context.
    pub fn generate(request_type: &str, input: &str, context: &Value) -> Self {
        let payload = serde_json::json!({
            "type": request_type,
            "input": input,
            "context": canonicalize(context),
        });
        Self::from_content(&canonicalize(&payload).to_string())
    }

    /// Generate a key from raw content.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        let hash = hasher.finalize();
        CacheKey(format!("{:x}", hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let short = self.0.get(..16).unwrap_or(&self.0);
        write!(f, "{}", short)
    }
}

/// Rebuild a JSON value with every object's keys in sorted order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Shape of the request a cache entry answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRequest {
    pub request_type: String,
    pub input: String,
    pub context: Value,
}

/// A cached backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: CacheKey,
    /// Request this entry answers
    pub request: CachedRequest,
    /// Cached response text
    pub response: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// Time-to-live in seconds
    pub ttl_secs: u64,
    /// Number of hits
    pub hit_count: u64,
    /// When the entry was last accessed
    pub last_accessed: DateTime<Utc>,
    /// Backend that produced the response
    pub provider: Option<String>,
}

impl CacheEntry {
    pub fn new(request: CachedRequest, response: impl Into<String>, ttl_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            key: CacheKey::generate(&request.request_type, &request.input, &request.context),
            request,
            response: response.into(),
            created_at: now,
            ttl_secs,
            hit_count: 0,
            last_accessed: now,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Valid only while `now - created_at < ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at < Duration::seconds(self.ttl_secs as i64)
    }

    /// Record a cache hit.
    pub fn record_hit(&mut self) {
        self.hit_count += 1;
        self.last_accessed = Utc::now();
    }
}

/// Key/value store for cached responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Get a valid entry, recording the hit. Expired entries read as misses.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert or replace an entry.
    async fn put(&self, entry: CacheEntry) -> Result<()>;

    /// Remove an entry; returns whether it existed.
    async fn remove(&self, key: &CacheKey) -> Result<bool>;

    /// Drop all expired entries; returns how many were dropped.
    async fn purge_expired(&self) -> Result<usize>;
}

/// Process-local cache backed by a hash map.
#[derive(Default)]
pub struct InMemoryResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let valid = match entries.get(key) {
            Some(entry) => entry.is_valid_at(now),
            None => return Ok(None),
        };
        if !valid {
            entries.remove(key);
            return Ok(None);
        }

        // Hits rewrite the entry with the bumped counter
        let mut entry = match entries.remove(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        entry.record_hit();
        entries.insert(key.clone(), entry.clone());
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_valid_at(now));
        Ok(before - entries.len())
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Time-to-live for new entries
    pub ttl_secs: u64,
    /// Expired entries are purged after this many writes
    pub purge_every: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            purge_every: 64,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Expired entries dropped by periodic purges
    pub purged: u64,
    /// Store failures, reported as misses
    pub errors: u64,
}

impl CacheStats {
    /// Calculate hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Facade over a [`ResponseCache`] that never fails.
///
/// Store errors are logged and reported as misses so that caching can only
/// ever help a request, never break it.
pub struct CacheManager {
    store: Arc<dyn ResponseCache>,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn ResponseCache>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// In-memory cache with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryResponseCache::new()), CacheConfig::default())
    }

    /// A manager that never stores or returns anything.
    pub fn disabled() -> Self {
        Self::new(
            Arc::new(InMemoryResponseCache::new()),
            CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Look up a cached response.
    pub async fn lookup(&self, request_type: &str, input: &str, context: &Value) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let key = CacheKey::generate(request_type, input, context);

        let result = self.store.get(&key).await;
        let mut stats = self.stats.write().await;
        match result {
            Ok(Some(entry)) => {
                stats.hits += 1;
                debug!(key = %key, request_type, hits = entry.hit_count, "cache hit");
                Some(entry.response)
            }
            Ok(None) => {
                stats.misses += 1;
                None
            }
            Err(e) => {
                stats.misses += 1;
                stats.errors += 1;
                warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Store a response under the request's key.
    pub async fn store(
        &self,
        request_type: &str,
        input: &str,
        context: &Value,
        response: &str,
        provider: Option<&str>,
    ) {
        if !self.config.enabled || response.trim().is_empty() {
            return;
        }
        let request = CachedRequest {
            request_type: request_type.to_string(),
            input: input.to_string(),
            context: context.clone(),
        };
        let mut entry = CacheEntry::new(request, response, self.config.ttl_secs);
        if let Some(p) = provider {
            entry = entry.with_provider(p);
        }

        let key = entry.key.clone();
        let result = self.store.put(entry).await;
        let purge_due = {
            let mut stats = self.stats.write().await;
            match result {
                Ok(()) => {
                    stats.writes += 1;
                    self.config.purge_every > 0 && stats.writes % self.config.purge_every == 0
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(key = %key, error = %e, "cache store failed");
                    false
                }
            }
        };
        if purge_due {
            self.purge().await;
        }
    }

    /// Drop expired entries from the store.
    pub async fn purge(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(purged) => {
                self.stats.write().await.purged += purged as u64;
                if purged > 0 {
                    debug!(purged, "purged expired cache entries");
                }
                purged
            }
            Err(e) => {
                self.stats.write().await.errors += 1;
                warn!(error = %e, "cache purge failed");
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}
