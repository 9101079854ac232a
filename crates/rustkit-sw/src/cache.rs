//! Cache storage.
//!
//! [`CacheStorage`] is the seam to the platform's named response caches.
//! Every cache is named after a worker generation; entries are keyed by
//! method + URL (fragment excluded), one entry per key, last write wins.

use crate::CacheError;
use async_trait::async_trait;
use hashbrown::HashMap;
use http::Method;
use rustkit_net::{Request, Response};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

/// Platform cache storage (`caches` global).
///
/// Each call is atomic; no grouping across calls is provided.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Names of all caches, in creation order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Store a response for a request, replacing any previous entry.
    async fn put(&self, name: &str, request: &Request, response: &Response)
        -> Result<(), CacheError>;

    /// Look a request up in one cache.
    async fn match_in(&self, name: &str, request: &Request)
        -> Result<Option<Response>, CacheError>;

    /// Look a request up across all caches, oldest cache first.
    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Request URLs stored in one cache.
    async fn cached_urls(&self, name: &str) -> Result<Vec<Url>, CacheError>;
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request URL, without fragment.
    pub url: Url,

    /// Stored response snapshot.
    pub response: Response,

    /// When the entry was written.
    pub cached_at: SystemTime,
}

/// Cache key for a request, or `None` when the method cannot be cached.
fn cache_key(request: &Request) -> Option<String> {
    if request.method != Method::GET {
        return None;
    }
    Some(strip_fragment(&request.url).to_string())
}

fn strip_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

/// A single named cache.
#[derive(Debug)]
struct Cache {
    name: String,
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        cache_key(request).and_then(|key| self.entries.get(&key))
    }

    fn put(&mut self, request: &Request, response: &Response) -> Result<(), CacheError> {
        let key = cache_key(request)
            .ok_or_else(|| CacheError::UnsupportedMethod(request.method.to_string()))?;
        let entry = CacheEntry {
            url: strip_fragment(&request.url),
            response: response.clone(),
            cached_at: SystemTime::now(),
        };
        self.entries.insert(key, entry);
        Ok(())
    }
}

/// In-memory [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<Vec<Cache>>,
}

impl MemoryCacheStorage {
    /// Create empty cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one cache entry.
    pub async fn entry(&self, name: &str, request: &Request) -> Option<CacheEntry> {
        let caches = self.caches.read().await;
        caches
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.match_request(request))
            .cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        if !caches.iter().any(|c| c.name == name) {
            trace!(cache = %name, "Creating cache");
            caches.push(Cache::new(name));
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.caches.read().await.iter().any(|c| c.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|c| c.name != name);
        Ok(caches.len() != before)
    }

    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        cache.put(request, response)?;
        trace!(cache = %name, url = %request.url, "Stored response");
        Ok(())
    }

    async fn match_in(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<Response>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.match_request(request))
            .map(|entry| entry.response.clone()))
    }

    async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        let caches = self.caches.read().await;
        Ok(caches
            .iter()
            .find_map(|c| c.match_request(request))
            .map(|entry| entry.response.clone()))
    }

    async fn cached_urls(&self, name: &str) -> Result<Vec<Url>, CacheError> {
        let caches = self.caches.read().await;
        let cache = caches
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        let mut urls: Vec<Url> = cache.entries.values().map(|e| e.url.clone()).collect();
        urls.sort();
        Ok(urls)
    }
}
