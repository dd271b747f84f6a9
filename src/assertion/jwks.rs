//! Key Sets
//!
//! Published JSON Web Key Sets with a TTL cache and forced refetch for key
//! rotation.

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::{HttpRequest, HttpTransport};
use crate::error::{AdapterResult, AssertionError};
use crate::flows::send_request;
use crate::telemetry::TracingHooks;

/// Default key set cache lifetime.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(3600);

/// Source of verification keys.
#[async_trait]
pub trait JwksSource: Send + Sync {
    /// Current key set, possibly cached.
    async fn keys(&self) -> AdapterResult<JwkSet>;

    /// Bypass the cache and fetch the key set again.
    async fn refetch(&self) -> AdapterResult<JwkSet>;
}

struct CachedKeys {
    keys: JwkSet,
    expires_at: Instant,
}

/// Key set fetched from the provider's `jwks_uri`.
pub struct HttpJwksSource<T: HttpTransport> {
    provider_id: String,
    url: String,
    transport: Arc<T>,
    timeout: Duration,
    ttl: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl<T: HttpTransport> HttpJwksSource<T> {
    pub fn new(
        provider_id: impl Into<String>,
        url: impl Into<String>,
        transport: Arc<T>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            url: url.into(),
            transport,
            timeout,
            ttl: DEFAULT_JWKS_TTL,
            cache: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn fetch(&self) -> AdapterResult<JwkSet> {
        let request = HttpRequest::get(self.url.clone(), self.timeout).header("accept", "application/json");
        let response = send_request(&*self.transport, &self.provider_id, request).await?;

        if !response.is_success() {
            return Err(AssertionError::KeySetUnavailable {
                message: format!("Key set request failed with status {}", response.status),
            }
            .into());
        }

        let keys: JwkSet =
            serde_json::from_str(&response.body).map_err(|e| AssertionError::KeySetUnavailable {
                message: format!("Invalid key set: {}", e),
            })?;

        *self.cache.write().await = Some(CachedKeys {
            keys: keys.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(keys)
    }
}

#[async_trait]
impl<T: HttpTransport> JwksSource for HttpJwksSource<T> {
    async fn keys(&self) -> AdapterResult<JwkSet> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if Instant::now() < entry.expires_at {
                    return Ok(entry.keys.clone());
                }
            }
        }
        self.fetch().await
    }

    async fn refetch(&self) -> AdapterResult<JwkSet> {
        TracingHooks::on_key_set_refetch(&self.provider_id, &self.url);
        self.cache.write().await.take();
        self.fetch().await
    }
}

/// Mock key source for testing. Serves queued key sets in order, repeating
/// the last one.
#[derive(Default)]
pub struct MockJwksSource {
    sets: Mutex<Vec<JwkSet>>,
    fetch_count: Mutex<u32>,
}

impl MockJwksSource {
    pub fn new(keys: JwkSet) -> Self {
        Self {
            sets: Mutex::new(vec![keys]),
            fetch_count: Mutex::new(0),
        }
    }

    /// Key set returned after the next refetch.
    pub fn rotate_to(&self, keys: JwkSet) -> &Self {
        self.sets.lock().unwrap_or_else(|p| p.into_inner()).push(keys);
        self
    }

    /// Number of refetches performed.
    pub fn fetch_count(&self) -> u32 {
        *self.fetch_count.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn current(&self) -> AdapterResult<JwkSet> {
        self.sets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .first()
            .cloned()
            .ok_or_else(|| {
                AssertionError::KeySetUnavailable {
                    message: "no keys".to_string(),
                }
                .into()
            })
    }
}

#[async_trait]
impl JwksSource for MockJwksSource {
    async fn keys(&self) -> AdapterResult<JwkSet> {
        self.current()
    }

    async fn refetch(&self) -> AdapterResult<JwkSet> {
        *self.fetch_count.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        {
            let mut sets = self.sets.lock().unwrap_or_else(|p| p.into_inner());
            if sets.len() > 1 {
                sets.remove(0);
            }
        }
        self.current()
    }
}
