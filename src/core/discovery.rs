//! OIDC Discovery
//!
//! OpenID Connect Discovery 1.0 / RFC 8414 metadata lookup, used to fill in a
//! provider's token, userinfo and JWKS endpoints from its issuer URL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::transport::{HttpRequest, HttpTransport};
use crate::error::{AdapterResult, ConfigurationError, UnexpectedResponseError};

/// Discovery metadata document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

struct CacheEntry {
    document: DiscoveryDocument,
    expires_at: Instant,
}

/// Discovery client with a per-issuer TTL cache.
pub struct DiscoveryClient<T: HttpTransport> {
    transport: Arc<T>,
    timeout: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl<T: HttpTransport> DiscoveryClient<T> {
    /// Create a discovery client with a one hour cache.
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self::with_cache_ttl(transport, timeout, Duration::from_secs(3600))
    }

    /// Create a discovery client with a custom cache TTL.
    pub fn with_cache_ttl(transport: Arc<T>, timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            transport,
            timeout,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    fn normalize_issuer(issuer: &str) -> String {
        issuer.trim_end_matches('/').to_string()
    }

    fn cached(&self, key: &str) -> Option<DiscoveryDocument> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        match cache.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.document.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    /// Fetch (or return cached) metadata for an issuer.
    pub async fn fetch(&self, issuer: &str) -> AdapterResult<DiscoveryDocument> {
        let issuer = Self::normalize_issuer(issuer);
        if let Some(document) = self.cached(&issuer) {
            return Ok(document);
        }

        let url = format!("{}/.well-known/openid-configuration", issuer);
        let request = HttpRequest::get(url, self.timeout).header("accept", "application/json");
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(ConfigurationError::DiscoveryFailed {
                message: format!("Discovery request failed with status {}", response.status),
            }
            .into());
        }

        let document: DiscoveryDocument = serde_json::from_str(&response.body).map_err(|e| {
            UnexpectedResponseError::InvalidBody {
                message: e.to_string(),
            }
        })?;

        if document.token_endpoint.is_empty() {
            return Err(ConfigurationError::DiscoveryFailed {
                message: "Discovery document missing token endpoint".to_string(),
            }
            .into());
        }

        let received = Self::normalize_issuer(&document.issuer);
        if received != issuer {
            return Err(ConfigurationError::DiscoveryFailed {
                message: format!("Issuer mismatch: expected {}, got {}", issuer, received),
            }
            .into());
        }

        tracing::debug!(issuer = %issuer, "Discovery document fetched");

        self.cache.lock().unwrap_or_else(|p| p.into_inner()).insert(
            issuer,
            CacheEntry {
                document: document.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );

        Ok(document)
    }

    /// Drop cached metadata for one issuer, or all of them.
    pub fn clear_cache(&self, issuer: Option<&str>) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        match issuer {
            Some(i) => {
                cache.remove(&Self::normalize_issuer(i));
            }
            None => cache.clear(),
        }
    }
}
