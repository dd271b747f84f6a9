//! Token Manager
//!
//! Persists one provider's token set under namespaced keys and hands out
//! valid tokens, refreshing them per the configured policy.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::core::Clock;
use crate::error::{AdapterError, AdapterResult, TokenError};
use crate::flows::{RefreshPolicy, TokenRefresher};
use crate::telemetry::TracingHooks;
use crate::token::TokenStore;
use crate::types::TokenSet;

/// Token manager interface.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Replace the stored token set.
    async fn save(&self, tokens: &TokenSet) -> AdapterResult<()>;

    /// Read the stored token set without refreshing it.
    async fn load(&self) -> AdapterResult<Option<TokenSet>>;

    /// Remove every stored key for this provider.
    async fn clear(&self) -> AdapterResult<()>;

    /// Get a usable token set, refreshing first when the policy asks for it.
    async fn valid_tokens(&self) -> AdapterResult<TokenSet>;
}

/// Default token manager implementation.
pub struct DefaultTokenManager<S: TokenStore, R: TokenRefresher> {
    provider_id: String,
    store: Arc<S>,
    refresher: Arc<R>,
    policy: RefreshPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: TokenStore, R: TokenRefresher> DefaultTokenManager<S, R> {
    /// Create new token manager.
    pub fn new(
        provider_id: impl Into<String>,
        store: Arc<S>,
        refresher: Arc<R>,
        policy: RefreshPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            store,
            refresher,
            policy,
            clock,
        }
    }

    /// Storage key for one token field, e.g. `github.access_token`.
    pub fn key(&self, name: &str) -> String {
        format!("{}.{}", self.provider_id, name)
    }

    fn prefix(&self) -> String {
        format!("{}.", self.provider_id)
    }

    async fn refresh_and_save(&self, tokens: &TokenSet) -> AdapterResult<TokenSet> {
        let refreshed = self.refresher.refresh(tokens).await?;
        self.save(&refreshed).await?;
        Ok(refreshed)
    }
}

#[async_trait]
impl<S: TokenStore, R: TokenRefresher> TokenManager for DefaultTokenManager<S, R> {
    async fn save(&self, tokens: &TokenSet) -> AdapterResult<()> {
        let entries = tokens
            .to_entries()
            .into_iter()
            .map(|(name, value)| (self.key(&name), value))
            .collect();
        self.store.replace_prefix(&self.prefix(), entries).await
    }

    async fn load(&self) -> AdapterResult<Option<TokenSet>> {
        let prefix = self.prefix();
        let entries: BTreeMap<String, String> = self
            .store
            .get_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|(key, value)| key.strip_prefix(&prefix).map(|k| (k.to_string(), value)))
            .collect();

        if entries.is_empty() {
            return Ok(None);
        }
        TokenSet::from_entries(entries).map(Some)
    }

    async fn clear(&self) -> AdapterResult<()> {
        self.store.delete_prefix(&self.prefix()).await?;
        TracingHooks::on_disconnect(&self.provider_id);
        Ok(())
    }

    async fn valid_tokens(&self) -> AdapterResult<TokenSet> {
        let tokens = self.load().await?.ok_or(TokenError::NotConnected)?;
        let now = self.clock.now();
        let expired = tokens.is_expired(now);

        if !self.policy.needs_refresh(&tokens, now) {
            if expired {
                return Err(TokenError::Expired.into());
            }
            return Ok(tokens);
        }

        if tokens.refresh_token().is_none() {
            if expired {
                return Err(TokenError::Expired.into());
            }
            return Ok(tokens);
        }

        match self.refresh_and_save(&tokens).await {
            Ok(refreshed) => Ok(refreshed),
            Err(err) if !expired && !matches!(err, AdapterError::Storage(_)) => {
                TracingHooks::on_proactive_refresh_failed(&self.provider_id, &err);
                Ok(tokens)
            }
            Err(err) => Err(err),
        }
    }
}

/// Mock token manager for testing.
#[derive(Default)]
pub struct MockTokenManager {
    tokens: Mutex<Option<TokenSet>>,
    next_error: Mutex<Option<AdapterError>>,
    save_count: Mutex<u32>,
}

impl MockTokenManager {
    /// Create new mock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the stored token set.
    pub fn set_tokens(&self, tokens: TokenSet) -> &Self {
        *self.tokens.lock().unwrap_or_else(|p| p.into_inner()) = Some(tokens);
        self
    }

    /// Set next error.
    pub fn set_next_error(&self, error: AdapterError) -> &Self {
        *self.next_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
        self
    }

    /// Number of save calls.
    pub fn save_count(&self) -> u32 {
        *self.save_count.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn take_error(&self) -> AdapterResult<()> {
        match self.next_error.lock().unwrap_or_else(|p| p.into_inner()).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TokenManager for MockTokenManager {
    async fn save(&self, tokens: &TokenSet) -> AdapterResult<()> {
        self.take_error()?;
        *self.save_count.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        *self.tokens.lock().unwrap_or_else(|p| p.into_inner()) = Some(tokens.clone());
        Ok(())
    }

    async fn load(&self) -> AdapterResult<Option<TokenSet>> {
        self.take_error()?;
        Ok(self.tokens.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    async fn clear(&self) -> AdapterResult<()> {
        self.take_error()?;
        *self.tokens.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }

    async fn valid_tokens(&self) -> AdapterResult<TokenSet> {
        self.take_error()?;
        self.tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| TokenError::NotConnected.into())
    }
}

/// Create mock token manager for testing.
pub fn create_mock_token_manager() -> MockTokenManager {
    MockTokenManager::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FixedClock;
    use crate::error::{ProviderError, StorageError};
    use crate::flows::MockTokenRefresher;
    use crate::token::{InMemoryTokenStore, MockTokenStore};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn manager<S: TokenStore>(
        store: Arc<S>,
        refresher: Arc<MockTokenRefresher>,
        policy: RefreshPolicy,
        now: DateTime<Utc>,
    ) -> DefaultTokenManager<S, MockTokenRefresher> {
        DefaultTokenManager::new("github", store, refresher, policy, Arc::new(FixedClock(now)))
    }

    fn reactive() -> RefreshPolicy {
        RefreshPolicy {
            proactive_threshold: None,
            reactive: true,
        }
    }

    #[tokio::test]
    async fn test_save_uses_namespaced_keys() {
        let store = Arc::new(InMemoryTokenStore::new());
        let manager = manager(store.clone(), Arc::new(MockTokenRefresher::new()), reactive(), t0());

        let mut tokens = TokenSet::new("A1").with_refresh_token("R1").with_expiry(t0(), 3600);
        tokens.extra.insert("openid".to_string(), "https://id.example.com/u/1".to_string());
        manager.save(&tokens).await.unwrap();

        assert_eq!(
            store.get("github.access_token").await.unwrap().as_deref(),
            Some("A1")
        );
        assert_eq!(
            store.get("github.expires_at").await.unwrap(),
            Some((t0().timestamp() + 3600).to_string())
        );

        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token(), Some("R1"));
        assert_eq!(loaded.expires_at, tokens.expires_at);
        assert_eq!(
            loaded.extra.get("openid").map(String::as_str),
            Some("https://id.example.com/u/1")
        );
    }

    #[tokio::test]
    async fn test_save_replaces_previous_set() {
        let store = Arc::new(InMemoryTokenStore::new());
        let manager = manager(store.clone(), Arc::new(MockTokenRefresher::new()), reactive(), t0());

        manager
            .save(&TokenSet::new("A1").with_refresh_token("R1"))
            .await
            .unwrap();
        manager.save(&TokenSet::new("A2")).await.unwrap();

        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token(), "A2");
        assert_eq!(loaded.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_valid_tokens_without_session() {
        let manager = manager(
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(MockTokenRefresher::new()),
            reactive(),
            t0(),
        );
        assert!(matches!(
            manager.valid_tokens().await,
            Err(AdapterError::Token(TokenError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn test_reactive_refresh_persists_new_tokens() {
        let store = Arc::new(InMemoryTokenStore::new());
        let refresher = Arc::new(MockTokenRefresher::new());
        let later = t0() + ChronoDuration::seconds(4000);
        refresher.set_next_tokens(TokenSet::new("A2").with_expiry(later, 3600));

        let writer = manager(store.clone(), refresher.clone(), reactive(), t0());
        writer
            .save(&TokenSet::new("A1").with_refresh_token("R1").with_expiry(t0(), 3600))
            .await
            .unwrap();

        let reader = manager(store.clone(), refresher.clone(), reactive(), later);
        let tokens = reader.valid_tokens().await.unwrap();
        assert_eq!(tokens.access_token(), "A2");
        assert_eq!(refresher.refresh_count(), 1);
        assert_eq!(
            store.get("github.access_token").await.unwrap().as_deref(),
            Some("A2")
        );
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let store = Arc::new(InMemoryTokenStore::new());
        let refresher = Arc::new(MockTokenRefresher::new());
        manager(store.clone(), refresher.clone(), reactive(), t0())
            .save(&TokenSet::new("A1").with_expiry(t0(), 60))
            .await
            .unwrap();

        let result = manager(store, refresher.clone(), reactive(), t0() + ChronoDuration::seconds(61))
            .valid_tokens()
            .await;
        assert!(matches!(result, Err(AdapterError::Token(TokenError::Expired))));
        assert_eq!(refresher.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_proactive_failure_keeps_valid_token() {
        let store = Arc::new(InMemoryTokenStore::new());
        let refresher = Arc::new(MockTokenRefresher::new());
        refresher.set_next_error(ProviderError::new("server_error", 503).into());
        let policy = RefreshPolicy {
            proactive_threshold: Some(Duration::from_secs(600)),
            reactive: true,
        };

        manager(store.clone(), refresher.clone(), policy, t0())
            .save(&TokenSet::new("A1").with_refresh_token("R1").with_expiry(t0(), 3600))
            .await
            .unwrap();

        let tokens = manager(store, refresher.clone(), policy, t0() + ChronoDuration::seconds(3300))
            .valid_tokens()
            .await
            .unwrap();
        assert_eq!(tokens.access_token(), "A1");
        assert_eq!(refresher.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_reactive_failure_surfaces() {
        let store = Arc::new(InMemoryTokenStore::new());
        let refresher = Arc::new(MockTokenRefresher::new());
        refresher.set_next_error(ProviderError::new("invalid_grant", 400).into());

        manager(store.clone(), refresher.clone(), reactive(), t0())
            .save(&TokenSet::new("A1").with_refresh_token("R1").with_expiry(t0(), 60))
            .await
            .unwrap();

        let result = manager(store, refresher, reactive(), t0() + ChronoDuration::seconds(120))
            .valid_tokens()
            .await;
        match result {
            Err(AdapterError::Provider(e)) => assert_eq!(e.code, "invalid_grant"),
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_only_touches_own_namespace() {
        let store = Arc::new(MockTokenStore::new());
        store.set("gitlab.access_token", "other").await.unwrap();
        let manager = manager(store.clone(), Arc::new(MockTokenRefresher::new()), reactive(), t0());

        manager.save(&TokenSet::new("A1")).await.unwrap();
        manager.clear().await.unwrap();

        assert!(manager.load().await.unwrap().is_none());
        assert_eq!(
            store.get("gitlab.access_token").await.unwrap().as_deref(),
            Some("other")
        );
        assert!(store.get_delete_history().contains(&"github.".to_string()));
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_session() {
        let store = Arc::new(MockTokenStore::new());
        let manager = manager(store.clone(), Arc::new(MockTokenRefresher::new()), reactive(), t0());
        manager
            .save(&TokenSet::new("A1").with_refresh_token("R1").with_expiry(t0(), 3600))
            .await
            .unwrap();

        store.fail_on_write(1);
        let result = manager
            .save(&TokenSet::new("A2").with_expiry(t0(), 60))
            .await;
        assert!(matches!(
            result,
            Err(AdapterError::Storage(StorageError::WriteFailed { .. }))
        ));

        let loaded = manager.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token(), "A1");
        assert_eq!(loaded.refresh_token(), Some("R1"));
        assert_eq!(loaded.expires_at, Some(t0() + ChronoDuration::seconds(3600)));
        assert_eq!(store.snapshot().len(), 4);
    }

    #[tokio::test]
    async fn test_providers_sharing_a_store_stay_isolated() {
        let store = Arc::new(InMemoryTokenStore::new());
        let refresher = Arc::new(MockTokenRefresher::new());
        let github = manager(store.clone(), refresher.clone(), reactive(), t0());
        let enterprise = DefaultTokenManager::new(
            "github-enterprise",
            store.clone(),
            refresher,
            reactive(),
            Arc::new(FixedClock(t0())),
        );

        github.save(&TokenSet::new("A1")).await.unwrap();
        enterprise
            .save(&TokenSet::new("E1").with_refresh_token("ER1"))
            .await
            .unwrap();
        github.save(&TokenSet::new("A2")).await.unwrap();

        let loaded = github.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token(), "A2");
        assert!(loaded.extra.is_empty());
        let other = enterprise.load().await.unwrap().unwrap();
        assert_eq!(other.access_token(), "E1");
        assert_eq!(other.refresh_token(), Some("ER1"));

        github.clear().await.unwrap();
        assert!(github.load().await.unwrap().is_none());
        assert_eq!(enterprise.load().await.unwrap().unwrap().access_token(), "E1");
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let store = Arc::new(MockTokenStore::new());
        store.set_should_fail(true);
        let manager = manager(store, Arc::new(MockTokenRefresher::new()), reactive(), t0());
        assert!(matches!(
            manager.save(&TokenSet::new("A1")).await,
            Err(AdapterError::Storage(_))
        ));
    }
}
