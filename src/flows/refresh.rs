//! Token Refresh
//!
//! RFC 6749 Section 6 refresh, or a provider's dedicated refresh endpoint.
//! A refresh result replaces the previous token set; nothing is carried over.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::{Clock, HttpTransport};
use crate::error::{AdapterError, AdapterResult, TokenError};
use crate::flows::client_auth::{apply_client_auth, token_request};
use crate::flows::send_request;
use crate::telemetry::TracingHooks;
use crate::types::{ProviderConfig, RefreshSettings, RefreshStyle, TokenResponse, TokenSet};

/// When a stored token set should be refreshed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh ahead of expiry when less than this remains.
    pub proactive_threshold: Option<Duration>,
    /// Refresh once the token has expired.
    pub reactive: bool,
}

impl RefreshPolicy {
    pub fn from_settings(settings: &RefreshSettings) -> Self {
        Self {
            proactive_threshold: settings.proactive_threshold_secs.map(Duration::from_secs),
            reactive: settings.reactive,
        }
    }

    /// Policy that never refreshes.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn needs_refresh(&self, tokens: &TokenSet, now: DateTime<Utc>) -> bool {
        if self.reactive && tokens.is_expired(now) {
            return true;
        }
        match self.proactive_threshold {
            Some(threshold) => tokens.is_expiring_within(now, threshold),
            None => false,
        }
    }
}

/// Token refresh interface.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtain a new token set from the refresh token in `tokens`.
    async fn refresh(&self, tokens: &TokenSet) -> AdapterResult<TokenSet>;
}

/// Refresher for one provider.
pub struct DefaultTokenRefresher<T: HttpTransport> {
    config: Arc<ProviderConfig>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
}

impl<T: HttpTransport> DefaultTokenRefresher<T> {
    pub fn new(config: Arc<ProviderConfig>, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            transport,
            clock,
        }
    }

    fn check_extended(
        previous: &TokenSet,
        refreshed: &TokenSet,
        now: DateTime<Utc>,
    ) -> AdapterResult<()> {
        if let Some(new_expiry) = refreshed.expires_at {
            let extends_previous = previous
                .expires_at
                .map(|old| new_expiry > old)
                .unwrap_or(true);
            if new_expiry <= now || !extends_previous {
                return Err(TokenError::RefreshDidNotExtend.into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<T: HttpTransport> TokenRefresher for DefaultTokenRefresher<T> {
    async fn refresh(&self, tokens: &TokenSet) -> AdapterResult<TokenSet> {
        let settings = self
            .config
            .refresh
            .as_ref()
            .ok_or(TokenError::RefreshNotSupported)?;
        let refresh_token = tokens.refresh_token().ok_or(TokenError::NoRefreshToken)?;

        let (url, method, mut params) = match &settings.style {
            RefreshStyle::ReExchange => (
                self.config.token_endpoint.as_str(),
                self.config.token_method,
                vec![
                    ("grant_type".to_string(), "refresh_token".to_string()),
                    ("refresh_token".to_string(), refresh_token.to_string()),
                ],
            ),
            RefreshStyle::Dedicated {
                endpoint,
                method,
                grant_type,
                token_param,
            } => (
                endpoint.as_str(),
                *method,
                vec![
                    ("grant_type".to_string(), grant_type.clone()),
                    (token_param.clone(), refresh_token.to_string()),
                ],
            ),
        };

        let now = self.clock.now();
        let authorization = apply_client_auth(&self.config, now, &mut params)?;
        let request = token_request(&self.config, url, method, &params, authorization);
        let response = send_request(&*self.transport, &self.config.provider_id, request).await?;

        let refreshed = TokenResponse::parse(&response)?.into_token_set(
            now,
            self.config.fixed_expiry_secs,
            &self.config.persist_fields,
        )?;
        Self::check_extended(tokens, &refreshed, now)?;
        self.config.check_profile_source(&refreshed)?;

        TracingHooks::on_token_refreshed(&self.config.provider_id, refreshed.expires_in);
        Ok(refreshed)
    }
}

/// Mock token refresher for testing.
#[derive(Default)]
pub struct MockTokenRefresher {
    refresh_count: Mutex<u32>,
    next_tokens: Mutex<Option<TokenSet>>,
    next_error: Mutex<Option<AdapterError>>,
}

impl MockTokenRefresher {
    /// Create new mock refresher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set next token set.
    pub fn set_next_tokens(&self, tokens: TokenSet) -> &Self {
        *self.next_tokens.lock().unwrap_or_else(|p| p.into_inner()) = Some(tokens);
        self
    }

    /// Set next error.
    pub fn set_next_error(&self, error: AdapterError) -> &Self {
        *self.next_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
        self
    }

    /// Number of refresh calls.
    pub fn refresh_count(&self) -> u32 {
        *self.refresh_count.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl TokenRefresher for MockTokenRefresher {
    async fn refresh(&self, tokens: &TokenSet) -> AdapterResult<TokenSet> {
        *self.refresh_count.lock().unwrap_or_else(|p| p.into_inner()) += 1;

        if let Some(error) = self.next_error.lock().unwrap_or_else(|p| p.into_inner()).take() {
            return Err(error);
        }
        if tokens.refresh_token().is_none() {
            return Err(TokenError::NoRefreshToken.into());
        }

        Ok(self
            .next_tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_else(|| TokenSet::new("mock-refreshed-token")))
    }
}

/// Create mock token refresher for testing.
pub fn create_mock_token_refresher() -> MockTokenRefresher {
    MockTokenRefresher::new()
}
