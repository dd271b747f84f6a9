//! Social Login Adapter
//!
//! High-level adapter for one provider that combines exchange, verification,
//! storage, refresh and profile fetching.

use std::sync::Arc;

use crate::assertion::IdTokenVerifier;
use crate::core::{random_urlsafe, Clock, HttpTransport, ReqwestHttpTransport, SystemClock};
use crate::error::{AdapterResult, ConfigurationError, TokenError, UnexpectedResponseError};
use crate::flows::{
    build_authorization_url, DefaultTokenExchanger, DefaultTokenRefresher, RefreshPolicy,
    TokenExchanger, TokenRefresher,
};
use crate::profile::{DefaultProfileFetcher, FieldMapping, ProfileFetcher};
use crate::token::{DefaultTokenManager, InMemoryTokenStore, TokenManager, TokenStore};
use crate::types::{
    AuthorizationRequest, AuthorizationUrl, Exchanged, Grant, Profile, Protocol, ProviderConfig,
    RequestToken, TokenSet,
};

/// Social login adapter for a single provider configuration.
pub struct SocialLoginAdapter<
    T: HttpTransport + 'static = ReqwestHttpTransport,
    S: TokenStore = InMemoryTokenStore,
> {
    config: Arc<ProviderConfig>,
    exchanger: DefaultTokenExchanger<T>,
    refresher: Arc<DefaultTokenRefresher<T>>,
    fetcher: DefaultProfileFetcher<T>,
    verifier: Option<IdTokenVerifier>,
    tokens: DefaultTokenManager<S, DefaultTokenRefresher<T>>,
    clock: Arc<dyn Clock>,
}

impl SocialLoginAdapter<ReqwestHttpTransport, InMemoryTokenStore> {
    /// Create an adapter with the reqwest transport and in-memory storage.
    pub fn from_config(config: ProviderConfig) -> AdapterResult<Self> {
        config.validate()?;
        let transport = Arc::new(ReqwestHttpTransport::new(config.timeout())?);
        Self::new(config, transport, Arc::new(InMemoryTokenStore::new()))
    }
}

impl<T: HttpTransport + 'static, S: TokenStore> SocialLoginAdapter<T, S> {
    /// Create an adapter. The configuration is validated before anything else.
    pub fn new(config: ProviderConfig, transport: Arc<T>, store: Arc<S>) -> AdapterResult<Self> {
        Self::with_clock(config, transport, store, Arc::new(SystemClock))
    }

    /// Create an adapter with an explicit time source.
    pub fn with_clock(
        config: ProviderConfig,
        transport: Arc<T>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> AdapterResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let refresher = Arc::new(DefaultTokenRefresher::new(
            config.clone(),
            transport.clone(),
            clock.clone(),
        ));
        let policy = config
            .refresh
            .as_ref()
            .map(RefreshPolicy::from_settings)
            .unwrap_or_else(RefreshPolicy::never);

        Ok(Self {
            exchanger: DefaultTokenExchanger::new(config.clone(), transport.clone(), clock.clone()),
            fetcher: DefaultProfileFetcher::new(config.clone(), transport.clone(), clock.clone()),
            verifier: IdTokenVerifier::from_config(&config, transport, clock.clone()),
            tokens: DefaultTokenManager::new(
                config.provider_id.clone(),
                store,
                refresher.clone(),
                policy,
                clock.clone(),
            ),
            refresher,
            config,
            clock,
        })
    }

    /// Get the provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Redirect URL for OAuth2 and OpenID providers.
    pub async fn authorization_url(
        &self,
        request: AuthorizationRequest,
    ) -> AdapterResult<AuthorizationUrl> {
        match self.config.protocol {
            Protocol::OAuth2 => build_authorization_url(&self.config, request),
            Protocol::OpenId => {
                let state = request.state.unwrap_or_else(|| random_urlsafe(32));
                self.exchanger.openid().checkid_url(state).await
            }
            Protocol::OAuth1 => Err(ConfigurationError::InvalidConfig {
                message: "OAuth1 providers start with request_token()".to_string(),
            }
            .into()),
        }
    }

    /// Obtain OAuth1 temporary credentials and the authorize URL.
    pub async fn request_token(&self) -> AdapterResult<RequestToken> {
        if self.config.protocol != Protocol::OAuth1 {
            return Err(ConfigurationError::InvalidConfig {
                message: "request_token() is only available for OAuth1 providers".to_string(),
            }
            .into());
        }
        self.exchanger.oauth1().request_token().await
    }

    /// Exchange callback material and persist the resulting token set.
    pub async fn authenticate(&self, grant: Grant) -> AdapterResult<Exchanged> {
        self.authenticate_with_nonce(grant, None).await
    }

    /// Like [`authenticate`](Self::authenticate), also checking the id_token
    /// nonce against the one sent in the authorization URL.
    pub async fn authenticate_with_nonce(
        &self,
        grant: Grant,
        expected_nonce: Option<&str>,
    ) -> AdapterResult<Exchanged> {
        let exchanged = self.exchanger.exchange(grant).await?;

        if let (Some(verifier), Some(id_token)) = (&self.verifier, &exchanged.tokens.id_token) {
            verifier.verify(id_token, expected_nonce).await?;
        }

        self.tokens.save(&exchanged.tokens).await?;
        Ok(exchanged)
    }

    /// Profile of the connected user.
    pub async fn user_profile(&self) -> AdapterResult<Profile> {
        let tokens = self.tokens.valid_tokens().await?;
        if !self.config.profile_from_id_token() {
            return self.fetcher.fetch(&tokens).await;
        }

        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| UnexpectedResponseError::MissingField {
                field: "id_token".to_string(),
            })?;
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| ConfigurationError::MissingRequired {
                field: "id_token".to_string(),
            })?;
        let claims = verifier.verify(id_token, None).await?;
        let mapping = self
            .config
            .profile
            .as_ref()
            .map(|p| p.field_mapping.clone())
            .unwrap_or_else(FieldMapping::default);
        verifier.profile(&claims, &mapping)
    }

    /// Current token set, refreshed first when the policy asks for it.
    pub async fn tokens(&self) -> AdapterResult<TokenSet> {
        self.tokens.valid_tokens().await
    }

    /// Current access token.
    pub async fn access_token(&self) -> AdapterResult<String> {
        Ok(self.tokens.valid_tokens().await?.access_token().to_string())
    }

    /// Refresh now, regardless of policy, and persist the result.
    pub async fn refresh(&self) -> AdapterResult<TokenSet> {
        let current = self.tokens.load().await?.ok_or(TokenError::NotConnected)?;
        let refreshed = self.refresher.refresh(&current).await?;
        self.tokens.save(&refreshed).await?;
        Ok(refreshed)
    }

    /// Whether a usable session is stored: unexpired, or refreshable.
    pub async fn is_connected(&self) -> AdapterResult<bool> {
        let connected = match self.tokens.load().await? {
            Some(tokens) => {
                tokens.refresh_token().is_some() || !tokens.is_expired(self.clock.now())
            }
            None => false,
        };
        Ok(connected)
    }

    /// Forget the stored session.
    pub async fn disconnect(&self) -> AdapterResult<()> {
        self.tokens.clear().await
    }
}
