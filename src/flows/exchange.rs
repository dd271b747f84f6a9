//! Token Exchange
//!
//! Turns callback material into a `TokenSet`, dispatching on the provider's
//! protocol.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::core::{Clock, HttpTransport};
use crate::error::{AdapterError, AdapterResult, ConfigurationError};
use crate::flows::client_auth::{apply_client_auth, token_request};
use crate::flows::oauth1::OAuth1Flow;
use crate::flows::openid::OpenIdFlow;
use crate::flows::send_request;
use crate::telemetry::TracingHooks;
use crate::types::{Exchanged, Grant, Protocol, ProviderConfig, TokenResponse, TokenSet};

/// Token exchange interface.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange callback material for tokens. The caller's state is echoed back.
    async fn exchange(&self, grant: Grant) -> AdapterResult<Exchanged>;
}

/// Token exchanger for one provider.
pub struct DefaultTokenExchanger<T: HttpTransport> {
    config: Arc<ProviderConfig>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    oauth1: OAuth1Flow<T>,
    openid: OpenIdFlow<T>,
}

impl<T: HttpTransport> DefaultTokenExchanger<T> {
    pub fn new(config: Arc<ProviderConfig>, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            oauth1: OAuth1Flow::new(config.clone(), transport.clone(), clock.clone()),
            openid: OpenIdFlow::new(config.clone(), transport.clone(), clock.clone()),
            config,
            transport,
            clock,
        }
    }

    /// OAuth1 flow sharing this exchanger's transport.
    pub fn oauth1(&self) -> &OAuth1Flow<T> {
        &self.oauth1
    }

    /// OpenID flow sharing this exchanger's transport.
    pub fn openid(&self) -> &OpenIdFlow<T> {
        &self.openid
    }

    fn build_code_params(&self, code: &str, code_verifier: Option<&str>) -> Vec<(String, String)> {
        let mut params = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            (
                "redirect_uri".to_string(),
                self.config.credentials.callback_url.clone(),
            ),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier".to_string(), verifier.to_string()));
        }
        for (name, value) in &self.config.extra_token_params {
            params.push((name.clone(), value.clone()));
        }
        params
    }

    /// Exchange an authorization code at the token endpoint.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> AdapterResult<TokenSet> {
        let now = self.clock.now();
        let mut params = self.build_code_params(code, code_verifier);
        let authorization = apply_client_auth(&self.config, now, &mut params)?;

        let request = token_request(
            &self.config,
            &self.config.token_endpoint,
            self.config.token_method,
            &params,
            authorization,
        );
        let response = send_request(&*self.transport, &self.config.provider_id, request).await?;
        let tokens = TokenResponse::parse(&response)?.into_token_set(
            now,
            self.config.fixed_expiry_secs,
            &self.config.persist_fields,
        )?;

        let tokens = match &self.config.token_upgrade {
            Some(_) => self.upgrade(&tokens).await?,
            None => tokens,
        };
        self.config.check_profile_source(&tokens)?;
        Ok(tokens)
    }

    /// Second exchange: trade a short-lived token for a long-lived one.
    /// The upgraded set replaces the original entirely.
    pub async fn upgrade(&self, tokens: &TokenSet) -> AdapterResult<TokenSet> {
        let upgrade = self
            .config
            .token_upgrade
            .as_ref()
            .ok_or_else(|| ConfigurationError::MissingRequired {
                field: "token_upgrade".to_string(),
            })?;

        let now = self.clock.now();
        let mut params = vec![
            ("grant_type".to_string(), upgrade.grant_type.clone()),
            (upgrade.token_param.clone(), tokens.access_token().to_string()),
        ];
        let authorization = apply_client_auth(&self.config, now, &mut params)?;

        let request = token_request(
            &self.config,
            &upgrade.endpoint,
            upgrade.method,
            &params,
            authorization,
        );
        let response = send_request(&*self.transport, &self.config.provider_id, request).await?;
        TokenResponse::parse(&response)?.into_token_set(
            now,
            self.config.fixed_expiry_secs,
            &self.config.persist_fields,
        )
    }
}

fn protocol_mismatch(protocol: Protocol) -> AdapterError {
    ConfigurationError::InvalidConfig {
        message: format!("grant does not match provider protocol {:?}", protocol),
    }
    .into()
}

#[async_trait]
impl<T: HttpTransport> TokenExchanger for DefaultTokenExchanger<T> {
    async fn exchange(&self, grant: Grant) -> AdapterResult<Exchanged> {
        let protocol = self.config.protocol;
        let (tokens, state) = match grant {
            Grant::AuthorizationCode {
                code,
                code_verifier,
                state,
            } => {
                if protocol != Protocol::OAuth2 {
                    return Err(protocol_mismatch(protocol));
                }
                (self.exchange_code(&code, code_verifier.as_deref()).await?, state)
            }
            Grant::OAuth1Verifier {
                request_token,
                request_token_secret,
                verifier,
                state,
            } => {
                if protocol != Protocol::OAuth1 {
                    return Err(protocol_mismatch(protocol));
                }
                use secrecy::ExposeSecret;
                let tokens = self
                    .oauth1
                    .exchange_verifier(
                        &request_token,
                        request_token_secret.expose_secret(),
                        &verifier,
                    )
                    .await?;
                (tokens, state)
            }
            Grant::OpenIdAssertion { params, state } => {
                if protocol != Protocol::OpenId {
                    return Err(protocol_mismatch(protocol));
                }
                (self.openid.verify(&params).await?, state)
            }
        };

        TracingHooks::on_token_exchanged(
            &self.config.provider_id,
            tokens.refresh_token.is_some(),
            tokens.expires_in,
        );
        Ok(Exchanged { tokens, state })
    }
}

/// Mock token exchanger for testing.
#[derive(Default)]
pub struct MockTokenExchanger {
    grant_history: Mutex<Vec<Grant>>,
    next_tokens: Mutex<Option<TokenSet>>,
    next_error: Mutex<Option<AdapterError>>,
}

impl MockTokenExchanger {
    /// Create new mock exchanger.
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

    /// Get grant history.
    pub fn get_grant_history(&self) -> Vec<Grant> {
        self.grant_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl TokenExchanger for MockTokenExchanger {
    async fn exchange(&self, grant: Grant) -> AdapterResult<Exchanged> {
        let state = grant.state().map(String::from);
        self.grant_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(grant);

        if let Some(error) = self.next_error.lock().unwrap_or_else(|p| p.into_inner()).take() {
            return Err(error);
        }

        let tokens = self
            .next_tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .unwrap_or_else(|| TokenSet::new("mock-access-token"));
        Ok(Exchanged { tokens, state })
    }
}

/// Create mock token exchanger for testing.
pub fn create_mock_token_exchanger() -> MockTokenExchanger {
    MockTokenExchanger::new()
}
