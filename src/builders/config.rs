//! Configuration Builder
//!
//! Fluent builder for provider configuration.

use std::time::Duration;

use secrecy::SecretString;

use crate::core::{DiscoveryDocument, HttpMethod, PkceMethod};
use crate::error::AdapterResult;
use crate::types::{
    AuthStyle, ClientSecret, Credentials, IdTokenSettings, ProfileSettings, Protocol,
    ProviderConfig, RefreshSettings, SignedSecretConfig, TokenUpgrade,
};

/// Provider configuration builder.
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Create a builder for an OAuth2 provider.
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            config: ProviderConfig {
                provider_id: provider_id.into(),
                protocol: Protocol::OAuth2,
                credentials: Credentials {
                    client_id: String::new(),
                    client_secret: None,
                    callback_url: String::new(),
                },
                scopes: Vec::new(),
                scope_separator: " ".to_string(),
                authorization_endpoint: None,
                request_token_endpoint: None,
                token_endpoint: String::new(),
                identifier: None,
                token_method: HttpMethod::Post,
                auth_style: AuthStyle::default(),
                extra_token_params: Default::default(),
                extra_authorize_params: Default::default(),
                pkce: None,
                profile: None,
                jwks_endpoint: None,
                id_token: None,
                fixed_expiry_secs: None,
                refresh: None,
                token_upgrade: None,
                persist_fields: Vec::new(),
                timeout_secs: None,
            },
        }
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.credentials.client_id = client_id.into();
        self
    }

    /// Set a static client secret.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.config.credentials.client_secret =
            Some(ClientSecret::Static(SecretString::new(client_secret.into())));
        self
    }

    /// Mint the client secret per request from a private key.
    pub fn signed_client_secret(mut self, signed: SignedSecretConfig) -> Self {
        self.config.credentials.client_secret = Some(ClientSecret::SignedJwt(signed));
        self
    }

    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.config.credentials.callback_url = url.into();
        self
    }

    /// Add a requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.config.scopes.push(scope.into());
        self
    }

    pub fn scope_separator(mut self, separator: impl Into<String>) -> Self {
        self.config.scope_separator = separator.into();
        self
    }

    pub fn authorization_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.authorization_endpoint = Some(endpoint.into());
        self
    }

    pub fn request_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.request_token_endpoint = Some(endpoint.into());
        self
    }

    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.token_endpoint = endpoint.into();
        self
    }

    /// OpenID identifier to discover the OP endpoint from.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.config.identifier = Some(identifier.into());
        self
    }

    pub fn token_method(mut self, method: HttpMethod) -> Self {
        self.config.token_method = method;
        self
    }

    pub fn auth_style(mut self, style: AuthStyle) -> Self {
        self.config.auth_style = style;
        self
    }

    pub fn extra_token_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .extra_token_params
            .insert(name.into(), value.into());
        self
    }

    pub fn extra_authorize_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.config
            .extra_authorize_params
            .insert(name.into(), value.into());
        self
    }

    pub fn pkce(mut self, method: PkceMethod) -> Self {
        self.config.pkce = Some(method);
        self
    }

    pub fn profile(mut self, profile: ProfileSettings) -> Self {
        self.config.profile = Some(profile);
        self
    }

    pub fn jwks_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.jwks_endpoint = Some(endpoint.into());
        self
    }

    pub fn id_token(mut self, settings: IdTokenSettings) -> Self {
        self.config.id_token = Some(settings);
        self
    }

    /// Lifetime assumed when the provider omits `expires_in`.
    pub fn fixed_expiry(mut self, lifetime: Duration) -> Self {
        self.config.fixed_expiry_secs = Some(lifetime.as_secs());
        self
    }

    pub fn refresh(mut self, refresh: RefreshSettings) -> Self {
        self.config.refresh = Some(refresh);
        self
    }

    pub fn token_upgrade(mut self, upgrade: TokenUpgrade) -> Self {
        self.config.token_upgrade = Some(upgrade);
        self
    }

    /// Keep a token response field alongside the tokens.
    pub fn persist_field(mut self, field: impl Into<String>) -> Self {
        self.config.persist_fields.push(field.into());
        self
    }

    /// Set request timeout. Required. Sub-second parts round up to the next
    /// whole second.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.config.timeout_secs = Some(secs);
        self
    }

    /// Fill endpoints from discovery metadata. Explicit settings win.
    pub fn apply_discovery(mut self, document: &DiscoveryDocument) -> Self {
        if self.config.authorization_endpoint.is_none() {
            self.config.authorization_endpoint = Some(document.authorization_endpoint.clone());
        }
        if self.config.token_endpoint.is_empty() {
            self.config.token_endpoint = document.token_endpoint.clone();
        }
        if self.config.jwks_endpoint.is_none() {
            self.config.jwks_endpoint = document.jwks_uri.clone();
        }
        if let (Some(profile), Some(userinfo)) =
            (self.config.profile.as_mut(), document.userinfo_endpoint.as_ref())
        {
            if profile.endpoint.is_none() {
                profile.endpoint = Some(userinfo.clone());
            }
        }
        if let Some(id_token) = self.config.id_token.as_mut() {
            if id_token.issuer.is_none() {
                id_token.issuer = Some(document.issuer.clone());
            }
        }
        if document
            .token_endpoint_auth_methods_supported
            .iter()
            .all(|m| m == "client_secret_post")
            && !document.token_endpoint_auth_methods_supported.is_empty()
        {
            self.config.auth_style = AuthStyle::BodyParams;
        }
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> AdapterResult<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Create a new provider configuration builder.
pub fn provider_config(provider_id: impl Into<String>) -> ProviderConfigBuilder {
    ProviderConfigBuilder::new(provider_id)
}
