//! Configuration Types
//!
//! Per-provider adapter configuration. One `ProviderConfig` fully describes how
//! to talk to one identity provider; everything is deserializable from JSON.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::{HttpMethod, PkceMethod};
use crate::error::{AdapterResult, ConfigurationError, UnexpectedResponseError};
use crate::profile::mapping::{FieldMapping, SideChannelLookup};
use crate::types::{ProfileField, TokenSet};

/// Default leeway applied to signed assertion timestamps.
pub const DEFAULT_LEEWAY_SECS: u64 = 120;
/// Default lifetime of a minted client-secret assertion.
pub const DEFAULT_SIGNED_SECRET_TTL_SECS: u64 = 3600;

/// Authentication protocol spoken by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    OAuth2,
    OAuth1,
    OpenId,
}

/// Client credentials. Loaded once, never mutated.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    /// Client identifier (consumer key for OAuth1).
    #[serde(default)]
    pub client_id: String,
    /// Client secret, static or minted per request.
    #[serde(default)]
    pub client_secret: Option<ClientSecret>,
    /// Registered redirect / callback URL.
    #[serde(default)]
    pub callback_url: String,
}

/// Where the client secret comes from.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ClientSecret {
    /// A fixed shared secret.
    Static(SecretString),
    /// A short-lived ES256 assertion signed with a private key.
    SignedJwt(SignedSecretConfig),
}

impl ClientSecret {
    /// Static secret value, if this is a static secret.
    pub fn static_value(&self) -> Option<&str> {
        match self {
            Self::Static(secret) => Some(secret.expose_secret().as_str()),
            Self::SignedJwt(_) => None,
        }
    }
}

/// Key material for a signed client secret.
#[derive(Clone, Debug, Deserialize)]
pub struct SignedSecretConfig {
    /// Issuer of the assertion (developer team id).
    pub team_id: String,
    /// Key id placed in the JWT header.
    pub key_id: String,
    /// PKCS#8 PEM-encoded P-256 private key.
    pub private_key: SecretString,
    /// Audience of the assertion.
    pub audience: String,
    #[serde(default = "default_signed_ttl")]
    pub ttl_secs: u64,
}

fn default_signed_ttl() -> u64 {
    DEFAULT_SIGNED_SECRET_TTL_SECS
}

/// How client credentials are presented at the token endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthStyle {
    /// `Authorization: Basic base64(id:secret)`.
    #[default]
    HeaderBasic,
    /// `client_id` and `client_secret` form parameters.
    BodyParams,
    /// Credentials under provider-specific parameter names.
    CustomNamedParams {
        id_param: String,
        secret_param: String,
    },
}

/// How the access token is attached to profile requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenPlacement {
    /// `Authorization: Bearer <token>`.
    #[default]
    BearerHeader,
    /// A custom header, e.g. `Authorization: OAuth <token>`.
    Header {
        name: String,
        #[serde(default)]
        scheme: Option<String>,
    },
    /// A query parameter, e.g. `?access_token=<token>`.
    Query { param: String },
    /// OAuth1 signed request.
    OAuth1Signed,
}

fn default_get() -> HttpMethod {
    HttpMethod::Get
}

/// Profile endpoint and mapping.
#[derive(Clone, Debug, Deserialize)]
pub struct ProfileSettings {
    /// Profile endpoint. When absent the profile is mapped from the verified
    /// id_token claims or the OpenID attributes.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_get")]
    pub method: HttpMethod,
    #[serde(default)]
    pub token_placement: TokenPlacement,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    pub field_mapping: FieldMapping,
    #[serde(default)]
    pub side_channels: Vec<SideChannelLookup>,
}

/// Signed id_token handling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Decode only; the token came straight from the token endpoint over TLS.
    TrustTransport,
    /// Verify the signature against the provider's published key set.
    #[default]
    Jwks,
}

fn default_leeway() -> u64 {
    DEFAULT_LEEWAY_SECS
}

fn default_true() -> bool {
    true
}

fn default_subject_claim() -> String {
    "sub".to_string()
}

fn default_algorithms() -> Vec<jsonwebtoken::Algorithm> {
    vec![jsonwebtoken::Algorithm::RS256]
}

/// id_token verification settings.
#[derive(Clone, Debug, Deserialize)]
pub struct IdTokenSettings {
    #[serde(default)]
    pub verification: VerificationMode,
    /// Expected `iss` claim.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Require `aud` to contain the client id.
    #[serde(default = "default_true")]
    pub verify_audience: bool,
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
    #[serde(default = "default_subject_claim")]
    pub subject_claim: String,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<jsonwebtoken::Algorithm>,
}

impl Default for IdTokenSettings {
    fn default() -> Self {
        Self {
            verification: VerificationMode::default(),
            issuer: None,
            verify_audience: true,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            subject_claim: default_subject_claim(),
            algorithms: default_algorithms(),
        }
    }
}

impl IdTokenSettings {
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }
}

/// How a refresh is performed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshStyle {
    /// `grant_type=refresh_token` at the token endpoint.
    #[default]
    ReExchange,
    /// A provider-specific refresh endpoint.
    Dedicated {
        endpoint: String,
        #[serde(default)]
        method: HttpMethod,
        grant_type: String,
        token_param: String,
    },
}

/// Refresh configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct RefreshSettings {
    #[serde(default)]
    pub style: RefreshStyle,
    /// Refresh before expiry when less than this many seconds remain.
    #[serde(default)]
    pub proactive_threshold_secs: Option<u64>,
    /// Refresh when the stored token has already expired.
    #[serde(default = "default_true")]
    pub reactive: bool,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            style: RefreshStyle::default(),
            proactive_threshold_secs: None,
            reactive: true,
        }
    }
}

/// Second exchange turning a short-lived token into a long-lived one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUpgrade {
    pub endpoint: String,
    #[serde(default = "default_get")]
    pub method: HttpMethod,
    pub grant_type: String,
    /// Parameter carrying the short-lived token.
    pub token_param: String,
}

/// Full provider configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
    /// Namespace for stored tokens and log fields.
    pub provider_id: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_scope_separator")]
    pub scope_separator: String,
    /// Authorization (or OAuth1 authorize, or OpenID OP) endpoint.
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// OAuth1 temporary-credential endpoint.
    #[serde(default)]
    pub request_token_endpoint: Option<String>,
    /// Token endpoint (OAuth1 access-token endpoint, OpenID check endpoint).
    #[serde(default)]
    pub token_endpoint: String,
    /// OpenID identifier whose OP endpoint is discovered at runtime.
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub token_method: HttpMethod,
    #[serde(default)]
    pub auth_style: AuthStyle,
    #[serde(default)]
    pub extra_token_params: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_authorize_params: BTreeMap<String, String>,
    #[serde(default)]
    pub pkce: Option<PkceMethod>,
    #[serde(default)]
    pub profile: Option<ProfileSettings>,
    #[serde(default)]
    pub jwks_endpoint: Option<String>,
    #[serde(default)]
    pub id_token: Option<IdTokenSettings>,
    /// Token lifetime assumed when the provider omits `expires_in`.
    #[serde(default)]
    pub fixed_expiry_secs: Option<u64>,
    #[serde(default)]
    pub refresh: Option<RefreshSettings>,
    #[serde(default)]
    pub token_upgrade: Option<TokenUpgrade>,
    /// Token response fields kept alongside the tokens.
    #[serde(default)]
    pub persist_fields: Vec<String>,
    /// Per-request timeout. Required.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_scope_separator() -> String {
    " ".to_string()
}

impl ProviderConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> AdapterResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidConfig {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or_default())
    }

    /// Scope string as sent to the provider.
    pub fn scope(&self) -> Option<String> {
        if self.scopes.is_empty() {
            None
        } else {
            Some(self.scopes.join(&self.scope_separator))
        }
    }

    /// Whether the profile is mapped from verified id_token claims rather
    /// than fetched from an endpoint.
    pub fn profile_from_id_token(&self) -> bool {
        self.protocol == Protocol::OAuth2
            && self.id_token.is_some()
            && self
                .profile
                .as_ref()
                .map_or(true, |profile| profile.endpoint.is_none())
    }

    /// Reject a token response that cannot serve as the profile source.
    pub fn check_profile_source(&self, tokens: &TokenSet) -> AdapterResult<()> {
        if self.profile_from_id_token() && tokens.id_token.is_none() {
            return Err(UnexpectedResponseError::MissingField {
                field: "id_token".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Whether the configured auth style sends a secret.
    fn needs_secret(&self) -> bool {
        self.protocol != Protocol::OpenId
    }

    /// Check the configuration before any network call is made.
    pub fn validate(&self) -> AdapterResult<()> {
        if self.provider_id.trim().is_empty() {
            return Err(missing("provider_id"));
        }
        // Stored keys are `{provider_id}.{field}`.
        if !self
            .provider_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigurationError::InvalidConfig {
                message: format!(
                    "provider_id {:?} may only contain ASCII letters, digits, '-' and '_'",
                    self.provider_id
                ),
            }
            .into());
        }
        match self.timeout_secs {
            None | Some(0) => return Err(missing("timeout_secs")),
            Some(_) => {}
        }
        if self.credentials.callback_url.is_empty() {
            return Err(missing("callback_url"));
        }
        check_url("callback_url", &self.credentials.callback_url)?;

        if self.protocol != Protocol::OpenId && self.credentials.client_id.trim().is_empty() {
            return Err(missing("client_id"));
        }
        if self.needs_secret() {
            self.validate_secret()?;
        }

        if let Some(identifier) = &self.identifier {
            if self.protocol != Protocol::OpenId {
                return Err(ConfigurationError::InvalidConfig {
                    message: "identifier is only used by OpenID providers".to_string(),
                }
                .into());
            }
            check_url("identifier", identifier)?;
        }
        let discovered = self.protocol == Protocol::OpenId && self.identifier.is_some();
        if self.token_endpoint.is_empty() {
            if !discovered {
                return Err(missing("token_endpoint"));
            }
        } else {
            check_url("token_endpoint", &self.token_endpoint)?;
        }
        if let Some(endpoint) = &self.authorization_endpoint {
            check_url("authorization_endpoint", endpoint)?;
        }

        if self.protocol == Protocol::OAuth1 {
            match &self.request_token_endpoint {
                Some(endpoint) => check_url("request_token_endpoint", endpoint)?,
                None => return Err(missing("request_token_endpoint")),
            }
            if self.authorization_endpoint.is_none() {
                return Err(missing("authorization_endpoint"));
            }
        }

        if let AuthStyle::CustomNamedParams {
            id_param,
            secret_param,
        } = &self.auth_style
        {
            if id_param.is_empty() || secret_param.is_empty() {
                return Err(ConfigurationError::InvalidConfig {
                    message: "custom credential parameter names must not be empty".to_string(),
                }
                .into());
            }
        }

        if let Some(profile) = &self.profile {
            if let Some(endpoint) = &profile.endpoint {
                check_url("profile.endpoint", endpoint)?;
            }
            let from_assertion = self.protocol == Protocol::OpenId
                || (profile.endpoint.is_none() && self.id_token.is_some());
            if !from_assertion {
                if profile.endpoint.is_none() {
                    return Err(missing("profile.endpoint"));
                }
                if !profile.field_mapping.has_rule_for(ProfileField::Identifier) {
                    return Err(missing("profile.field_mapping.identifier"));
                }
            }
            for lookup in &profile.side_channels {
                check_url("profile.side_channels.endpoint", &lookup.endpoint)?;
            }
        }

        if let Some(jwks) = &self.jwks_endpoint {
            check_url("jwks_endpoint", jwks)?;
        }
        if let Some(id_token) = &self.id_token {
            if id_token.verification == VerificationMode::Jwks && self.jwks_endpoint.is_none() {
                return Err(missing("jwks_endpoint"));
            }
            if id_token.subject_claim.is_empty() {
                return Err(missing("id_token.subject_claim"));
            }
            if id_token.algorithms.is_empty() {
                return Err(missing("id_token.algorithms"));
            }
        }

        if let Some(RefreshSettings {
            style: RefreshStyle::Dedicated { endpoint, .. },
            ..
        }) = &self.refresh
        {
            check_url("refresh.endpoint", endpoint)?;
        }
        if let Some(upgrade) = &self.token_upgrade {
            check_url("token_upgrade.endpoint", &upgrade.endpoint)?;
        }

        if let Some(secs) = self.fixed_expiry_secs {
            check_lifetime("fixed_expiry_secs", secs)?;
        }
        if let Some(id_token) = &self.id_token {
            check_lifetime("id_token.leeway_secs", id_token.leeway_secs)?;
        }

        Ok(())
    }

    fn validate_secret(&self) -> AdapterResult<()> {
        match &self.credentials.client_secret {
            None => Err(missing("client_secret")),
            Some(ClientSecret::Static(secret)) if secret.expose_secret().is_empty() => {
                Err(missing("client_secret"))
            }
            Some(ClientSecret::Static(_)) => Ok(()),
            Some(ClientSecret::SignedJwt(signed)) => {
                if signed.team_id.is_empty() {
                    return Err(missing("client_secret.team_id"));
                }
                if signed.key_id.is_empty() {
                    return Err(missing("client_secret.key_id"));
                }
                if signed.audience.is_empty() {
                    return Err(missing("client_secret.audience"));
                }
                check_lifetime("client_secret.ttl_secs", signed.ttl_secs)?;
                jsonwebtoken::EncodingKey::from_ec_pem(
                    signed.private_key.expose_secret().as_bytes(),
                )
                .map_err(|e| ConfigurationError::InvalidKey {
                    message: e.to_string(),
                })?;
                Ok(())
            }
        }
    }
}

fn missing(field: &str) -> crate::error::AdapterError {
    ConfigurationError::MissingRequired {
        field: field.to_string(),
    }
    .into()
}

fn check_lifetime(field: &str, secs: u64) -> AdapterResult<()> {
    let representable = i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .is_some();
    if representable {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidConfig {
            message: format!("{} = {} is out of range", field, secs),
        }
        .into())
    }
}

fn check_url(field: &str, value: &str) -> AdapterResult<()> {
    match Url::parse(value) {
        Ok(url) if url.scheme() == "https" || url.scheme() == "http" => Ok(()),
        _ => Err(ConfigurationError::InvalidEndpoint {
            field: field.to_string(),
            url: value.to_string(),
        }
        .into()),
    }
}
