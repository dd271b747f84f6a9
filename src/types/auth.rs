//! Authorization Types
//!
//! Inputs and outputs of the redirect leg and the callback exchange.

use std::collections::BTreeMap;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::types::TokenSet;

/// Parameters for authorization URL generation.
///
/// `state` and `nonce` are generated when absent; the host stores them and
/// checks them on callback.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationRequest {
    pub state: Option<String>,
    pub nonce: Option<String>,
    /// Requested scopes (overrides configured scopes).
    pub scopes: Option<Vec<String>>,
    pub login_hint: Option<String>,
    pub prompt: Option<Prompt>,
    pub extra_params: BTreeMap<String, String>,
}

/// Result of authorization URL generation.
#[derive(Clone)]
pub struct AuthorizationUrl {
    /// The URL to redirect the user to.
    pub url: String,
    pub state: String,
    pub nonce: Option<String>,
    /// PKCE verifier to keep for the exchange.
    pub code_verifier: Option<String>,
}

impl std::fmt::Debug for AuthorizationUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationUrl")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("nonce", &self.nonce)
            .field("code_verifier", &self.code_verifier.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// OAuth1 temporary credential.
#[derive(Clone, Debug)]
pub struct RequestToken {
    pub token: String,
    pub token_secret: SecretString,
    /// Where to send the user to authorize the request token.
    pub authorize_url: String,
}

impl RequestToken {
    pub fn token_secret(&self) -> &str {
        self.token_secret.expose_secret()
    }
}

/// Callback material handed to `TokenExchanger::exchange`.
#[derive(Clone, Debug)]
pub enum Grant {
    /// OAuth2 authorization code.
    AuthorizationCode {
        code: String,
        code_verifier: Option<String>,
        state: Option<String>,
    },
    /// OAuth1 verifier for a previously issued request token.
    OAuth1Verifier {
        request_token: String,
        request_token_secret: SecretString,
        verifier: String,
        state: Option<String>,
    },
    /// OpenID 2.0 positive assertion (every `openid.*` callback parameter).
    OpenIdAssertion {
        params: BTreeMap<String, String>,
        state: Option<String>,
    },
}

impl Grant {
    pub fn authorization_code(code: impl Into<String>) -> Self {
        Self::AuthorizationCode {
            code: code.into(),
            code_verifier: None,
            state: None,
        }
    }

    /// Caller-supplied state echoed back after the exchange.
    pub fn state(&self) -> Option<&str> {
        match self {
            Self::AuthorizationCode { state, .. }
            | Self::OAuth1Verifier { state, .. }
            | Self::OpenIdAssertion { state, .. } => state.as_deref(),
        }
    }
}

/// Result of a successful exchange.
#[derive(Clone, Debug)]
pub struct Exchanged {
    pub tokens: TokenSet,
    /// The state the caller passed in, untouched.
    pub state: Option<String>,
}

/// Prompt behavior for authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    /// Do not display any authentication or consent UI.
    None,
    /// Force re-authentication.
    Login,
    /// Force consent screen.
    Consent,
    /// Force account selection.
    SelectAccount,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Login => "login",
            Self::Consent => "consent",
            Self::SelectAccount => "select_account",
        }
    }
}
