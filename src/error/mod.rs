//! Adapter Error Types
//!
//! Error taxonomy shared by every provider adapter. Each variant tells the host
//! application whether to retry, re-authenticate, or fail hard.

use std::time::Duration;
use thiserror::Error;

/// Root error type for the social login adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid adapter configuration: {0}")]
    InvalidCredentials(#[from] ConfigurationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Unexpected provider response: {0}")]
    UnexpectedResponse(#[from] UnexpectedResponseError),

    #[error("Signed assertion expired at {expired_at} (now {now}, leeway {leeway}s)")]
    ExpiredAssertion {
        expired_at: i64,
        now: i64,
        leeway: u64,
    },

    #[error("Signed assertion rejected: {0}")]
    Assertion(#[from] AssertionError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AdapterError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "ADAPTER_CONFIG",
            Self::Transport(_) => "ADAPTER_TRANSPORT",
            Self::Provider(_) => "ADAPTER_PROVIDER",
            Self::UnexpectedResponse(_) => "ADAPTER_UNEXPECTED_RESPONSE",
            Self::ExpiredAssertion { .. } => "ADAPTER_EXPIRED_ASSERTION",
            Self::Assertion(_) => "ADAPTER_ASSERTION",
            Self::Token(_) => "ADAPTER_TOKEN",
            Self::Storage(_) => "ADAPTER_STORAGE",
        }
    }

    /// Check if the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Provider(e) => e.is_temporary(),
            _ => false,
        }
    }

    /// Get retry-after duration if the provider supplied one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Provider(e) => e.retry_after,
            _ => None,
        }
    }

    /// Check if error requires the user to sign in again.
    pub fn needs_reauth(&self) -> bool {
        match self {
            Self::ExpiredAssertion { .. } => true,
            Self::Token(TokenError::NotConnected)
            | Self::Token(TokenError::Expired)
            | Self::Token(TokenError::NoRefreshToken) => true,
            Self::Provider(e) => matches!(e.code.as_str(), "invalid_grant" | "access_denied"),
            _ => false,
        }
    }
}

/// Configuration error, detected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL for {field}: {url}")]
    InvalidEndpoint { field: String, url: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid signing key: {message}")]
    InvalidKey { message: String },

    #[error("Discovery failed: {message}")]
    DiscoveryFailed { message: String },
}

/// Network/transport error reaching the provider.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("DNS resolution failed: {host}")]
    DnsResolutionFailed { host: String },

    #[error("TLS error: {message}")]
    TlsError { message: String },
}

impl TransportError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::TlsError { .. })
    }
}

/// Provider-reported error, with the provider's code and message preserved.
#[derive(Error, Debug, Clone)]
#[error("{code}{}", .description.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
pub struct ProviderError {
    /// OAuth `error` code, or a provider-specific code.
    pub code: String,
    /// Human-readable description from the provider.
    pub description: Option<String>,
    /// Error documentation URI.
    pub uri: Option<String>,
    /// HTTP status of the failing response.
    pub status: u16,
    /// Retry hint, when the provider sent one.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            description: None,
            uri: None,
            status,
            retry_after: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the provider signalled a transient condition.
    pub fn is_temporary(&self) -> bool {
        self.code == "temporarily_unavailable"
            || self.code == "server_error"
            || self.status >= 500
            || self.status == 429
    }
}

/// Response parsed but unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnexpectedResponseError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid response body: {message}")]
    InvalidBody { message: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },
}

/// Signed assertion could not be accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionError {
    #[error("Malformed assertion: {message}")]
    Malformed { message: String },

    #[error("No published key verifies the assertion signature")]
    SignatureInvalid,

    #[error("Key set unavailable: {message}")]
    KeySetUnavailable { message: String },

    #[error("Assertion issued in the future: iat={issued_at}, now={now}")]
    IssuedInFuture { issued_at: i64, now: i64 },

    #[error("Issuer mismatch: expected {expected}, got {received}")]
    IssuerMismatch { expected: String, received: String },

    #[error("Audience does not include {expected}")]
    AudienceMismatch { expected: String },

    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("OpenID assertion rejected: {message}")]
    OpenIdRejected { message: String },
}

/// Token lifecycle error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("No stored session for provider")]
    NotConnected,

    #[error("Access token expired")]
    Expired,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Provider does not support token refresh")]
    RefreshNotSupported,

    #[error("Refresh did not extend token expiry")]
    RefreshDidNotExtend,

    #[error("Corrupted stored token entry: {key}")]
    Corrupted { key: String },
}

/// Token store backend error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Delete failed: {message}")]
    DeleteFailed { message: String },
}

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// OAuth2 error response body.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuth2ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}

fn json_code(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(serde_json::Value::as_str).map(String::from)
}

/// Extract a provider error from a JSON body, whatever its status.
///
/// Recognizes the RFC 6749 shape (`error` string), nested error objects
/// (`error.code`/`error.type` with `error.message`), and the `errcode`/`errmsg`
/// shape where `errcode: 0` means success.
pub fn error_from_json(value: &serde_json::Value) -> Option<OAuth2ErrorResponse> {
    match value.get("error") {
        Some(serde_json::Value::String(code)) => {
            return Some(OAuth2ErrorResponse {
                error: code.clone(),
                error_description: json_str(value, "error_description"),
                error_uri: json_str(value, "error_uri"),
            });
        }
        Some(nested @ serde_json::Value::Object(_)) => {
            let code = nested
                .get("code")
                .or_else(|| nested.get("type"))
                .map(json_code)
                .unwrap_or_else(|| "provider_error".to_string());
            return Some(OAuth2ErrorResponse {
                error: code,
                error_description: json_str(nested, "message"),
                error_uri: None,
            });
        }
        _ => {}
    }

    let errcode = value.get("errcode")?;
    if errcode.as_i64() == Some(0) {
        return None;
    }
    Some(OAuth2ErrorResponse {
        error: json_code(errcode),
        error_description: json_str(value, "errmsg"),
        error_uri: None,
    })
}

/// Parse a provider error payload from an HTTP body (JSON or form-encoded).
pub fn parse_error_response(body: &str) -> Option<OAuth2ErrorResponse> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        return error_from_json(&value);
    }

    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    let field = |name: &str| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    Some(OAuth2ErrorResponse {
        error: field("error")?,
        error_description: field("error_description"),
        error_uri: field("error_uri"),
    })
}

/// Map an OAuth2 error payload onto a provider error.
pub fn map_provider_error(response: &OAuth2ErrorResponse, status: u16) -> ProviderError {
    ProviderError {
        code: response.error.clone(),
        description: response.error_description.clone(),
        uri: response.error_uri.clone(),
        status,
        retry_after: None,
    }
}

/// Create error from a non-success HTTP response.
pub fn create_error_from_response(status: u16, body: &str) -> AdapterError {
    if let Some(response) = parse_error_response(body) {
        return AdapterError::Provider(map_provider_error(&response, status));
    }

    let (code, retry_after) = match status {
        400 => ("invalid_request", None),
        401 => ("invalid_client", None),
        403 => ("access_denied", None),
        429 => ("temporarily_unavailable", Some(Duration::from_secs(60))),
        _ => ("server_error", None),
    };

    let snippet: String = body.chars().take(200).collect();
    let mut error = ProviderError::new(code, status);
    error.retry_after = retry_after;
    if !snippet.is_empty() {
        error.description = Some(snippet);
    } else {
        error.description = Some(format!("HTTP {}", status));
    }
    AdapterError::Provider(error)
}
