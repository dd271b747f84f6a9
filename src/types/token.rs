//! Token Types
//!
//! Token responses as returned by providers, and the normalized `TokenSet`
//! persisted between requests.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use crate::core::HttpResponse;
use crate::error::{
    create_error_from_response, error_from_json, map_provider_error, AdapterError, AdapterResult,
    TokenError, UnexpectedResponseError,
};

/// Storage keys used by `TokenSet::to_entries`.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const ID_TOKEN: &str = "id_token";
    pub const TOKEN_SECRET: &str = "token_secret";
    pub const TOKEN_TYPE: &str = "token_type";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const SCOPE: &str = "scope";

    pub const RESERVED: [&str; 7] = [
        ACCESS_TOKEN,
        REFRESH_TOKEN,
        ID_TOKEN,
        TOKEN_SECRET,
        TOKEN_TYPE,
        EXPIRES_AT,
        SCOPE,
    ];
}

/// Decoded token endpoint body.
///
/// Providers answer with JSON or `application/x-www-form-urlencoded`; both
/// end up as a flat JSON object.
#[derive(Clone, Debug)]
pub struct TokenResponse {
    fields: Map<String, Value>,
}

impl TokenResponse {
    /// Decode a token endpoint response.
    ///
    /// Non-2xx statuses and 2xx bodies carrying an error payload become
    /// `Provider` errors; undecodable bodies become `UnexpectedResponse`.
    pub fn parse(response: &HttpResponse) -> AdapterResult<Self> {
        if !response.is_success() {
            return Err(create_error_from_response(response.status, &response.body));
        }

        let body = response.body.trim();
        let value = if body.starts_with('{') {
            serde_json::from_str::<Value>(body).map_err(|e| {
                UnexpectedResponseError::InvalidBody {
                    message: e.to_string(),
                }
            })?
        } else if body.contains('=') {
            Value::Object(
                url::form_urlencoded::parse(body.as_bytes())
                    .into_owned()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            )
        } else {
            return Err(UnexpectedResponseError::InvalidBody {
                message: "token response is neither JSON nor form-encoded".to_string(),
            }
            .into());
        };

        if let Some(error) = error_from_json(&value) {
            return Err(AdapterError::Provider(map_provider_error(
                &error,
                response.status,
            )));
        }

        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(UnexpectedResponseError::InvalidBody {
                message: "token response is not an object".to_string(),
            }
            .into()),
        }
    }

    /// Build from an already-decoded object.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Raw decoded body.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// A field as a non-empty string; numbers and booleans are stringified.
    pub fn field(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Lifetime in seconds from `expires_in` (or the legacy `expires`).
    ///
    /// A lifetime that is present but not a non-negative integer is an
    /// `UnexpectedResponse`, never a token without expiry.
    pub fn expires_in(&self) -> AdapterResult<Option<u64>> {
        match self.field("expires_in").or_else(|| self.field("expires")) {
            None => Ok(None),
            Some(raw) => raw.parse::<u64>().map(Some).map_err(|_| {
                UnexpectedResponseError::InvalidBody {
                    message: format!("expires_in {:?} is not a lifetime in seconds", raw),
                }
                .into()
            }),
        }
    }

    /// A mandatory field.
    pub fn require(&self, name: &str) -> AdapterResult<String> {
        self.field(name).ok_or_else(|| {
            UnexpectedResponseError::MissingField {
                field: name.to_string(),
            }
            .into()
        })
    }

    /// Normalize into a `TokenSet` obtained at `now`.
    ///
    /// `fixed_expiry_secs` applies when the provider omits a lifetime;
    /// `persist_fields` are copied into `TokenSet::extra`.
    pub fn into_token_set(
        self,
        now: DateTime<Utc>,
        fixed_expiry_secs: Option<u64>,
        persist_fields: &[String],
    ) -> AdapterResult<TokenSet> {
        let access_token = self.require("access_token")?;
        let expires_in = self.expires_in()?.or(fixed_expiry_secs);

        let mut tokens = TokenSet::new(access_token);
        tokens.token_type = self
            .field("token_type")
            .unwrap_or_else(|| "Bearer".to_string());
        tokens.refresh_token = self.field("refresh_token").map(SecretString::new);
        tokens.id_token = self.field("id_token");
        tokens.scope = self.field("scope");
        tokens.set_expiry(now, expires_in)?;

        for name in persist_fields {
            if let Some(value) = self.field(name) {
                tokens.extra.insert(name.clone(), value);
            }
        }

        Ok(tokens)
    }
}

/// `now + secs`, or `None` when the instant is not representable.
pub fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    now.checked_add_signed(Duration::try_seconds(secs)?)
}

/// Normalized credentials for one user session.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub token_type: String,
    pub refresh_token: Option<SecretString>,
    pub id_token: Option<String>,
    /// OAuth1 token secret.
    pub token_secret: Option<SecretString>,
    pub expires_in: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    /// Persisted provider-specific fields.
    pub extra: BTreeMap<String, String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_secret", &self.token_secret.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TokenSet {
    /// A bearer token set with no expiry information.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            id_token: None,
            token_secret: None,
            expires_in: None,
            expires_at: None,
            scope: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::new(refresh_token.into()));
        self
    }

    /// Builder form of [`set_expiry`](Self::set_expiry); a lifetime past the
    /// representable range pins `expires_at` to the latest instant.
    pub fn with_expiry(mut self, now: DateTime<Utc>, expires_in: u64) -> Self {
        self.expires_in = Some(expires_in);
        self.expires_at = Some(expiry_after(now, expires_in).unwrap_or(DateTime::<Utc>::MAX_UTC));
        self
    }

    /// Derive `expires_at` from a lifetime counted from `now`.
    pub fn set_expiry(&mut self, now: DateTime<Utc>, expires_in: Option<u64>) -> AdapterResult<()> {
        let expires_at = match expires_in {
            None => None,
            Some(secs) => Some(expiry_after(now, secs).ok_or_else(|| {
                UnexpectedResponseError::InvalidBody {
                    message: format!("expires_in {} is out of range", secs),
                }
            })?),
        };
        self.expires_in = expires_in;
        self.expires_at = expires_at;
        Ok(())
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    pub fn token_secret(&self) -> Option<&str> {
        self.token_secret.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// Whether the token has expired. Tokens without expiry never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    /// Whether the token expires within `threshold` of `now`.
    pub fn is_expiring_within(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        let threshold = Duration::from_std(threshold).unwrap_or_else(|_| Duration::days(36_500));
        self.expires_at
            .map(|at| now + threshold >= at)
            .unwrap_or(false)
    }

    /// Time left before expiry, if known.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at.map(|at| at - now)
    }

    /// `Authorization` header value for bearer-style tokens.
    pub fn authorization_header(&self) -> String {
        let scheme = if self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", scheme, self.access_token())
    }

    /// Flatten into storage entries.
    pub fn to_entries(&self) -> BTreeMap<String, String> {
        let mut entries = BTreeMap::new();
        entries.insert(keys::ACCESS_TOKEN.to_string(), self.access_token().to_string());
        entries.insert(keys::TOKEN_TYPE.to_string(), self.token_type.clone());
        if let Some(token) = self.refresh_token() {
            entries.insert(keys::REFRESH_TOKEN.to_string(), token.to_string());
        }
        if let Some(token) = &self.id_token {
            entries.insert(keys::ID_TOKEN.to_string(), token.clone());
        }
        if let Some(secret) = self.token_secret() {
            entries.insert(keys::TOKEN_SECRET.to_string(), secret.to_string());
        }
        if let Some(at) = self.expires_at {
            entries.insert(keys::EXPIRES_AT.to_string(), at.timestamp().to_string());
        }
        if let Some(scope) = &self.scope {
            entries.insert(keys::SCOPE.to_string(), scope.clone());
        }
        for (key, value) in &self.extra {
            if !keys::RESERVED.contains(&key.as_str()) {
                entries.insert(key.clone(), value.clone());
            }
        }
        entries
    }

    /// Rebuild from storage entries. `access_token` is required.
    pub fn from_entries(mut entries: BTreeMap<String, String>) -> AdapterResult<Self> {
        let access_token = entries
            .remove(keys::ACCESS_TOKEN)
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::NotConnected)?;

        let mut tokens = TokenSet::new(access_token);
        if let Some(token_type) = entries.remove(keys::TOKEN_TYPE) {
            tokens.token_type = token_type;
        }
        tokens.refresh_token = entries.remove(keys::REFRESH_TOKEN).map(SecretString::new);
        tokens.id_token = entries.remove(keys::ID_TOKEN);
        tokens.token_secret = entries.remove(keys::TOKEN_SECRET).map(SecretString::new);
        tokens.scope = entries.remove(keys::SCOPE);
        if let Some(raw) = entries.remove(keys::EXPIRES_AT) {
            let at = raw
                .parse::<i64>()
                .ok()
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .ok_or_else(|| TokenError::Corrupted {
                    key: keys::EXPIRES_AT.to_string(),
                })?;
            tokens.expires_at = Some(at);
        }
        tokens.extra = entries;
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdapterError, ProviderError};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_json_response_sets_expiry_from_obtained_time() {
        let response = HttpResponse::json(
            200,
            &serde_json::json!({
                "access_token": "at",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "rt",
                "user_id": 77
            }),
        );
        let tokens = TokenResponse::parse(&response)
            .unwrap()
            .into_token_set(at(1_000_000), None, &["user_id".to_string()])
            .unwrap();

        assert_eq!(tokens.access_token(), "at");
        assert_eq!(tokens.refresh_token(), Some("rt"));
        assert_eq!(tokens.expires_at, Some(at(1_003_600)));
        assert_eq!(tokens.extra.get("user_id").map(String::as_str), Some("77"));
        assert_eq!(tokens.authorization_header(), "Bearer at");
    }

    #[test]
    fn test_form_encoded_response() {
        let response = HttpResponse::text(200, "access_token=abc&expires=5183999");
        let tokens = TokenResponse::parse(&response)
            .unwrap()
            .into_token_set(at(0), None, &[])
            .unwrap();
        assert_eq!(tokens.access_token(), "abc");
        assert_eq!(tokens.expires_in, Some(5_183_999));
    }

    #[test]
    fn test_fixed_expiry_fallback() {
        let response = HttpResponse::json(200, &serde_json::json!({ "access_token": "abc" }));
        let tokens = TokenResponse::parse(&response)
            .unwrap()
            .into_token_set(at(100), Some(7200), &[])
            .unwrap();
        assert_eq!(tokens.expires_at, Some(at(7300)));
    }

    #[test]
    fn test_unrepresentable_lifetime_is_invalid_body() {
        for expires_in in [
            serde_json::json!(u64::MAX),
            serde_json::json!(10_000_000_000_000_000u64),
            serde_json::json!(9_000_000_000_000_000u64),
            serde_json::json!(-5),
            serde_json::json!("soon"),
        ] {
            let response = HttpResponse::json(
                200,
                &serde_json::json!({ "access_token": "a", "expires_in": expires_in }),
            );
            let result = TokenResponse::parse(&response)
                .unwrap()
                .into_token_set(at(1_700_000_000), None, &[]);
            assert!(
                matches!(
                    result,
                    Err(AdapterError::UnexpectedResponse(UnexpectedResponseError::InvalidBody { .. }))
                ),
                "expires_in {} was accepted",
                expires_in
            );
        }
    }

    #[test]
    fn test_largest_representable_lifetime_is_kept() {
        let secs = 8_000_000_000_000u64;
        let mut tokens = TokenSet::new("a");
        tokens.set_expiry(at(0), Some(secs)).unwrap();
        assert_eq!(tokens.expires_at, Some(at(secs as i64)));
        assert!(!tokens.is_expired(at(1_700_000_000)));

        let pinned = TokenSet::new("a").with_expiry(at(0), u64::MAX);
        assert_eq!(pinned.expires_at, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_missing_access_token_is_unexpected_response() {
        let response = HttpResponse::json(200, &serde_json::json!({ "token_type": "bearer" }));
        let result = TokenResponse::parse(&response)
            .unwrap()
            .into_token_set(at(0), None, &[]);
        assert!(matches!(
            result,
            Err(AdapterError::UnexpectedResponse(UnexpectedResponseError::MissingField { ref field }))
                if field == "access_token"
        ));
    }

    #[test]
    fn test_error_in_success_body_is_provider_error() {
        let response = HttpResponse::json(
            200,
            &serde_json::json!({ "error": "invalid_grant", "error_description": "Code expired" }),
        );
        match TokenResponse::parse(&response) {
            Err(AdapterError::Provider(ProviderError {
                code, description, ..
            })) => {
                assert_eq!(code, "invalid_grant");
                assert_eq!(description.as_deref(), Some("Code expired"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_expiry_helpers() {
        let tokens = TokenSet::new("t").with_expiry(at(0), 600);
        assert!(!tokens.is_expired(at(599)));
        assert!(tokens.is_expired(at(600)));
        assert!(tokens.is_expiring_within(at(400), std::time::Duration::from_secs(300)));
        assert!(!tokens.is_expiring_within(at(100), std::time::Duration::from_secs(300)));
        assert_eq!(tokens.remaining_lifetime(at(100)), Some(Duration::seconds(500)));
        assert!(!TokenSet::new("t").is_expired(at(i32::MAX as i64)));
    }

    #[test]
    fn test_entries_layout() {
        let mut tokens = TokenSet::new("at")
            .with_refresh_token("rt")
            .with_expiry(at(1_000), 3600);
        tokens.extra.insert("openid".to_string(), "https://id.example.com/u/1".to_string());

        let entries = tokens.to_entries();
        assert_eq!(entries.get("expires_at").map(String::as_str), Some("4600"));
        assert_eq!(entries.get("refresh_token").map(String::as_str), Some("rt"));

        let restored = TokenSet::from_entries(entries).unwrap();
        assert_eq!(restored.access_token(), "at");
        assert_eq!(restored.expires_at, Some(at(4_600)));
        assert_eq!(
            restored.extra.get("openid").map(String::as_str),
            Some("https://id.example.com/u/1")
        );
    }

    #[test]
    fn test_from_entries_rejects_bad_expiry() {
        let mut entries = BTreeMap::new();
        entries.insert("access_token".to_string(), "at".to_string());
        entries.insert("expires_at".to_string(), "soon".to_string());
        assert!(matches!(
            TokenSet::from_entries(entries),
            Err(AdapterError::Token(TokenError::Corrupted { .. }))
        ));
        assert!(matches!(
            TokenSet::from_entries(BTreeMap::new()),
            Err(AdapterError::Token(TokenError::NotConnected))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let tokens = TokenSet::new("secret-access").with_refresh_token("secret-refresh");
        let debug = format!("{:?}", tokens);
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-refresh"));
    }
}
