//! id_token Verification
//!
//! Decodes or verifies a signed id_token and validates its claims. Expiry is
//! checked here with the configured leeway rather than by the JWT library.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, DecodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::assertion::{HttpJwksSource, JwksSource};
use crate::core::{Clock, HttpTransport};
use crate::error::{AdapterError, AdapterResult, AssertionError, ConfigurationError, UnexpectedResponseError};
use crate::profile::{stringify, FieldMapping, FieldRule};
use crate::telemetry::TracingHooks;
use crate::types::{IdTokenSettings, Profile, ProfileField, ProviderConfig, VerificationMode};

/// Decoded id_token payload.
pub type Claims = Map<String, Value>;

/// Verifier for one provider's id_tokens.
pub struct IdTokenVerifier {
    provider_id: String,
    client_id: String,
    settings: IdTokenSettings,
    keys: Option<Arc<dyn JwksSource>>,
    clock: Arc<dyn Clock>,
}

impl IdTokenVerifier {
    pub fn new(
        provider_id: impl Into<String>,
        client_id: impl Into<String>,
        settings: IdTokenSettings,
        keys: Option<Arc<dyn JwksSource>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            client_id: client_id.into(),
            settings,
            keys,
            clock,
        }
    }

    /// Build the verifier a provider config asks for, if any.
    pub fn from_config<T: HttpTransport + 'static>(
        config: &ProviderConfig,
        transport: Arc<T>,
        clock: Arc<dyn Clock>,
    ) -> Option<Self> {
        let settings = config.id_token.clone()?;
        let keys = match (&settings.verification, &config.jwks_endpoint) {
            (VerificationMode::Jwks, Some(url)) => Some(Arc::new(HttpJwksSource::new(
                config.provider_id.clone(),
                url.clone(),
                transport,
                config.timeout(),
            )) as Arc<dyn JwksSource>),
            _ => None,
        };
        Some(Self::new(
            config.provider_id.clone(),
            config.credentials.client_id.clone(),
            settings,
            keys,
            clock,
        ))
    }

    pub fn settings(&self) -> &IdTokenSettings {
        &self.settings
    }

    /// Verify `token` and return its claims.
    ///
    /// `expected_nonce` is compared against the `nonce` claim when given.
    pub async fn verify(&self, token: &str, expected_nonce: Option<&str>) -> AdapterResult<Claims> {
        let header = decode_header(token).map_err(|e| AssertionError::Malformed {
            message: e.to_string(),
        })?;

        let claims = match self.settings.verification {
            VerificationMode::TrustTransport => decode_payload(token)?,
            VerificationMode::Jwks => self.verify_signature(token, &header).await?,
        };

        self.validate_claims(&claims, expected_nonce)?;
        self.subject(&claims)?;

        TracingHooks::on_assertion_verified(&self.provider_id, header.kid.as_deref());
        Ok(claims)
    }

    /// Map verified claims onto a profile. The subject claim is used as the
    /// identifier unless the mapping names one.
    pub fn profile(&self, claims: &Claims, mapping: &FieldMapping) -> AdapterResult<Profile> {
        self.subject(claims)?;
        let document = Value::Object(claims.clone());
        if mapping.has_rule_for(ProfileField::Identifier) {
            return mapping.apply(&document);
        }

        let mut rules = vec![FieldRule::path(
            ProfileField::Identifier,
            self.settings.subject_claim.clone(),
        )];
        rules.extend(mapping.rules().iter().cloned());
        FieldMapping::new(rules).apply(&document)
    }

    fn subject(&self, claims: &Claims) -> AdapterResult<String> {
        claims
            .get(&self.settings.subject_claim)
            .and_then(stringify)
            .ok_or_else(|| {
                UnexpectedResponseError::MissingField {
                    field: self.settings.subject_claim.clone(),
                }
                .into()
            })
    }

    async fn verify_signature(&self, token: &str, header: &Header) -> AdapterResult<Claims> {
        if !self.settings.algorithms.contains(&header.alg) {
            return Err(AssertionError::Malformed {
                message: format!("Algorithm {:?} not accepted", header.alg),
            }
            .into());
        }

        let source = self.keys.as_ref().ok_or_else(|| ConfigurationError::MissingRequired {
            field: "jwks_endpoint".to_string(),
        })?;

        match try_keys(token, header, &source.keys().await?) {
            Err(AdapterError::Assertion(AssertionError::SignatureInvalid)) => {
                try_keys(token, header, &source.refetch().await?)
            }
            result => result,
        }
    }

    fn validate_claims(&self, claims: &Claims, expected_nonce: Option<&str>) -> AdapterResult<()> {
        let now = self.clock.now().timestamp();
        let leeway = self.settings.leeway_secs;
        let leeway_i64 = i64::try_from(leeway).unwrap_or(i64::MAX);

        let expired_at = numeric_claim(claims, "exp").ok_or_else(|| AssertionError::Malformed {
            message: "missing exp claim".to_string(),
        })?;
        if expired_at.saturating_add(leeway_i64) < now {
            return Err(AdapterError::ExpiredAssertion {
                expired_at,
                now,
                leeway,
            });
        }

        if let Some(issued_at) = numeric_claim(claims, "iat") {
            if issued_at > now.saturating_add(leeway_i64) {
                return Err(AssertionError::IssuedInFuture { issued_at, now }.into());
            }
        }

        if let Some(expected) = &self.settings.issuer {
            let received = claims.get("iss").and_then(Value::as_str).unwrap_or_default();
            if received.trim_end_matches('/') != expected.trim_end_matches('/') {
                return Err(AssertionError::IssuerMismatch {
                    expected: expected.clone(),
                    received: received.to_string(),
                }
                .into());
            }
        }

        if self.settings.verify_audience && !audience_contains(claims, &self.client_id) {
            return Err(AssertionError::AudienceMismatch {
                expected: self.client_id.clone(),
            }
            .into());
        }

        if let Some(expected) = expected_nonce {
            if claims.get("nonce").and_then(Value::as_str) != Some(expected) {
                return Err(AssertionError::NonceMismatch.into());
            }
        }

        Ok(())
    }
}

/// Try keys whose `kid` matches the header first, then every other key.
fn try_keys(token: &str, header: &Header, keys: &JwkSet) -> AdapterResult<Claims> {
    let kid = header.kid.as_deref();
    let matches_kid = |jwk: &&Jwk| kid.is_some() && jwk.common.key_id.as_deref() == kid;
    let ordered = keys
        .keys
        .iter()
        .filter(matches_kid)
        .chain(keys.keys.iter().filter(|jwk| !matches_kid(jwk)));

    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    for jwk in ordered {
        let Ok(key) = DecodingKey::from_jwk(jwk) else {
            continue;
        };
        if let Ok(data) = decode::<Value>(token, &key, &validation) {
            return into_claims(data.claims);
        }
    }
    Err(AssertionError::SignatureInvalid.into())
}

/// Decode the payload without checking the signature.
fn decode_payload(token: &str) -> AdapterResult<Claims> {
    let malformed = |message: String| AdapterError::from(AssertionError::Malformed { message });
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => return Err(malformed("expected three segments".to_string())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| malformed(e.to_string()))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| malformed(e.to_string()))?;
    into_claims(value)
}

fn into_claims(value: Value) -> AdapterResult<Claims> {
    match value {
        Value::Object(claims) => Ok(claims),
        _ => Err(AssertionError::Malformed {
            message: "payload is not a JSON object".to_string(),
        }
        .into()),
    }
}

fn numeric_claim(claims: &Claims, name: &str) -> Option<i64> {
    match claims.get(name)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn audience_contains(claims: &Claims, client_id: &str) -> bool {
    match claims.get("aud") {
        Some(Value::String(aud)) => aud == client_id,
        Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(client_id)),
        _ => false,
    }
}
