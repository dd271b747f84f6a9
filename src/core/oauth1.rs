//! OAuth 1.0a Request Signing
//!
//! RFC 5849 HMAC-SHA1 signatures for the request-token, access-token and
//! protected-resource calls of OAuth1 providers.

use base64::Engine;
use chrono::{DateTime, Utc};
use ring::hmac;

use crate::core::pkce::random_urlsafe;

/// Percent-encode per RFC 3986 (unreserved characters kept).
pub fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Base string URI: scheme and host lowercased, default port and query dropped.
fn base_string_uri(url: &url::Url) -> String {
    let scheme = url.scheme().to_ascii_lowercase();
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let port = match (scheme.as_str(), url.port()) {
        (_, None) | ("http", Some(80)) | ("https", Some(443)) => String::new(),
        (_, Some(port)) => format!(":{}", port),
    };
    format!("{}://{}{}{}", scheme, host, port, url.path())
}

/// Build the signature base string.
///
/// `params` holds the oauth_* protocol parameters and any form-body parameters;
/// query parameters are read from `url`.
pub fn signature_base_string(
    method: &str,
    url: &str,
    params: &[(String, String)],
) -> Result<String, url::ParseError> {
    let parsed = url::Url::parse(url)?;

    let mut normalized: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .chain(
            params
                .iter()
                .filter(|(k, _)| k != "oauth_signature")
                .map(|(k, v)| (percent_encode(k), percent_encode(v))),
        )
        .collect();
    normalized.sort();

    let joined = normalized
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    Ok(format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(&base_string_uri(&parsed)),
        percent_encode(&joined)
    ))
}

/// HMAC-SHA1 signature over a base string.
pub fn hmac_sha1_signature(base_string: &str, consumer_secret: &str, token_secret: &str) -> String {
    let signing_key = format!(
        "{}&{}",
        percent_encode(consumer_secret),
        percent_encode(token_secret)
    );
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, signing_key.as_bytes());
    let tag = hmac::sign(&key, base_string.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(tag.as_ref())
}

/// Everything needed to sign one OAuth1 request.
#[derive(Clone, Debug, Default)]
pub struct OAuth1Request<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: Option<&'a str>,
    pub token_secret: Option<&'a str>,
    pub callback: Option<&'a str>,
    pub verifier: Option<&'a str>,
    /// Form-body parameters that take part in the signature.
    pub body_params: &'a [(String, String)],
}

impl<'a> OAuth1Request<'a> {
    /// Produce the `Authorization: OAuth ...` header value.
    pub fn authorization_header(
        &self,
        method: &str,
        url: &str,
        now: DateTime<Utc>,
    ) -> Result<String, url::ParseError> {
        self.authorization_header_with(method, url, &random_urlsafe(32), now.timestamp())
    }

    /// Header with an explicit nonce and timestamp.
    pub fn authorization_header_with(
        &self,
        method: &str,
        url: &str,
        nonce: &str,
        timestamp: i64,
    ) -> Result<String, url::ParseError> {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), self.consumer_key.to_string()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some(token) = self.token {
            oauth_params.push(("oauth_token".to_string(), token.to_string()));
        }
        if let Some(callback) = self.callback {
            oauth_params.push(("oauth_callback".to_string(), callback.to_string()));
        }
        if let Some(verifier) = self.verifier {
            oauth_params.push(("oauth_verifier".to_string(), verifier.to_string()));
        }

        let mut signed_params = oauth_params.clone();
        signed_params.extend(self.body_params.iter().cloned());

        let base = signature_base_string(method, url, &signed_params)?;
        let signature = hmac_sha1_signature(
            &base,
            self.consumer_secret,
            self.token_secret.unwrap_or_default(),
        );
        oauth_params.push(("oauth_signature".to_string(), signature));

        let fields = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("OAuth {}", fields))
    }
}
