//! PKCE and Random Values
//!
//! RFC 7636 Proof Key for Code Exchange, plus the random state/nonce values
//! handed to the caller when it does not supply its own.

use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE verifier length (RFC 7636 allows 43..=128).
pub const PKCE_VERIFIER_LENGTH: usize = 64;

/// PKCE challenge method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PkceMethod {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "S256")]
    S256,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

/// Verifier and derived challenge.
#[derive(Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
    pub method: PkceMethod,
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("method", &self.method)
            .finish()
    }
}

impl PkcePair {
    /// Generate a fresh pair.
    pub fn generate(method: PkceMethod) -> Self {
        let code_verifier = random_urlsafe(PKCE_VERIFIER_LENGTH);
        let code_challenge = compute_challenge(&code_verifier, method);
        Self {
            code_verifier,
            code_challenge,
            method,
        }
    }
}

/// Compute the challenge for a verifier.
pub fn compute_challenge(verifier: &str, method: PkceMethod) -> String {
    match method {
        PkceMethod::Plain => verifier.to_string(),
        PkceMethod::S256 => {
            let hash = Sha256::digest(verifier.as_bytes());
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hash)
        }
    }
}

/// Random URL-safe string of exactly `length` characters.
pub fn random_urlsafe(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes_needed = (length * 3 + 3) / 4;
    let random_bytes: Vec<u8> = (0..bytes_needed).map(|_| rng.gen()).collect();

    let mut encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&random_bytes);
    encoded.truncate(length);
    encoded
}
