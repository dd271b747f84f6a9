//! Authorization URL
//!
//! RFC 6749 Section 4.1.1 authorization request, with optional PKCE
//! (RFC 7636) and OIDC nonce.

use crate::core::{append_query, random_urlsafe, PkcePair};
use crate::error::{AdapterResult, ConfigurationError};
use crate::types::{AuthorizationRequest, AuthorizationUrl, ProviderConfig};

const STATE_LENGTH: usize = 32;

/// Build the OAuth2 redirect URL. State and nonce are generated when the
/// caller does not supply them.
pub fn build_authorization_url(
    config: &ProviderConfig,
    request: AuthorizationRequest,
) -> AdapterResult<AuthorizationUrl> {
    let endpoint = config
        .authorization_endpoint
        .as_deref()
        .ok_or_else(|| ConfigurationError::MissingRequired {
            field: "authorization_endpoint".to_string(),
        })?;

    let state = request
        .state
        .unwrap_or_else(|| random_urlsafe(STATE_LENGTH));
    let nonce = match (request.nonce, &config.id_token) {
        (Some(nonce), _) => Some(nonce),
        (None, Some(_)) => Some(random_urlsafe(STATE_LENGTH)),
        (None, None) => None,
    };

    let mut params: Vec<(String, String)> = vec![
        ("response_type".to_string(), "code".to_string()),
        ("client_id".to_string(), config.credentials.client_id.clone()),
        ("redirect_uri".to_string(), config.credentials.callback_url.clone()),
    ];

    let scope = match request.scopes {
        Some(scopes) if !scopes.is_empty() => Some(scopes.join(&config.scope_separator)),
        _ => config.scope(),
    };
    if let Some(scope) = scope {
        params.push(("scope".to_string(), scope));
    }
    params.push(("state".to_string(), state.clone()));
    if let Some(nonce) = &nonce {
        params.push(("nonce".to_string(), nonce.clone()));
    }

    let code_verifier = config.pkce.map(|method| {
        let pair = PkcePair::generate(method);
        params.push(("code_challenge".to_string(), pair.code_challenge.clone()));
        params.push((
            "code_challenge_method".to_string(),
            pair.method.as_str().to_string(),
        ));
        pair.code_verifier
    });

    if let Some(prompt) = request.prompt {
        params.push(("prompt".to_string(), prompt.as_str().to_string()));
    }
    if let Some(login_hint) = request.login_hint {
        params.push(("login_hint".to_string(), login_hint));
    }
    for (name, value) in config.extra_authorize_params.iter().chain(&request.extra_params) {
        params.push((name.clone(), value.clone()));
    }

    Ok(AuthorizationUrl {
        url: append_query(endpoint, &params),
        state,
        nonce,
        code_verifier,
    })
}
