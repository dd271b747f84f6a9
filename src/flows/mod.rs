//! Flows
//!
//! Protocol flows turning callback material into tokens:
//!
//! - **OAuth2** (RFC 6749 Section 4.1): authorization code exchange, PKCE, token upgrade
//! - **OAuth 1.0a** (RFC 5849): request token and verifier exchange
//! - **OpenID 2.0**: positive assertion checked with the provider
//! - **Refresh**: re-exchange or dedicated refresh endpoint

pub mod authorize;
pub mod client_auth;
pub mod exchange;
pub mod oauth1;
pub mod openid;
pub mod refresh;

use std::time::Instant;

use crate::core::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::AdapterResult;
use crate::telemetry::TracingHooks;

pub use authorize::build_authorization_url;
pub use exchange::{
    create_mock_token_exchanger, DefaultTokenExchanger, MockTokenExchanger, TokenExchanger,
};
pub use oauth1::OAuth1Flow;
pub use openid::{OpenIdFlow, OPENID_NS};
pub use refresh::{
    create_mock_token_refresher, DefaultTokenRefresher, MockTokenRefresher, RefreshPolicy,
    TokenRefresher,
};

/// Send a provider request with request/response logging.
pub(crate) async fn send_request<T: HttpTransport + ?Sized>(
    transport: &T,
    provider: &str,
    request: HttpRequest,
) -> AdapterResult<HttpResponse> {
    let method = request.method.as_str();
    let url = request.url.clone();
    TracingHooks::on_request_start(provider, method, &url);

    let start = Instant::now();
    match transport.send(request).await {
        Ok(response) => {
            TracingHooks::on_request_complete(
                provider,
                method,
                &url,
                response.status,
                start.elapsed(),
            );
            Ok(response)
        }
        Err(e) => {
            TracingHooks::on_request_error(provider, method, &url, &e);
            Err(e)
        }
    }
}
