//! OAuth 1.0a Flow
//!
//! RFC 5849 Section 2: temporary credentials, resource owner authorization
//! and token credentials.

use std::sync::Arc;

use secrecy::SecretString;

use crate::core::oauth1::OAuth1Request;
use crate::core::{append_query, Clock, HttpMethod, HttpRequest, HttpTransport};
use crate::error::{AdapterResult, ConfigurationError, ProviderError, UnexpectedResponseError};
use crate::flows::send_request;
use crate::types::{ProviderConfig, RequestToken, TokenResponse, TokenSet};

/// OAuth1 flow for one provider.
pub struct OAuth1Flow<T: HttpTransport> {
    config: Arc<ProviderConfig>,
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
}

impl<T: HttpTransport> OAuth1Flow<T> {
    pub fn new(config: Arc<ProviderConfig>, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            transport,
            clock,
        }
    }

    fn consumer_secret(&self) -> &str {
        self.config
            .credentials
            .client_secret
            .as_ref()
            .and_then(|s| s.static_value())
            .unwrap_or_default()
    }

    fn signer<'a>(&'a self, body_params: &'a [(String, String)]) -> OAuth1Request<'a> {
        OAuth1Request {
            consumer_key: &self.config.credentials.client_id,
            consumer_secret: self.consumer_secret(),
            body_params,
            ..Default::default()
        }
    }

    fn header(&self, request: &OAuth1Request<'_>, method: HttpMethod, url: &str) -> AdapterResult<String> {
        request
            .authorization_header(method.as_str(), url, self.clock.now())
            .map_err(|_| {
                ConfigurationError::InvalidEndpoint {
                    field: "oauth1".to_string(),
                    url: url.to_string(),
                }
                .into()
            })
    }

    async fn post_signed(&self, url: &str, authorization: String) -> AdapterResult<TokenResponse> {
        let request = HttpRequest::post_form(url, &[], self.config.timeout())
            .header("authorization", authorization);
        let response = send_request(&*self.transport, &self.config.provider_id, request).await?;
        let parsed = TokenResponse::parse(&response)?;

        if let Some(problem) = parsed.field("oauth_problem") {
            let mut error = ProviderError::new(problem, response.status);
            error.description = parsed.field("oauth_problem_advice");
            return Err(error.into());
        }
        Ok(parsed)
    }

    /// Obtain temporary credentials and the URL to send the user to.
    pub async fn request_token(&self) -> AdapterResult<RequestToken> {
        let endpoint = self
            .config
            .request_token_endpoint
            .as_deref()
            .ok_or_else(|| ConfigurationError::MissingRequired {
                field: "request_token_endpoint".to_string(),
            })?;
        let authorize = self
            .config
            .authorization_endpoint
            .as_deref()
            .ok_or_else(|| ConfigurationError::MissingRequired {
                field: "authorization_endpoint".to_string(),
            })?;

        let mut signer = self.signer(&[]);
        signer.callback = Some(&self.config.credentials.callback_url);
        let authorization = self.header(&signer, HttpMethod::Post, endpoint)?;

        let response = self.post_signed(endpoint, authorization).await?;
        if let Some(confirmed) = response.field("oauth_callback_confirmed") {
            if confirmed != "true" {
                return Err(UnexpectedResponseError::InvalidBody {
                    message: "callback not confirmed".to_string(),
                }
                .into());
            }
        }

        let token = response.require("oauth_token")?;
        let token_secret = response.require("oauth_token_secret")?;
        let authorize_url = append_query(
            authorize,
            &[("oauth_token".to_string(), token.clone())],
        );

        Ok(RequestToken {
            token,
            token_secret: SecretString::new(token_secret),
            authorize_url,
        })
    }

    /// Trade an authorized request token and verifier for token credentials.
    pub async fn exchange_verifier(
        &self,
        request_token: &str,
        request_token_secret: &str,
        verifier: &str,
    ) -> AdapterResult<TokenSet> {
        let mut signer = self.signer(&[]);
        signer.token = Some(request_token);
        signer.token_secret = Some(request_token_secret);
        signer.verifier = Some(verifier);
        let authorization = self.header(&signer, HttpMethod::Post, &self.config.token_endpoint)?;

        let response = self
            .post_signed(&self.config.token_endpoint, authorization)
            .await?;

        let mut tokens = TokenSet::new(response.require("oauth_token")?);
        tokens.token_type = "OAuth".to_string();
        tokens.token_secret = Some(SecretString::new(response.require("oauth_token_secret")?));
        tokens.set_expiry(self.clock.now(), self.config.fixed_expiry_secs)?;
        for name in &self.config.persist_fields {
            if let Some(value) = response.field(name) {
                tokens.extra.insert(name.clone(), value);
            }
        }
        Ok(tokens)
    }

    /// `Authorization` header for a protected-resource request.
    pub fn sign_resource_request(
        &self,
        tokens: &TokenSet,
        method: HttpMethod,
        url: &str,
        body_params: &[(String, String)],
    ) -> AdapterResult<String> {
        let mut signer = self.signer(body_params);
        signer.token = Some(tokens.access_token());
        signer.token_secret = tokens.token_secret();
        self.header(&signer, method, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::provider_config;
    use crate::core::{FixedClock, HttpResponse, MockHttpTransport};
    use crate::error::AdapterError;
    use crate::types::Protocol;
    use chrono::TimeZone;
    use std::time::Duration;

    fn flow(transport: Arc<MockHttpTransport>) -> OAuth1Flow<MockHttpTransport> {
        let config = provider_config("social")
            .protocol(Protocol::OAuth1)
            .client_id("consumer-key")
            .client_secret("consumer-secret")
            .callback_url("https://app.example.com/callback")
            .request_token_endpoint("https://api.example.com/oauth/request_token")
            .authorization_endpoint("https://api.example.com/oauth/authorize")
            .token_endpoint("https://api.example.com/oauth/access_token")
            .persist_field("screen_name")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let clock = FixedClock(chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        OAuth1Flow::new(Arc::new(config), transport, Arc::new(clock))
    }

    #[tokio::test]
    async fn test_request_token() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::text(
            200,
            "oauth_token=req-token&oauth_token_secret=req-secret&oauth_callback_confirmed=true",
        ));

        let token = flow(transport.clone()).request_token().await.unwrap();
        assert_eq!(token.token, "req-token");
        assert_eq!(token.token_secret(), "req-secret");
        assert_eq!(
            token.authorize_url,
            "https://api.example.com/oauth/authorize?oauth_token=req-token"
        );

        let request = transport.get_last_request().unwrap();
        let header = request.header_value("authorization").unwrap();
        assert!(header.contains("oauth_callback=\"https%3A%2F%2Fapp.example.com%2Fcallback\""));
        assert!(header.contains("oauth_consumer_key=\"consumer-key\""));
        assert!(header.contains("oauth_timestamp=\"1700000000\""));
    }

    #[tokio::test]
    async fn test_exchange_verifier() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::text(
            200,
            "oauth_token=access&oauth_token_secret=access-secret&screen_name=alice&user_id=9",
        ));

        let tokens = flow(transport.clone())
            .exchange_verifier("req-token", "req-secret", "verifier-1")
            .await
            .unwrap();
        assert_eq!(tokens.access_token(), "access");
        assert_eq!(tokens.token_secret(), Some("access-secret"));
        assert_eq!(tokens.extra.get("screen_name").map(String::as_str), Some("alice"));
        assert!(!tokens.extra.contains_key("user_id"));
        assert!(tokens.expires_at.is_none());

        let header = transport
            .get_last_request()
            .unwrap()
            .header_value("authorization")
            .unwrap()
            .to_string();
        assert!(header.contains("oauth_verifier=\"verifier-1\""));
        assert!(header.contains("oauth_token=\"req-token\""));
    }

    #[tokio::test]
    async fn test_oauth_problem_is_provider_error() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::text(
            200,
            "oauth_problem=token_rejected&oauth_problem_advice=expired",
        ));
        let result = flow(transport)
            .exchange_verifier("req-token", "req-secret", "v")
            .await;
        match result {
            Err(AdapterError::Provider(error)) => {
                assert_eq!(error.code, "token_rejected");
                assert_eq!(error.description.as_deref(), Some("expired"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_token_secret_is_unexpected_response() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_response(HttpResponse::text(200, "oauth_token=access"));
        let result = flow(transport)
            .exchange_verifier("req-token", "req-secret", "v")
            .await;
        assert!(matches!(
            result,
            Err(AdapterError::UnexpectedResponse(UnexpectedResponseError::MissingField { .. }))
        ));
    }
}
