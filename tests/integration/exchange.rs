use super::*;
use secrecy::ExposeSecret;
use social_login_integration::{
    AdapterError, AuthStyle, Grant, HttpMethod, InMemoryTokenStore, RefreshSettings,
    SocialLoginAdapter, TokenStore, TransportError,
};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn adapter(
    config: social_login_integration::ProviderConfig,
    store: Arc<InMemoryTokenStore>,
) -> SocialLoginAdapter<ReqwestHttpTransport, InMemoryTokenStore> {
    SocialLoginAdapter::new(config, transport(), store).unwrap()
}

#[tokio::test]
async fn test_code_exchange_with_basic_auth() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("authorization", "Basic YWJjOnh5eg=="))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=C-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "expires_in": 3600,
            "scope": "email"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let adapter = adapter(base_config(&server).build().unwrap(), store.clone());

    let exchanged = adapter
        .authenticate(Grant::AuthorizationCode {
            code: "C-123".to_string(),
            code_verifier: None,
            state: Some("s-1".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(exchanged.tokens.access_token.expose_secret(), "A1");
    assert_eq!(exchanged.state.as_deref(), Some("s-1"));
    assert!(exchanged.tokens.expires_at.is_some());
    assert_eq!(
        store.get("example.refresh_token").await.unwrap().as_deref(),
        Some("R1")
    );

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body).to_string();
    assert!(!body.contains("client_secret"));
    assert!(body.contains("redirect_uri="));
}

#[tokio::test]
async fn test_code_exchange_with_custom_params_over_get() {
    let server = setup_mock_server().await;

    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("app_id", "abc"))
        .and(query_param("secret", "xyz"))
        .and(query_param("code", "C-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("A9")))
        .expect(1)
        .mount(&server)
        .await;

    let config = base_config(&server)
        .token_method(HttpMethod::Get)
        .auth_style(AuthStyle::CustomNamedParams {
            id_param: "app_id".to_string(),
            secret_param: "secret".to_string(),
        })
        .build()
        .unwrap();
    let adapter = adapter(config, Arc::new(InMemoryTokenStore::new()));

    let exchanged = adapter
        .authenticate(Grant::authorization_code("C-9"))
        .await
        .unwrap();
    assert_eq!(exchanged.tokens.access_token.expose_secret(), "A9");
}

#[tokio::test]
async fn test_provider_error_is_preserved() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Code already used"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let adapter = adapter(base_config(&server).build().unwrap(), store.clone());

    let result = adapter.authenticate(Grant::authorization_code("used")).await;
    match result {
        Err(AdapterError::Provider(error)) => {
            assert_eq!(error.code, "invalid_grant");
            assert_eq!(error.description.as_deref(), Some("Code already used"));
            assert_eq!(error.status, 400);
        }
        other => panic!("expected provider error, got {:?}", other),
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let config = base_config(&server)
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    let adapter = adapter(config, Arc::new(InMemoryTokenStore::new()));

    let result = adapter.authenticate(Grant::authorization_code("C")).await;
    assert!(matches!(
        result,
        Err(AdapterError::Transport(TransportError::Timeout { .. }))
    ));
}

#[tokio::test]
async fn test_forced_refresh_replaces_stored_tokens() {
    let server = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A1",
            "refresh_token": "R1",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A2",
            "expires_in": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let config = base_config(&server)
        .refresh(RefreshSettings::default())
        .build()
        .unwrap();
    let adapter = adapter(config, store.clone());

    let first = adapter
        .authenticate(Grant::authorization_code("C"))
        .await
        .unwrap();
    let refreshed = adapter.refresh().await.unwrap();

    assert_eq!(refreshed.access_token.expose_secret(), "A2");
    assert!(refreshed.expires_at > first.tokens.expires_at);
    assert_eq!(
        store.get("example.access_token").await.unwrap().as_deref(),
        Some("A2")
    );
}
