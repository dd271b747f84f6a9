use super::*;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use social_login_integration::{
    AdapterError, AssertionError, Grant, IdTokenSettings, InMemoryTokenStore, SocialLoginAdapter,
    VerificationMode,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const KEY_ONE: &[u8] = b"secret-key-one";
const KEY_TWO: &[u8] = b"secret-key-two";

fn jwks(kid: &str, k: &str) -> serde_json::Value {
    json!({ "keys": [{ "kty": "oct", "kid": kid, "alg": "HS256", "k": k }] })
}

fn sign(server: &MockServer, kid: &str, secret: &[u8], exp_offset: i64, nonce: Option<&str>) -> String {
    let now = Utc::now().timestamp();
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    let mut claims = json!({
        "iss": server.uri(),
        "sub": "user-77",
        "aud": "abc",
        "email": "user77@example.com",
        "email_verified": true,
        "iat": now - 5,
        "exp": now + exp_offset
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    encode(&header, &claims, &EncodingKey::from_secret(secret)).unwrap()
}

fn adapter(
    server: &MockServer,
    store: Arc<InMemoryTokenStore>,
) -> SocialLoginAdapter<ReqwestHttpTransport, InMemoryTokenStore> {
    let config = base_config(server)
        .jwks_endpoint(format!("{}/jwks", server.uri()))
        .id_token(IdTokenSettings {
            verification: VerificationMode::Jwks,
            issuer: Some(server.uri()),
            algorithms: vec![Algorithm::HS256],
            ..Default::default()
        })
        .profile(ProfileSettings {
            endpoint: None,
            field_mapping: FieldMapping::default().rule(ProfileField::Email, "email"),
            ..profile_settings(server)
        })
        .build()
        .unwrap();
    SocialLoginAdapter::new(config, transport(), store).unwrap()
}

async fn mount_token(server: &MockServer, id_token: String) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "A1",
            "expires_in": 3600,
            "id_token": id_token
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_id_token_verified_against_published_keys() {
    let server = setup_mock_server().await;
    mount_token(&server, sign(&server, "k1", KEY_ONE, 600, None)).await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k1", "c2VjcmV0LWtleS1vbmU")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let adapter = adapter(&server, store.clone());

    adapter
        .authenticate(Grant::authorization_code("C"))
        .await
        .unwrap();
    let profile = adapter.user_profile().await.unwrap();

    assert_eq!(profile.identifier(), "user-77");
    assert_eq!(profile.email.as_deref(), Some("user77@example.com"));
    assert!(!store.is_empty());
}

#[tokio::test]
async fn test_rotated_key_triggers_one_refetch() {
    let server = setup_mock_server().await;
    mount_token(&server, sign(&server, "k2", KEY_TWO, 600, None)).await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k1", "c2VjcmV0LWtleS1vbmU")),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k2", "c2VjcmV0LWtleS10d28")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let adapter = adapter(&server, Arc::new(InMemoryTokenStore::new()));
    let exchanged = adapter
        .authenticate(Grant::authorization_code("C"))
        .await
        .unwrap();
    assert!(exchanged.tokens.id_token.is_some());
}

#[tokio::test]
async fn test_expiry_within_leeway_is_accepted() {
    let server = setup_mock_server().await;
    mount_token(&server, sign(&server, "k1", KEY_ONE, -30, None)).await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k1", "c2VjcmV0LWtleS1vbmU")),
        )
        .mount(&server)
        .await;

    let adapter = adapter(&server, Arc::new(InMemoryTokenStore::new()));
    assert!(adapter
        .authenticate(Grant::authorization_code("C"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_expiry_beyond_leeway_is_rejected() {
    let server = setup_mock_server().await;
    mount_token(&server, sign(&server, "k1", KEY_ONE, -200, None)).await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k1", "c2VjcmV0LWtleS1vbmU")),
        )
        .mount(&server)
        .await;

    let store = Arc::new(InMemoryTokenStore::new());
    let adapter = adapter(&server, store.clone());
    let result = adapter.authenticate(Grant::authorization_code("C")).await;

    assert!(matches!(result, Err(AdapterError::ExpiredAssertion { .. })));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unknown_signing_key_is_rejected() {
    let server = setup_mock_server().await;
    mount_token(&server, sign(&server, "k1", b"someone-else", 600, None)).await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k1", "c2VjcmV0LWtleS1vbmU")),
        )
        .expect(2)
        .mount(&server)
        .await;

    let adapter = adapter(&server, Arc::new(InMemoryTokenStore::new()));
    let result = adapter.authenticate(Grant::authorization_code("C")).await;

    assert!(matches!(
        result,
        Err(AdapterError::Assertion(AssertionError::SignatureInvalid))
    ));
}

#[tokio::test]
async fn test_nonce_must_match() {
    let server = setup_mock_server().await;
    mount_token(&server, sign(&server, "k1", KEY_ONE, 600, Some("n-1"))).await;

    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(jwks("k1", "c2VjcmV0LWtleS1vbmU")),
        )
        .mount(&server)
        .await;

    let adapter = adapter(&server, Arc::new(InMemoryTokenStore::new()));
    let result = adapter
        .authenticate_with_nonce(Grant::authorization_code("C"), Some("n-2"))
        .await;

    assert!(matches!(
        result,
        Err(AdapterError::Assertion(AssertionError::NonceMismatch))
    ));
}
