use super::*;
use social_login_integration::{
    AdapterError, Grant, InMemoryTokenStore, SideChannelLookup, SocialLoginAdapter,
    UnexpectedResponseError,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

fn emails_lookup(server: &MockServer) -> SideChannelLookup {
    SideChannelLookup {
        target: ProfileField::Email,
        endpoint: format!("{}/user/emails", server.uri()),
        list_path: None,
        require_true: vec!["primary".to_string(), "verified".to_string()],
        value_path: "email".to_string(),
        marks_verified: true,
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("A1")))
        .mount(server)
        .await;
}

async fn signed_in(
    settings: ProfileSettings,
    server: &MockServer,
) -> SocialLoginAdapter<ReqwestHttpTransport, InMemoryTokenStore> {
    let config = base_config(server).profile(settings).build().unwrap();
    let adapter =
        SocialLoginAdapter::new(config, transport(), Arc::new(InMemoryTokenStore::new())).unwrap();
    adapter
        .authenticate(Grant::authorization_code("C"))
        .await
        .unwrap();
    adapter
}

#[tokio::test]
async fn test_profile_with_side_channel_email() {
    let server = setup_mock_server().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "name": "Octo Cat",
            "email": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "email": "old@example.com", "primary": false, "verified": true },
            { "email": "octo@example.com", "primary": true, "verified": true }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = profile_settings(&server);
    settings.side_channels.push(emails_lookup(&server));
    let adapter = signed_in(settings, &server).await;

    let profile = adapter.user_profile().await.unwrap();
    assert_eq!(profile.identifier(), "42");
    assert_eq!(profile.display_name.as_deref(), Some("Octo Cat"));
    assert_eq!(profile.email.as_deref(), Some("octo@example.com"));
    assert!(profile.email_verified);
}

#[tokio::test]
async fn test_side_channel_failure_still_returns_profile() {
    let server = setup_mock_server().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-1",
            "name": "No Mail"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let mut settings = profile_settings(&server);
    settings.side_channels.push(emails_lookup(&server));
    let adapter = signed_in(settings, &server).await;

    let profile = adapter.user_profile().await.unwrap();
    assert_eq!(profile.identifier(), "u-1");
    assert_eq!(profile.email, None);
    assert!(!profile.email_verified);
}

#[tokio::test]
async fn test_token_in_query_parameter() {
    let server = setup_mock_server().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .and(query_param("access_token", "A1"))
        .and(query_param("fields", "id,name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "fb-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = profile_settings(&server);
    settings.token_placement = TokenPlacement::Query {
        param: "access_token".to_string(),
    };
    settings
        .query
        .insert("fields".to_string(), "id,name".to_string());
    let adapter = signed_in(settings, &server).await;

    let profile = adapter.user_profile().await.unwrap();
    assert_eq!(profile.identifier(), "fb-1");
}

#[tokio::test]
async fn test_missing_identifier_is_unexpected_response() {
    let server = setup_mock_server().await;
    mount_token(&server).await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "Anonymous" })))
        .mount(&server)
        .await;

    let adapter = signed_in(profile_settings(&server), &server).await;

    let result = adapter.user_profile().await;
    assert!(matches!(
        result,
        Err(AdapterError::UnexpectedResponse(UnexpectedResponseError::MissingField { .. }))
    ));
}
