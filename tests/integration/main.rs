//! Integration tests against a local provider served by wiremock.

mod exchange;
mod id_token;
mod profile;

use serde_json::json;
use social_login_integration::{
    provider_config, FieldMapping, ProfileField, ProfileSettings, ProviderConfigBuilder,
    ReqwestHttpTransport, TokenPlacement,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

/// Setup mock server for testing.
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Transport talking to the mock server over real HTTP.
pub fn transport() -> Arc<ReqwestHttpTransport> {
    Arc::new(ReqwestHttpTransport::new(Duration::from_secs(5)).unwrap())
}

/// Base configuration pointing every endpoint at the mock server.
pub fn base_config(server: &MockServer) -> ProviderConfigBuilder {
    provider_config("example")
        .client_id("abc")
        .client_secret("xyz")
        .callback_url("https://app.example.com/callback")
        .authorization_endpoint(format!("{}/authorize", server.uri()))
        .token_endpoint(format!("{}/token", server.uri()))
        .timeout(Duration::from_secs(5))
}

pub fn profile_settings(server: &MockServer) -> ProfileSettings {
    ProfileSettings {
        endpoint: Some(format!("{}/user", server.uri())),
        method: social_login_integration::HttpMethod::Get,
        token_placement: TokenPlacement::BearerHeader,
        headers: Default::default(),
        query: Default::default(),
        field_mapping: FieldMapping::default()
            .rule(ProfileField::Identifier, "id")
            .rule(ProfileField::DisplayName, "name")
            .rule(ProfileField::Email, "email"),
        side_channels: Vec::new(),
    }
}

pub fn token_body(access_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 3600
    })
}
