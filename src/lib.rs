//! Social Login Integration
//!
//! A provider-agnostic adapter for social sign-in over OAuth 2.0, OAuth 1.0a
//! and OpenID 2.0. One [`ProviderConfig`] describes one identity provider;
//! the adapter turns callback material into tokens, keeps them fresh, and
//! maps the provider's user document onto a normalized [`Profile`].
//!
//! # Features
//!
//! - Authorization Code exchange (RFC 6749 Section 4.1) with PKCE (RFC 7636)
//! - Client authentication via Basic header, body params, custom parameter
//!   names, or a minted ES256 client-secret assertion
//! - OAuth 1.0a request token and verifier exchange (RFC 5849)
//! - OpenID 2.0 positive assertion checking
//! - Proactive and reactive refresh (RFC 6749 Section 6)
//! - id_token verification against a JWKS with clock-skew leeway
//! - Declarative profile field mapping with side-channel lookups
//! - OIDC Discovery (RFC 8414)
//!
//! # Example
//!
//! ```rust,ignore
//! use social_login_integration::{provider_config, AuthorizationRequest, Grant, SocialLoginAdapter};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = provider_config("example")
//!         .client_id("my-client-id")
//!         .client_secret("my-client-secret")
//!         .callback_url("https://myapp.com/callback")
//!         .authorization_endpoint("https://provider.com/authorize")
//!         .token_endpoint("https://provider.com/token")
//!         .scope("email")
//!         .timeout(Duration::from_secs(10))
//!         .build()?;
//!
//!     let adapter = SocialLoginAdapter::from_config(config)?;
//!     let redirect = adapter.authorization_url(AuthorizationRequest::default()).await?;
//!     println!("Send the user to: {}", redirect.url);
//!
//!     // ... later, in the callback handler:
//!     let exchanged = adapter.authenticate(Grant::authorization_code("code")).await?;
//!     let profile = adapter.user_profile().await?;
//!     println!("Signed in as {}", profile.identifier());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: configuration, tokens, grants and the normalized profile
//! - `error`: error taxonomy shared by every operation
//! - `core`: HTTP transport, clock, PKCE, OAuth1 signing, OIDC and OpenID discovery
//! - `flows`: authorization URLs, token exchange and refresh per protocol
//! - `token`: key-value token storage and the per-provider token manager
//! - `profile`: field mapping and the profile fetcher
//! - `assertion`: id_token verification and key sets
//! - `telemetry`: structured logging hooks
//! - `builders`: fluent configuration builder
//! - `client`: the adapter combining all of the above

pub mod assertion;
pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod flows;
pub mod profile;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export main adapter
pub use client::SocialLoginAdapter;

// Re-export builders
pub use builders::{provider_config, ProviderConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, parse_error_response, AdapterError, AdapterResult,
    AssertionError, ConfigurationError, OAuth2ErrorResponse, ProviderError, StorageError,
    TokenError, TransportError, UnexpectedResponseError,
};

// Re-export types
pub use types::{
    // Config
    AuthStyle, ClientSecret, Credentials, IdTokenSettings, ProfileSettings, Protocol,
    ProviderConfig, RefreshSettings, RefreshStyle, SignedSecretConfig, TokenPlacement,
    TokenUpgrade, VerificationMode,
    // Token
    TokenResponse, TokenSet,
    // Auth
    AuthorizationRequest, AuthorizationUrl, Exchanged, Grant, Prompt, RequestToken,
    // Profile
    Profile, ProfileField,
};

// Re-export core components
pub use core::{
    Clock, DiscoveryClient, DiscoveryDocument, FixedClock, HttpMethod, HttpRequest, HttpResponse,
    HttpTransport, MockHttpTransport, OpenIdDiscovery, OpenIdService, OpenIdServiceKind,
    PkceMethod, ReqwestHttpTransport, SystemClock,
};

// Re-export flows
pub use flows::{
    build_authorization_url, DefaultTokenExchanger, DefaultTokenRefresher, MockTokenExchanger,
    MockTokenRefresher, OAuth1Flow, OpenIdFlow, RefreshPolicy, TokenExchanger, TokenRefresher,
};

// Re-export token management
pub use token::{
    DefaultTokenManager, InMemoryTokenStore, MockTokenManager, MockTokenStore, TokenManager,
    TokenStore,
};

// Re-export profiles
pub use profile::{
    DefaultProfileFetcher, FieldMapping, FieldRule, FieldSource, MockProfileFetcher,
    ProfileFetcher, SideChannelLookup, Transform,
};

// Re-export assertions
pub use assertion::{Claims, HttpJwksSource, IdTokenVerifier, JwksSource, MockJwksSource};

// Re-export telemetry
pub use telemetry::TracingHooks;
