//! Profile Fetcher
//!
//! Calls the provider's user endpoint with the current token and maps the
//! response onto a normalized [`Profile`]. Side-channel lookups fill fields
//! the primary document lacks.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

use crate::core::{append_query, Clock, HttpMethod, HttpRequest, HttpTransport};
use crate::error::{
    create_error_from_response, AdapterError, AdapterResult, ConfigurationError,
    UnexpectedResponseError,
};
use crate::flows::openid::{ATTRIBUTE_PREFIX, CLAIMED_ID_KEY};
use crate::flows::{send_request, OAuth1Flow};
use crate::profile::{FieldMapping, FieldRule, FieldSource, SideChannelLookup};
use crate::telemetry::TracingHooks;
use crate::types::{
    Profile, ProfileField, ProfileSettings, Protocol, ProviderConfig, TokenPlacement, TokenSet,
};

/// Profile fetching interface.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// Fetch and normalize the profile for `tokens`. Never mutates `tokens`.
    async fn fetch(&self, tokens: &TokenSet) -> AdapterResult<Profile>;
}

/// Profile fetcher for one provider.
pub struct DefaultProfileFetcher<T: HttpTransport> {
    config: Arc<ProviderConfig>,
    transport: Arc<T>,
    oauth1: OAuth1Flow<T>,
}

impl<T: HttpTransport> DefaultProfileFetcher<T> {
    pub fn new(config: Arc<ProviderConfig>, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        let oauth1 = OAuth1Flow::new(config.clone(), transport.clone(), clock);
        Self {
            config,
            transport,
            oauth1,
        }
    }

    fn settings(&self) -> AdapterResult<&ProfileSettings> {
        self.config.profile.as_ref().ok_or_else(|| {
            ConfigurationError::MissingRequired {
                field: "profile".to_string(),
            }
            .into()
        })
    }

    /// Build an authenticated request for `url`.
    fn authorized_request(
        &self,
        settings: &ProfileSettings,
        method: HttpMethod,
        url: &str,
        mut params: Vec<(String, String)>,
        tokens: &TokenSet,
    ) -> AdapterResult<HttpRequest> {
        if let TokenPlacement::Query { param } = &settings.token_placement {
            params.push((param.clone(), tokens.access_token().to_string()));
        }

        let timeout = self.config.timeout();
        let (mut request, signed_params) = match method {
            HttpMethod::Get => (HttpRequest::get(append_query(url, &params), timeout), Vec::new()),
            HttpMethod::Post => (HttpRequest::post_form(url, &params, timeout), params),
        };

        request = match &settings.token_placement {
            TokenPlacement::BearerHeader => {
                request.header("authorization", format!("Bearer {}", tokens.access_token()))
            }
            TokenPlacement::Header { name, scheme } => {
                let value = match scheme {
                    Some(scheme) => format!("{} {}", scheme, tokens.access_token()),
                    None => tokens.access_token().to_string(),
                };
                request.header(name, value)
            }
            TokenPlacement::Query { .. } => request,
            TokenPlacement::OAuth1Signed => {
                let authorization = self.oauth1.sign_resource_request(
                    tokens,
                    method,
                    &request.url,
                    &signed_params,
                )?;
                request.header("authorization", authorization)
            }
        };

        for (name, value) in &settings.headers {
            request = request.header(name, value.clone());
        }
        Ok(request.header("accept", "application/json"))
    }

    async fn get_document(&self, request: HttpRequest) -> AdapterResult<Value> {
        let response = send_request(&*self.transport, &self.config.provider_id, request).await?;
        if !response.is_success() {
            return Err(create_error_from_response(response.status, &response.body));
        }
        serde_json::from_str(&response.body).map_err(|e| {
            UnexpectedResponseError::InvalidBody {
                message: format!("Profile response is not JSON: {}", e),
            }
            .into()
        })
    }

    async fn side_channel(
        &self,
        settings: &ProfileSettings,
        lookup: &SideChannelLookup,
        tokens: &TokenSet,
    ) -> AdapterResult<Option<String>> {
        let request = self.authorized_request(
            settings,
            HttpMethod::Get,
            &lookup.endpoint,
            Vec::new(),
            tokens,
        )?;
        let document = self.get_document(request).await?;
        Ok(lookup.select(&document))
    }

    async fn fill_side_channels(
        &self,
        settings: &ProfileSettings,
        profile: &mut Profile,
        tokens: &TokenSet,
    ) {
        let pending: Vec<&SideChannelLookup> = settings
            .side_channels
            .iter()
            .filter(|lookup| !profile.is_set(lookup.target))
            .collect();
        if pending.is_empty() {
            return;
        }

        let results = join_all(
            pending
                .iter()
                .map(|lookup| self.side_channel(settings, lookup, tokens)),
        )
        .await;

        for (lookup, result) in pending.into_iter().zip(results) {
            match result {
                Ok(Some(value)) if !profile.is_set(lookup.target) => {
                    profile.set(lookup.target, value);
                    if lookup.marks_verified && lookup.target == ProfileField::Email {
                        profile.email_verified = true;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    TracingHooks::on_side_channel_failed(&self.config.provider_id, lookup.target, &err)
                }
            }
        }
    }

    /// Map the attributes stored at OpenID verification time.
    fn openid_profile(&self, tokens: &TokenSet) -> AdapterResult<Profile> {
        let mut document = Map::new();
        if let Some(claimed_id) = tokens.extra.get(CLAIMED_ID_KEY) {
            document.insert(CLAIMED_ID_KEY.to_string(), Value::String(claimed_id.clone()));
        }
        for (key, value) in &tokens.extra {
            if let Some(name) = key.strip_prefix(ATTRIBUTE_PREFIX) {
                document.insert(name.to_string(), Value::String(value.clone()));
            }
        }

        let mapping = match &self.config.profile {
            Some(settings) if settings.field_mapping.has_rule_for(ProfileField::Identifier) => {
                settings.field_mapping.clone()
            }
            Some(settings) => {
                let mut rules = vec![FieldRule::path(ProfileField::Identifier, CLAIMED_ID_KEY)];
                rules.extend(settings.field_mapping.rules().iter().cloned());
                FieldMapping::new(rules)
            }
            None => openid_mapping(),
        };
        mapping.apply(&Value::Object(document))
    }
}

/// Attribute Exchange names onto profile fields.
pub fn openid_mapping() -> FieldMapping {
    FieldMapping::default()
        .rule(ProfileField::Identifier, CLAIMED_ID_KEY)
        .rule(ProfileField::Email, "contact/email")
        .push(FieldRule {
            target: ProfileField::DisplayName,
            source: FieldSource::FirstNonEmpty(vec![
                "namePerson".to_string(),
                "namePerson/friendly".to_string(),
            ]),
            transform: Default::default(),
        })
        .rule(ProfileField::FirstName, "namePerson/first")
        .rule(ProfileField::LastName, "namePerson/last")
        .rule(ProfileField::Gender, "person/gender")
        .rule(ProfileField::Zip, "contact/postalCode/home")
        .rule(ProfileField::Country, "contact/country/home")
        .rule(ProfileField::Locale, "pref/language")
}

#[async_trait]
impl<T: HttpTransport> ProfileFetcher for DefaultProfileFetcher<T> {
    async fn fetch(&self, tokens: &TokenSet) -> AdapterResult<Profile> {
        if self.config.protocol == Protocol::OpenId {
            return self.openid_profile(tokens);
        }

        let settings = self.settings()?;
        let endpoint = settings.endpoint.as_deref().ok_or_else(|| {
            ConfigurationError::MissingRequired {
                field: "profile.endpoint".to_string(),
            }
        })?;

        let params: Vec<(String, String)> = settings
            .query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let request = self.authorized_request(settings, settings.method, endpoint, params, tokens)?;
        let document = self.get_document(request).await?;

        let mut profile = settings.field_mapping.apply(&document)?;
        self.fill_side_channels(settings, &mut profile, tokens).await;
        Ok(profile)
    }
}

/// Mock profile fetcher for testing.
#[derive(Default)]
pub struct MockProfileFetcher {
    next_profile: Mutex<Option<Profile>>,
    next_error: Mutex<Option<AdapterError>>,
    fetch_history: Mutex<Vec<String>>,
}

impl MockProfileFetcher {
    /// Create new mock fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set next profile.
    pub fn set_next_profile(&self, profile: Profile) -> &Self {
        *self.next_profile.lock().unwrap_or_else(|p| p.into_inner()) = Some(profile);
        self
    }

    /// Set next error.
    pub fn set_next_error(&self, error: AdapterError) -> &Self {
        *self.next_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error);
        self
    }

    /// Access tokens the mock was called with.
    pub fn get_fetch_history(&self) -> Vec<String> {
        self.fetch_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProfileFetcher for MockProfileFetcher {
    async fn fetch(&self, tokens: &TokenSet) -> AdapterResult<Profile> {
        self.fetch_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tokens.access_token().to_string());

        if let Some(error) = self.next_error.lock().unwrap_or_else(|p| p.into_inner()).take() {
            return Err(error);
        }
        match self.next_profile.lock().unwrap_or_else(|p| p.into_inner()).take() {
            Some(profile) => Ok(profile),
            None => Profile::new("mock-user"),
        }
    }
}

/// Create mock profile fetcher for testing.
pub fn create_mock_profile_fetcher() -> MockProfileFetcher {
    MockProfileFetcher::new()
}
