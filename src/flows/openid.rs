//! OpenID 2.0 Flow
//!
//! Builds `checkid_setup` redirects and validates positive assertions with
//! a direct `check_authentication` request to the OP endpoint. The endpoint
//! is either configured or discovered from an identifier. Attribute Exchange
//! and Simple Registration values are collected for profile mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{
    append_query, Clock, HttpRequest, HttpTransport, OpenIdDiscovery, OpenIdServiceKind,
};
use crate::error::{create_error_from_response, AdapterResult, AssertionError, ConfigurationError};
use crate::flows::send_request;
use crate::types::{AuthorizationUrl, ProviderConfig, TokenSet};

pub const OPENID_NS: &str = "http://specs.openid.net/auth/2.0";
const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";
const AX_NS: &str = "http://openid.net/srv/ax/1.0";
const SREG_NS: &str = "http://openid.net/extensions/sreg/1.1";
const AX_SCHEMA: &str = "http://axschema.org/";

/// Prefix of stored attribute keys in `TokenSet::extra`.
pub const ATTRIBUTE_PREFIX: &str = "openid.attr.";
/// `TokenSet::extra` key holding the verified claimed identifier.
pub const CLAIMED_ID_KEY: &str = "openid";

/// AX attributes requested on every redirect.
const REQUESTED_ATTRIBUTES: [&str; 7] = [
    "contact/email",
    "namePerson",
    "namePerson/first",
    "namePerson/last",
    "namePerson/friendly",
    "contact/country/home",
    "pref/language",
];

/// AX schema names and their SREG equivalents.
const AX_TO_SREG: [(&str, &str); 9] = [
    ("namePerson/friendly", "nickname"),
    ("contact/email", "email"),
    ("namePerson", "fullname"),
    ("birthDate", "dob"),
    ("person/gender", "gender"),
    ("contact/postalCode/home", "postcode"),
    ("contact/country/home", "country"),
    ("pref/language", "language"),
    ("pref/timezone", "timezone"),
];

/// OpenID 2.0 relying-party flow.
pub struct OpenIdFlow<T: HttpTransport> {
    config: Arc<ProviderConfig>,
    transport: Arc<T>,
    discovery: OpenIdDiscovery<T>,
    clock: Arc<dyn Clock>,
}

impl<T: HttpTransport> OpenIdFlow<T> {
    pub fn new(config: Arc<ProviderConfig>, transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        Self {
            discovery: OpenIdDiscovery::new(transport.clone(), config.timeout()),
            config,
            transport,
            clock,
        }
    }

    /// Redirect target plus the `claimed_id` and `identity` to request.
    async fn checkid_target(&self) -> AdapterResult<(String, String, String)> {
        let Some(identifier) = &self.config.identifier else {
            let endpoint = self
                .config
                .authorization_endpoint
                .as_deref()
                .unwrap_or(&self.config.token_endpoint);
            return Ok((
                endpoint.to_string(),
                IDENTIFIER_SELECT.to_string(),
                IDENTIFIER_SELECT.to_string(),
            ));
        };

        let service = self.discovery.discover(identifier).await?;
        Ok(match service.kind {
            OpenIdServiceKind::Server => (
                service.endpoint,
                IDENTIFIER_SELECT.to_string(),
                IDENTIFIER_SELECT.to_string(),
            ),
            OpenIdServiceKind::Signon => {
                let identity = service.local_id.unwrap_or_else(|| identifier.clone());
                (service.endpoint, identifier.clone(), identity)
            }
        })
    }

    /// OP endpoint that must confirm an assertion for `claimed_id`.
    async fn check_endpoint(&self, claimed_id: &str) -> AdapterResult<String> {
        let Some(identifier) = &self.config.identifier else {
            return Ok(self.config.token_endpoint.clone());
        };

        let expected = self.discovery.discover(identifier).await?.endpoint;
        if claimed_id != identifier.trim() {
            let served_by = match self.discovery.discover(claimed_id).await {
                Ok(service) => service.endpoint,
                Err(e) => {
                    tracing::debug!(
                        provider = %self.config.provider_id,
                        error = %e,
                        "Claimed identifier discovery failed"
                    );
                    return Err(rejected("claimed identifier could not be discovered"));
                }
            };
            if served_by != expected {
                return Err(rejected("claimed identifier is served by a different OP"));
            }
        }
        Ok(expected)
    }

    fn realm(&self) -> AdapterResult<String> {
        let callback = url::Url::parse(&self.config.credentials.callback_url).map_err(|_| {
            ConfigurationError::InvalidEndpoint {
                field: "callback_url".to_string(),
                url: self.config.credentials.callback_url.clone(),
            }
        })?;
        Ok(format!("{}/", callback.origin().ascii_serialization()))
    }

    /// Redirect URL asking the OP to authenticate the user.
    pub async fn checkid_url(&self, state: String) -> AdapterResult<AuthorizationUrl> {
        let (endpoint, claimed_id, identity) = self.checkid_target().await?;

        let mut params: Vec<(String, String)> = vec![
            ("openid.ns".into(), OPENID_NS.into()),
            ("openid.mode".into(), "checkid_setup".into()),
            ("openid.return_to".into(), self.config.credentials.callback_url.clone()),
            ("openid.realm".into(), self.realm()?),
            ("openid.identity".into(), identity),
            ("openid.claimed_id".into(), claimed_id),
            ("openid.ns.ax".into(), AX_NS.into()),
            ("openid.ax.mode".into(), "fetch_request".into()),
        ];
        let aliases: Vec<String> = REQUESTED_ATTRIBUTES
            .iter()
            .map(|field| field.replace('/', "_"))
            .collect();
        for (alias, field) in aliases.iter().zip(REQUESTED_ATTRIBUTES) {
            params.push((format!("openid.ax.type.{}", alias), format!("{}{}", AX_SCHEMA, field)));
        }
        params.push(("openid.ax.required".into(), aliases.join(",")));

        let sreg: Vec<&str> = REQUESTED_ATTRIBUTES
            .iter()
            .filter_map(|field| AX_TO_SREG.iter().find(|(ax, _)| ax == field).map(|(_, s)| *s))
            .collect();
        params.push(("openid.ns.sreg".into(), SREG_NS.into()));
        params.push(("openid.sreg.optional".into(), sreg.join(",")));

        for (name, value) in &self.config.extra_authorize_params {
            params.push((name.clone(), value.clone()));
        }

        Ok(AuthorizationUrl {
            url: append_query(&endpoint, &params),
            state,
            nonce: None,
            code_verifier: None,
        })
    }

    /// Verify a positive assertion and turn it into a session credential.
    pub async fn verify(&self, params: &BTreeMap<String, String>) -> AdapterResult<TokenSet> {
        let get = |name: &str| params.get(name).map(String::as_str);

        if get("openid.user_setup_url").is_some() {
            return Err(rejected("setup needed"));
        }
        match get("openid.mode") {
            Some("id_res") => {}
            Some(mode) => return Err(rejected(&format!("mode {}", mode))),
            None => return Err(malformed("openid.mode")),
        }

        if get("openid.return_to") != Some(self.config.credentials.callback_url.as_str()) {
            return Err(rejected("return_to does not match the callback URL"));
        }

        let claimed_id = get("openid.claimed_id")
            .or_else(|| get("openid.identity"))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("openid.claimed_id"))?
            .to_string();
        let endpoint = self.check_endpoint(&claimed_id).await?;
        if let Some(op_endpoint) = get("openid.op_endpoint") {
            if op_endpoint != endpoint {
                return Err(rejected("op_endpoint does not match the provider endpoint"));
            }
        }
        let signed = get("openid.signed").ok_or_else(|| malformed("openid.signed"))?;

        let mut check: Vec<(String, String)> = Vec::new();
        for name in ["openid.assoc_handle", "openid.signed", "openid.sig"] {
            let value = get(name).ok_or_else(|| malformed(name))?;
            check.push((name.to_string(), value.to_string()));
        }
        check.push(("openid.ns".to_string(), OPENID_NS.to_string()));
        for item in signed.split(',').filter(|i| !i.is_empty()) {
            let name = format!("openid.{}", item);
            if name == "openid.mode" || check.iter().any(|(k, _)| *k == name) {
                continue;
            }
            let value = get(&name).ok_or_else(|| malformed(&name))?;
            check.push((name, value.to_string()));
        }
        check.push(("openid.mode".to_string(), "check_authentication".to_string()));

        let request = HttpRequest::post_form(&endpoint, &check, self.config.timeout());
        let response = send_request(&*self.transport, &self.config.provider_id, request).await?;
        if !response.is_success() {
            return Err(create_error_from_response(response.status, &response.body));
        }
        if !is_valid(&response.body) {
            return Err(rejected("provider did not confirm the assertion"));
        }

        let mut tokens = TokenSet::new(claimed_id.clone());
        tokens.token_type = "openid".to_string();
        tokens.set_expiry(self.clock.now(), self.config.fixed_expiry_secs)?;
        tokens.extra.insert(CLAIMED_ID_KEY.to_string(), claimed_id);
        for (name, value) in attributes(params) {
            tokens.extra.insert(format!("{}{}", ATTRIBUTE_PREFIX, name), value);
        }
        Ok(tokens)
    }
}

fn rejected(message: &str) -> crate::error::AdapterError {
    AssertionError::OpenIdRejected {
        message: message.to_string(),
    }
    .into()
}

fn malformed(field: &str) -> crate::error::AdapterError {
    AssertionError::Malformed {
        message: format!("missing {}", field),
    }
    .into()
}

/// Key-value form response: `is_valid:true` on its own line.
fn is_valid(body: &str) -> bool {
    body.lines().any(|line| {
        line.split_once(':')
            .map(|(key, value)| {
                key.trim() == "is_valid" && value.trim().eq_ignore_ascii_case("true")
            })
            .unwrap_or(false)
    })
}

fn namespace_alias<'a>(params: &'a BTreeMap<String, String>, namespace: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, value)| key.starts_with("openid.ns.") && value.as_str() == namespace)
        .map(|(key, _)| &key["openid.ns.".len()..])
}

fn signed_items(params: &BTreeMap<String, String>) -> Vec<&str> {
    params
        .get("openid.signed")
        .map(|s| s.split(',').collect())
        .unwrap_or_default()
}

/// Signed AX and SREG attributes keyed by AX schema name. AX wins.
pub fn attributes(params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    let signed = signed_items(params);

    if let Some(alias) = namespace_alias(params, SREG_NS) {
        let prefix = format!("{}.", alias);
        for item in signed.iter().filter_map(|i| i.strip_prefix(prefix.as_str())) {
            let Some((ax, _)) = AX_TO_SREG.iter().find(|(_, sreg)| *sreg == item) else {
                continue;
            };
            if let Some(value) = params.get(&format!("openid.{}.{}", alias, item)) {
                result.insert(ax.to_string(), value.clone());
            }
        }
    }

    if let Some(alias) = namespace_alias(params, AX_NS) {
        let prefix = format!("{}.type.", alias);
        for key in signed.iter().filter_map(|i| i.strip_prefix(prefix.as_str())) {
            let Some(name) = params
                .get(&format!("openid.{}.type.{}", alias, key))
                .and_then(|uri| uri.strip_prefix(AX_SCHEMA))
                .filter(|name| !name.is_empty())
            else {
                continue;
            };
            let value = params
                .get(&format!("openid.{}.value.{}", alias, key))
                .or_else(|| params.get(&format!("openid.{}.value.{}.1", alias, key)));
            if let Some(value) = value {
                result.insert(name.to_string(), value.clone());
            }
        }
    }

    result
}
