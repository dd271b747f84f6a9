//! OpenID 2.0 Discovery
//!
//! Yadis (XRDS) discovery with HTML `<link rel="openid2.provider">` fallback,
//! turning an OpenID identifier into the OP endpoint that serves it. Results
//! are cached per identifier.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use url::Url;

use crate::core::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{AdapterError, AdapterResult, ConfigurationError, UnexpectedResponseError};

const OPENID2_SERVER: &str = "http://specs.openid.net/auth/2.0/server";
const OPENID2_SIGNON: &str = "http://specs.openid.net/auth/2.0/signon";
const XRDS_CONTENT_TYPES: [&str; 2] = ["application/xrds+xml", "text/xml"];
const MAX_HOPS: usize = 5;

/// How the discovered OP treats the identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenIdServiceKind {
    /// OP identifier: the user selects an identity at the OP.
    Server,
    /// Claimed identifier: the identity is the identifier itself.
    Signon,
}

/// A discovered OpenID 2.0 service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenIdService {
    pub endpoint: String,
    pub kind: OpenIdServiceKind,
    /// OP-local identifier the claimed identifier delegates to.
    pub local_id: Option<String>,
}

struct CacheEntry {
    service: OpenIdService,
    expires_at: Instant,
}

/// OP endpoint discovery with a per-identifier TTL cache.
pub struct OpenIdDiscovery<T: HttpTransport> {
    transport: Arc<T>,
    timeout: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl<T: HttpTransport> OpenIdDiscovery<T> {
    /// Create a discovery client with a one hour cache.
    pub fn new(transport: Arc<T>, timeout: Duration) -> Self {
        Self::with_cache_ttl(transport, timeout, Duration::from_secs(3600))
    }

    /// Create a discovery client with a custom cache TTL.
    pub fn with_cache_ttl(transport: Arc<T>, timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            transport,
            timeout,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    fn cached(&self, identifier: &str) -> Option<OpenIdService> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        match cache.get(identifier) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.service.clone()),
            Some(_) => {
                cache.remove(identifier);
                None
            }
            None => None,
        }
    }

    /// Discover (or return cached) the OP service behind an identifier.
    pub async fn discover(&self, identifier: &str) -> AdapterResult<OpenIdService> {
        let identifier = identifier.trim();
        if let Some(service) = self.cached(identifier) {
            return Ok(service);
        }

        let service = self.resolve(identifier).await?;
        parse_http_url("openid.op_endpoint", &service.endpoint)?;

        tracing::debug!(
            identifier = %identifier,
            endpoint = %service.endpoint,
            "OpenID endpoint discovered"
        );

        self.cache.lock().unwrap_or_else(|p| p.into_inner()).insert(
            identifier.to_string(),
            CacheEntry {
                service: service.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );

        Ok(service)
    }

    /// Drop cached services for one identifier, or all of them.
    pub fn clear_cache(&self, identifier: Option<&str>) {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        match identifier {
            Some(i) => {
                cache.remove(i.trim());
            }
            None => cache.clear(),
        }
    }

    async fn resolve(&self, identifier: &str) -> AdapterResult<OpenIdService> {
        let original = parse_http_url("identifier", identifier)?;
        let mut url = original.clone();
        let mut yadis = true;

        for _ in 0..MAX_HOPS {
            let response = match self.fetch(&url).await {
                Ok(response) => response,
                Err(AdapterError::UnexpectedResponse(
                    UnexpectedResponseError::UnexpectedRedirect { location },
                )) => {
                    url = follow(&url, &location)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if yadis {
                if is_xrds(&response) {
                    if let Some(service) = parse_xrds(&response.body)? {
                        return Ok(service);
                    }
                    // No OpenID 2.0 service in the XRDS; try HTML on the identifier.
                    yadis = false;
                    url = original.clone();
                    continue;
                }
                let location = response.headers.get("x-xrds-location").cloned().or_else(|| {
                    html_attribute(&response.body, "meta", "http-equiv", "x-xrds-location", "content")
                });
                if let Some(location) = location {
                    url = follow(&url, &location)?;
                    continue;
                }
            }

            return parse_html(&response.body).ok_or_else(|| {
                failed(format!("no OpenID 2.0 endpoint found at {}", url))
            });
        }

        Err(failed(format!("too many redirections discovering {}", identifier)))
    }

    async fn fetch(&self, url: &Url) -> AdapterResult<HttpResponse> {
        let request = HttpRequest::get(url.as_str(), self.timeout)
            .header("accept", "application/xrds+xml, text/html;q=0.9, */*;q=0.1");
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(failed(format!(
                "discovery request to {} failed with status {}",
                url, response.status
            )));
        }
        Ok(response)
    }
}

fn failed(message: String) -> AdapterError {
    ConfigurationError::DiscoveryFailed { message }.into()
}

fn parse_http_url(field: &str, raw: &str) -> AdapterResult<Url> {
    match Url::parse(raw) {
        Ok(url) if url.scheme() == "https" || url.scheme() == "http" => Ok(url),
        _ => Err(ConfigurationError::InvalidEndpoint {
            field: field.to_string(),
            url: raw.to_string(),
        }
        .into()),
    }
}

fn follow(base: &Url, location: &str) -> AdapterResult<Url> {
    let next = base
        .join(location.trim())
        .map_err(|_| failed(format!("invalid discovery location {:?}", location)))?;
    parse_http_url("identifier", next.as_str())
}

fn is_xrds(response: &HttpResponse) -> bool {
    response
        .headers
        .get("content-type")
        .map(|value| {
            let value = value.to_ascii_lowercase();
            XRDS_CONTENT_TYPES.iter().any(|t| value.contains(t))
        })
        .unwrap_or(false)
}

/// First `<Service>` advertising OpenID 2.0, in document order.
pub fn parse_xrds(body: &str) -> AdapterResult<Option<OpenIdService>> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_service = false;
    let mut current_element = String::new();
    let mut types: Vec<String> = Vec::new();
    let mut uri: Option<String> = None;
    let mut local_id: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "Service" {
                    in_service = true;
                    types.clear();
                    uri = None;
                    local_id = None;
                }
                current_element = name;
            }
            Ok(Event::Text(e)) if in_service => {
                let text = e
                    .unescape()
                    .map_err(|e| UnexpectedResponseError::InvalidBody {
                        message: e.to_string(),
                    })?
                    .trim()
                    .to_string();
                match current_element.as_str() {
                    "Type" => types.push(text),
                    "URI" if uri.is_none() => uri = Some(text),
                    "LocalID" | "CanonicalID" => local_id = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Service" {
                    in_service = false;
                    let kind = if types.iter().any(|t| t == OPENID2_SERVER) {
                        Some(OpenIdServiceKind::Server)
                    } else if types.iter().any(|t| t == OPENID2_SIGNON) {
                        Some(OpenIdServiceKind::Signon)
                    } else {
                        None
                    };
                    if let Some(kind) = kind {
                        let endpoint = uri
                            .take()
                            .ok_or_else(|| failed("OpenID service without a URI".to_string()))?;
                        return Ok(Some(OpenIdService {
                            endpoint,
                            kind,
                            local_id: local_id.take(),
                        }));
                    }
                }
                current_element.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(UnexpectedResponseError::InvalidBody {
                    message: e.to_string(),
                }
                .into());
            }
            _ => {}
        }
    }

    Ok(None)
}

/// `<link rel="openid2.provider">` and its optional `openid2.local_id`.
pub fn parse_html(html: &str) -> Option<OpenIdService> {
    let endpoint = html_attribute(html, "link", "rel", "openid2.provider", "href")?;
    Some(OpenIdService {
        endpoint,
        kind: OpenIdServiceKind::Signon,
        local_id: html_attribute(html, "link", "rel", "openid2.local_id", "href"),
    })
}

/// `value_attr` of the first `<tag>` whose `key_attr` lists `key_value`.
fn html_attribute(
    html: &str,
    tag: &str,
    key_attr: &str,
    key_value: &str,
    value_attr: &str,
) -> Option<String> {
    let Ok(tags) = Regex::new(&format!(r"(?is)<{}\b[^>]*>", tag)) else {
        return None;
    };
    let Ok(attributes) =
        Regex::new(r#"(?is)([a-z][a-z0-9_:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
    else {
        return None;
    };

    for element in tags.find_iter(html) {
        let mut matches_key = false;
        let mut value = None;
        for caps in attributes.captures_iter(element.as_str()) {
            let name = caps[1].to_ascii_lowercase();
            let content = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            if name == key_attr {
                matches_key = content
                    .split_whitespace()
                    .any(|v| v.eq_ignore_ascii_case(key_value));
            } else if name == value_attr {
                value = Some(content.trim().replace("&amp;", "&"));
            }
        }
        if matches_key {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                return Some(value);
            }
        }
    }
    None
}
