//! HTTP Transport
//!
//! HTTP client interface and implementations for provider requests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AdapterError, AdapterResult, TransportError, UnexpectedResponseError};

/// Default cap on provider response bodies (1MB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1_048_576;

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL, including any query string.
    pub url: String,
    /// Request headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Create a GET request.
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout,
        }
    }

    /// Create a POST request with a form-encoded body.
    pub fn post_form(url: impl Into<String>, params: &[(String, String)], timeout: Duration) -> Self {
        let mut request = Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::new(),
            body: Some(encode_form(params)),
            timeout,
        };
        request.headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        request
    }

    /// Set a header (name is lowercased).
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header by name, case-insensitively.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the form body into pairs.
    pub fn form_params(&self) -> Vec<(String, String)> {
        self.body
            .as_deref()
            .map(|b| {
                url::form_urlencoded::parse(b.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decode the query string into pairs.
    pub fn query_params(&self) -> Vec<(String, String)> {
        url::Url::parse(&self.url)
            .map(|u| u.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl Default for HttpMethod {
    fn default() -> Self {
        Self::Post
    }
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lowercase names).
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Build a JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: [("content-type".to_string(), "application/json".to_string())]
                .into_iter()
                .collect(),
            body: body.to_string(),
        }
    }

    /// Build a plain-text response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: [("content-type".to_string(), "text/plain".to_string())]
                .into_iter()
                .collect(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> AdapterResult<HttpResponse>;
}

/// Encode pairs as `application/x-www-form-urlencoded`.
pub fn encode_form(params: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// Append query parameters to a URL, keeping any query it already has.
pub fn append_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, encode_form(params))
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create a transport. The timeout is mandatory: provider calls never wait forever.
    pub fn new(timeout: Duration) -> AdapterResult<Self> {
        Self::with_options(timeout, DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                AdapterError::Transport(TransportError::TlsError {
                    message: e.to_string(),
                })
            })?;

        Ok(Self {
            client,
            max_response_size,
        })
    }

    fn map_send_error(error: reqwest::Error, timeout: Duration, url: &str) -> AdapterError {
        let transport_error = if error.is_timeout() {
            TransportError::Timeout { timeout }
        } else if error.is_connect() {
            let message = error.to_string();
            if message.contains("dns") || message.contains("resolve") {
                TransportError::DnsResolutionFailed {
                    host: url::Url::parse(url)
                        .ok()
                        .and_then(|u| u.host_str().map(String::from))
                        .unwrap_or_default(),
                }
            } else {
                TransportError::ConnectionFailed { message }
            }
        } else {
            TransportError::ConnectionFailed {
                message: error.to_string(),
            }
        };
        AdapterError::Transport(transport_error)
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> AdapterResult<HttpResponse> {
        let timeout = request.timeout;

        let mut req_builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::map_send_error(e, timeout, &request.url))?;

        let status = response.status().as_u16();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(UnexpectedResponseError::UnexpectedRedirect { location }.into());
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_size {
                return Err(UnexpectedResponseError::ResponseTooLarge { size: len as usize }.into());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::map_send_error(e, timeout, &request.url))?;

        if body.len() > self.max_response_size {
            return Err(UnexpectedResponseError::ResponseTooLarge { size: body.len() }.into());
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

type MockOutcome = Result<HttpResponse, TransportError>;

/// Mock HTTP transport for testing.
///
/// Responses registered for a URL prefix with [`MockHttpTransport::route`] win over the
/// FIFO queue filled by [`MockHttpTransport::queue_response`].
#[derive(Default)]
pub struct MockHttpTransport {
    routes: Mutex<Vec<(String, VecDeque<MockOutcome>)>>,
    queue: Mutex<VecDeque<MockOutcome>>,
    request_history: Mutex<Vec<HttpRequest>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a response to return, in order.
    pub fn queue_response(&self, response: HttpResponse) -> &Self {
        Self::lock(&self.queue).push_back(Ok(response));
        self
    }

    /// Queue a JSON response.
    pub fn queue_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.queue_response(HttpResponse::json(status, &body))
    }

    /// Queue a transport failure.
    pub fn queue_error(&self, error: TransportError) -> &Self {
        Self::lock(&self.queue).push_back(Err(error));
        self
    }

    /// Register a response for requests whose URL starts with `url_prefix`.
    pub fn route(&self, url_prefix: impl Into<String>, response: HttpResponse) -> &Self {
        self.push_route(url_prefix.into(), Ok(response));
        self
    }

    /// Register a transport failure for requests whose URL starts with `url_prefix`.
    pub fn route_error(&self, url_prefix: impl Into<String>, error: TransportError) -> &Self {
        self.push_route(url_prefix.into(), Err(error));
        self
    }

    fn push_route(&self, prefix: String, outcome: MockOutcome) {
        let mut routes = Self::lock(&self.routes);
        match routes.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, outcomes)) => outcomes.push_back(outcome),
            None => routes.push((prefix, VecDeque::from([outcome]))),
        }
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        Self::lock(&self.request_history).clone()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        Self::lock(&self.request_history).last().cloned()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        Self::lock(&self.request_history).clear();
    }

    fn next_outcome(&self, url: &str) -> Option<MockOutcome> {
        {
            let mut routes = Self::lock(&self.routes);
            if let Some((_, outcomes)) = routes
                .iter_mut()
                .filter(|(prefix, outcomes)| url.starts_with(prefix.as_str()) && !outcomes.is_empty())
                .max_by_key(|(prefix, _)| prefix.len())
            {
                // The last outcome for a route is sticky.
                return if outcomes.len() > 1 {
                    outcomes.pop_front()
                } else {
                    outcomes.front().cloned()
                };
            }
        }
        Self::lock(&self.queue).pop_front()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> AdapterResult<HttpResponse> {
        let url = request.url.clone();
        Self::lock(&self.request_history).push(request);

        match self.next_outcome(&url) {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(AdapterError::Transport(error)),
            None => Err(AdapterError::Transport(TransportError::ConnectionFailed {
                message: format!("No mock response available for {}", url),
            })),
        }
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}
