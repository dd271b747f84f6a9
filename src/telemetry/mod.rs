//! Telemetry
//!
//! Structured logging hooks for provider calls. Token values never appear in
//! log fields; URLs are logged without their query string.

use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use crate::error::AdapterError;
use crate::types::ProfileField;

/// Strip the query string and fragment from a URL before logging it.
pub fn redact_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Tracing hooks for provider operations.
pub struct TracingHooks;

impl TracingHooks {
    /// Logs the start of a provider request.
    #[instrument(skip(method, url))]
    pub fn on_request_start(provider: &str, method: &str, url: &str) {
        debug!(
            method = %method,
            url = %redact_url(url),
            "Provider request started"
        );
    }

    /// Logs the completion of a provider request.
    #[instrument(skip(method, url, status, duration))]
    pub fn on_request_complete(
        provider: &str,
        method: &str,
        url: &str,
        status: u16,
        duration: Duration,
    ) {
        debug!(
            method = %method,
            url = %redact_url(url),
            status = status,
            duration_ms = duration.as_millis() as u64,
            "Provider request completed"
        );
    }

    /// Logs a request error.
    #[instrument(skip(method, url, err))]
    pub fn on_request_error(provider: &str, method: &str, url: &str, err: &AdapterError) {
        error!(
            method = %method,
            url = %redact_url(url),
            error_code = err.error_code(),
            error = %err,
            "Provider request failed"
        );
    }

    /// Logs a completed token exchange.
    #[instrument(skip(has_refresh_token, expires_in))]
    pub fn on_token_exchanged(provider: &str, has_refresh_token: bool, expires_in: Option<u64>) {
        info!(
            has_refresh_token = has_refresh_token,
            expires_in = ?expires_in,
            "Tokens obtained"
        );
    }

    /// Logs a completed refresh.
    #[instrument(skip(expires_in))]
    pub fn on_token_refreshed(provider: &str, expires_in: Option<u64>) {
        info!(expires_in = ?expires_in, "Tokens refreshed");
    }

    /// Logs a proactive refresh that failed while the current token is still valid.
    #[instrument(skip(err))]
    pub fn on_proactive_refresh_failed(provider: &str, err: &AdapterError) {
        warn!(
            error_code = err.error_code(),
            error = %err,
            "Proactive refresh failed, keeping current token"
        );
    }

    /// Logs a side-channel lookup that failed; the profile is returned without it.
    #[instrument(skip(field, err))]
    pub fn on_side_channel_failed(provider: &str, field: ProfileField, err: &AdapterError) {
        warn!(
            field = field.as_str(),
            error_code = err.error_code(),
            error = %err,
            "Side-channel lookup failed"
        );
    }

    /// Logs a verified signed assertion.
    #[instrument(skip(kid))]
    pub fn on_assertion_verified(provider: &str, kid: Option<&str>) {
        debug!(kid = ?kid, "Signed assertion verified");
    }

    /// Logs a key set refetch after a verification miss.
    #[instrument(skip(url))]
    pub fn on_key_set_refetch(provider: &str, url: &str) {
        info!(url = %redact_url(url), "Refetching key set");
    }

    /// Logs a session being cleared.
    #[instrument]
    pub fn on_disconnect(provider: &str) {
        info!("Session cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("https://api.example.com/me?access_token=secret"),
            "https://api.example.com/me"
        );
        assert_eq!(redact_url("https://api.example.com/me"), "https://api.example.com/me");
        assert_eq!(redact_url("https://a.example.com/x#frag"), "https://a.example.com/x");
    }
}
