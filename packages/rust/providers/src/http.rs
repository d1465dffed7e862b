//! Shared HTTP client construction and error classification.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use kwresearch_shared::{ProviderError, ResearchError, Result};

/// User-Agent string for all outgoing requests.
const USER_AGENT: &str = concat!("kwresearch/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| ResearchError::Network(format!("failed to build HTTP client: {e}")))
}

/// Map a non-success status to a provider error.
///
/// 408, 425, 429 and 5xx are worth retrying; 400 means the request itself was
/// bad; anything else is permanent.
pub(crate) fn classify_status(status: StatusCode, context: &str) -> ProviderError {
    let message = format!("{context}: HTTP {status}");
    match status.as_u16() {
        408 | 425 | 429 | 500..=599 => ProviderError::transient(message),
        400 => ProviderError::invalid_input(message),
        _ => ProviderError::permanent(message),
    }
}

/// Transport failures (connect, timeout, reset, body read) are transient.
pub(crate) fn transport_error(err: reqwest::Error, context: &str) -> ProviderError {
    if err.is_builder() {
        return ProviderError::invalid_input(format!("{context}: {err}"));
    }
    ProviderError::transient(format!("{context}: {err}"))
}
