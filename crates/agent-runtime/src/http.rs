//! Shared HTTP plumbing for the REST providers

use agent_core::error::{AgentError, Result};
use agent_core::provider::ProviderKind;
use reqwest::{Client, Response};
use std::time::Duration;

pub(crate) fn build_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Falling back to default HTTP client");
        Client::new()
    })
}

/// Map a transport failure to `ProviderRequest`
pub(crate) fn request_error(kind: ProviderKind, err: &reqwest::Error) -> AgentError {
    if err.is_timeout() {
        AgentError::ProviderRequest(format!("{kind} request timed out"))
    } else if err.is_connect() {
        AgentError::ProviderRequest(format!("could not connect to {kind}: {err}"))
    } else {
        AgentError::ProviderRequest(format!("{kind} request failed: {err}"))
    }
}

/// Pass 2xx responses through; turn anything else into `ProviderRequest`
/// carrying the API's own error message when it sent one.
pub(crate) async fn check_status(kind: ProviderKind, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body);

    tracing::warn!(provider = %kind, status = %status, "Provider returned an error");
    Err(AgentError::ProviderRequest(format!(
        "{kind} API error ({status}): {message}"
    )))
}

/// Decode a JSON body, mapping failures to `ProviderRequest`
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    kind: ProviderKind,
    response: Response,
) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| AgentError::ProviderRequest(format!("failed to decode {kind} response: {e}")))
}

pub(crate) fn require_key(kind: ProviderKind, key: Option<&str>) -> Result<&str> {
    key.ok_or_else(|| AgentError::ProviderAuth(kind.to_string()))
}
