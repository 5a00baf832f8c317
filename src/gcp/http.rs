//! HTTP utilities for GCP REST API calls

use crate::error::GcpApiError;
use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Upper bound for one request, body included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Pull `error.message` out of a GCP error payload
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        })
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloud-nuke/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Send a request and decode the JSON response.
    ///
    /// Non-success statuses become a [`GcpApiError`] so callers can classify
    /// them; an empty body decodes to `Value::Null`.
    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            if status == StatusCode::NOT_FOUND {
                tracing::debug!("API error: {} - {}", status, sanitize_for_log(&text));
            } else {
                tracing::warn!("API error: {} - {}", status, sanitize_for_log(&text));
            }
            return Err(GcpApiError {
                status: status.as_u16(),
                message: error_message(status, &text),
            }
            .into());
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).context("Failed to parse response JSON")
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::GET, url, token, None).await
    }

    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::POST, url, token, body).await
    }

    pub async fn patch(&self, url: &str, token: &str, body: &Value) -> Result<Value> {
        self.send(Method::PATCH, url, token, Some(body)).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value> {
        self.send(Method::DELETE, url, token, None).await
    }
}

/// Format a GCP API error for display
/// Security: Maps well-known statuses to generic messages
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    let Some(api) = error.chain().find_map(|c| c.downcast_ref::<GcpApiError>()) else {
        return format!("{:#}", error);
    };

    match api.status {
        401 => "Authentication failed. Run 'gcloud auth application-default login'.".to_string(),
        403 => "Permission denied. Check your GCP IAM permissions.".to_string(),
        404 => "Resource not found.".to_string(),
        409 => "Resource conflict. The resource may be in use.".to_string(),
        429 => "Rate limit exceeded. Please try again later.".to_string(),
        500..=599 => "GCP service temporarily unavailable. Please try again.".to_string(),
        _ => format!("Request failed ({}): {}", api.status, api.message),
    }
}
