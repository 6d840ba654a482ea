//! JSON-over-HTTP plumbing shared by the embedding and chat backends.
//!
//! Maps reqwest failures onto [`BackendError`] so callers can match on
//! timeouts and status codes without touching reqwest types.

use knowledgeops_core::backend::BackendError;
use reqwest::RequestBuilder;
use std::time::Duration;

pub fn client(timeout_secs: u64) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| BackendError::Unreachable(format!("failed to build HTTP client: {}", e)))
}

/// Send one request and decode a JSON body.
pub async fn send_json(
    request: RequestBuilder,
    timeout_secs: u64,
) -> Result<serde_json::Value, BackendError> {
    let response = request
        .header("Content-Type", "application/json")
        .send()
        .await
        .map_err(|e| map_transport_error(e, timeout_secs))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            code: status.as_u16(),
            body: truncate_body(&body),
        });
    }

    response
        .json()
        .await
        .map_err(|e| BackendError::InvalidResponse(e.to_string()))
}

/// Send with exponential backoff: 1s, 2s, 4s, ... capped at 32s.
///
/// Retries network errors, timeouts, HTTP 429 and 5xx. Other 4xx
/// responses fail immediately.
pub async fn send_json_with_retry<F>(
    build: F,
    max_retries: u32,
    timeout_secs: u64,
) -> Result<serde_json::Value, BackendError>
where
    F: Fn() -> RequestBuilder,
{
    let mut last_err = BackendError::Unreachable("no attempt made".to_string());

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match send_json(build(), timeout_secs).await {
            Ok(json) => return Ok(json),
            Err(e) if is_retryable(&e) => {
                tracing::warn!(attempt, "backend request failed, retrying: {}", e);
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err)
}

pub fn is_retryable(err: &BackendError) -> bool {
    match err {
        BackendError::Unreachable(_) | BackendError::Timeout(_) => true,
        BackendError::Status { code, .. } => *code == 429 || *code >= 500,
        BackendError::Unconfigured | BackendError::InvalidResponse(_) => false,
    }
}

fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout_secs)
    } else {
        BackendError::Unreachable(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}
