use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::UpstreamError;

// Shared client so every adapter reuses one connection pool
pub static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
});

/// Fixed retry schedule for rate-limited calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Runs `op`, retrying only on [`UpstreamError::RateLimited`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(UpstreamError::RateLimited(msg)) if attempt < self.retries => {
                    attempt += 1;
                    warn!(label, attempt, %msg, "rate limited, backing off");
                    tokio::time::sleep(self.backoff).await;
                }
                other => return other,
            }
        }
    }
}

pub async fn get_json(
    client: &Client,
    url: &str,
    query: &[(&str, String)],
    bearer: Option<&str>,
) -> Result<Value, UpstreamError> {
    debug!(url, "GET upstream");
    send(authorize(client.get(url).query(query), bearer)).await
}

pub async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
    bearer: Option<&str>,
) -> Result<Value, UpstreamError> {
    debug!(url, "POST upstream");
    send(authorize(client.post(url).json(body), bearer)).await
}

fn authorize(request: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
    match bearer {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

async fn send(request: RequestBuilder) -> Result<Value, UpstreamError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;
    let body: Option<Value> = serde_json::from_str(&text).ok();

    if (200..300).contains(&status) {
        return body.ok_or_else(|| UpstreamError::Decode("response body is not JSON".to_string()));
    }
    Err(classify(status, body.as_ref(), &text))
}

/// Maps an error response onto the upstream error taxonomy. Graph-style
/// `{"error": {"code": ..}}` bodies take precedence over the HTTP status,
/// since the Graph API reports throttling with 400/403.
pub fn classify(status: u16, body: Option<&Value>, raw: &str) -> UpstreamError {
    let error = body.and_then(|b| b.get("error"));
    let message = error
        .and_then(|e| e.get("message").and_then(Value::as_str).or_else(|| e.as_str()))
        .unwrap_or(raw)
        .to_string();

    if let Some(code) = error.and_then(|e| e.get("code")).and_then(Value::as_i64) {
        match code {
            4 | 17 | 32 | 613 | 80000..=80014 => return UpstreamError::RateLimited(message),
            190 | 102 => return UpstreamError::Auth(message),
            100 if message.to_ascii_lowercase().contains("metric") => {
                return UpstreamError::MissingMetric(message);
            }
            _ => {}
        }
    }

    match status {
        401 | 403 => UpstreamError::Auth(message),
        429 => UpstreamError::RateLimited(message),
        _ => UpstreamError::Status {
            status,
            body: truncate(&message, 300),
        },
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Reads a number that may arrive as a JSON number or a numeric string.
pub fn number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
