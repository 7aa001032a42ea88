use crate::config::ChannelConfig;
use axum::http::StatusCode;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Http,
}

#[derive(Debug, Clone)]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub code: Option<String>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            code: None,
            message,
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }
}

/// POSTs a vendor payload to a channel and returns the decoded JSON body.
///
/// `default_base_url` is used when the channel does not override it.
pub async fn call_channel(
    client: &reqwest::Client,
    channel: &ChannelConfig,
    default_base_url: &str,
    path: &str,
    body: &Value,
    timeout: Duration,
) -> Result<Value, UpstreamCallError> {
    let base = channel
        .base_url
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or(default_base_url);
    let url = join_url(base, path);
    tracing::debug!(channel_id = %channel.id, %url, "calling upstream");

    let resp = client
        .post(url)
        .timeout(timeout)
        .bearer_auth(&channel.api_key)
        .json(body)
        .send()
        .await
        .map_err(|err| UpstreamCallError::new(UpstreamErrorKind::Network, None, err.to_string()))?;
    let status = resp.status();
    let text = resp.text().await.map_err(|err| {
        UpstreamCallError::new(UpstreamErrorKind::Network, Some(status), err.to_string())
    })?;
    if !status.is_success() {
        let code = extract_error_code(&text);
        return Err(UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(status),
            format!("upstream status {}: {}", status, text),
        )
        .with_code(code));
    }
    serde_json::from_str(&text).map_err(|err| {
        UpstreamCallError::new(UpstreamErrorKind::Http, Some(status), err.to_string())
    })
}

/// Joins without doubling a `/v1` segment present on both sides.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") {
        if path == "v1" {
            path = "";
        } else if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

fn extract_error_code(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value
        .get("error")
        .and_then(|v| v.get("code"))
        .and_then(|v| v.as_str())
        .or_else(|| value.get("code").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}
