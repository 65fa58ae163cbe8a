//! Connection settings and request plumbing shared by the OpenAI-compatible adapters.

use crate::error::RagError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::fmt;
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";

const BACKOFF_BASE_MS: u64 = 250;
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: Url,
    /// Bound for one call. Streaming calls apply it to the response headers and
    /// then to the gap between body chunks.
    pub timeout: Duration,
    pub max_retries: u32,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RagError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Configuration(
                "OpenAI API key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            base_url: parse_base_url(DEFAULT_OPENAI_BASE_URL)?,
            timeout: Duration::from_secs(20),
            max_retries: 2,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, RagError> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, RagError> {
        self.base_url
            .join(path)
            .map_err(|error| RagError::Configuration(format!("invalid endpoint {path}: {error}")))
    }

    pub(crate) fn client(&self) -> Result<Client, RagError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| RagError::Configuration(format!("http client: {error}")))
    }

    pub(crate) fn streaming_client(&self) -> Result<Client, RagError> {
        Client::builder()
            .connect_timeout(self.timeout)
            .build()
            .map_err(|error| RagError::Configuration(format!("http client: {error}")))
    }
}

/// `Url::join` drops the last path segment unless the base ends with a slash.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, RagError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|error| RagError::Configuration(format!("invalid base url {raw}: {error}")))
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends the request built by `build`, retrying transport failures, 429 and 5xx
/// up to `max_retries` times with exponential backoff. Each attempt must deliver
/// response headers within `timeout`; an attempt that does not is retried too.
pub(crate) async fn send_with_retries<F>(
    label: &str,
    max_retries: u32,
    timeout: Duration,
    build: F,
) -> Result<Response, String>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let failure = match tokio::time::timeout(timeout, build().send()).await {
            Err(_) => format!("{label} timed out after {}ms", timeout.as_millis()),
            Ok(Ok(response)) if response.status().is_success() => return Ok(response),
            Ok(Ok(response)) => {
                let status = response.status();
                let body = tokio::time::timeout(timeout, response.text())
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default();
                let message = format!(
                    "{label} returned {status}: {}",
                    body.chars().take(ERROR_BODY_LIMIT).collect::<String>()
                );
                if !is_retryable(status) {
                    return Err(message);
                }
                message
            }
            Ok(Err(error)) => format!("{label} request failed: {error}"),
        };

        if attempt >= max_retries {
            return Err(failure);
        }
        attempt += 1;
        let delay = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1).min(6));
        warn!(
            attempt,
            max_retries,
            delay_ms = delay.as_millis() as u64,
            "{failure}; retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
