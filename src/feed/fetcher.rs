use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::config::FetchSettings;

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Build the HTTP client shared by every fetch.
pub fn build_client(settings: &FetchSettings) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .build()
}

/// Fetch a feed document.
///
/// - Each attempt is bounded by `settings.timeout_secs`
/// - 429, 5xx and truncated bodies are retried with exponential backoff,
///   at most `settings.max_retries` times
/// - Any other non-2xx status fails immediately
/// - Bodies larger than `settings.max_feed_bytes` are rejected
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<Vec<u8>, FetchError> {
    let timeout = Duration::from_secs(settings.timeout_secs);
    let mut retry_count = 0;

    loop {
        let response = tokio::time::timeout(timeout, client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if retry_count >= settings.max_retries {
                return Err(FetchError::RateLimited(settings.max_retries));
            }
            let delay = backoff(settings, retry_count);
            tracing::warn!(
                feed = %url,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(delay).await;
            retry_count += 1;
            continue;
        }

        if status.is_server_error() {
            if retry_count >= settings.max_retries {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }
            let delay = backoff(settings, retry_count);
            tracing::warn!(
                feed = %url,
                status = %status,
                retry = retry_count,
                delay_ms = delay.as_millis() as u64,
                "Server error, retrying after delay"
            );
            tokio::time::sleep(delay).await;
            retry_count += 1;
            continue;
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        match read_limited_bytes(response, settings.max_feed_bytes).await {
            Ok(bytes) => return Ok(bytes),
            Err(FetchError::IncompleteResponse { expected, received }) => {
                if retry_count >= settings.max_retries {
                    return Err(FetchError::IncompleteResponse { expected, received });
                }
                let delay = backoff(settings, retry_count);
                tracing::debug!(
                    feed = %url,
                    expected = expected,
                    received = received,
                    attempt = retry_count + 1,
                    "Retrying incomplete download"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `base * 2^(retry + 1)`: 2s, 4s, 8s with the default 1s base
fn backoff(settings: &FetchSettings, retry_count: u32) -> Duration {
    let factor = 2u64.saturating_pow(retry_count + 1);
    Duration::from_millis(settings.retry_base_delay_ms.saturating_mul(factor))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
