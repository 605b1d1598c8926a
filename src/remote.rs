//! Signed JSON POST with retry, shared by the model and index clients.

use reqwest::Url;
use std::time::Duration;
use tracing::{debug, warn};

use crate::retry::{is_retryable_status, RetryPolicy};
use crate::sigv4::SigV4Signer;

/// Why a remote call ultimately failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// Network error, timeout, or an unreadable response body.
    Transport(String),
    /// Non-success HTTP status (after retries, for retryable ones).
    Status { status: u16, body: String },
}

/// HTTP client bound to one signer and one retry policy.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    signer: SigV4Signer,
    retry: RetryPolicy,
}

impl RemoteClient {
    pub fn new(http: reqwest::Client, signer: SigV4Signer, retry: RetryPolicy) -> Self {
        Self {
            http,
            signer,
            retry,
        }
    }

    /// Build a `reqwest::Client` with the given per-request timeout.
    pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder().timeout(timeout).build()
    }

    /// POST `body` as JSON to `url`, signing every attempt.
    ///
    /// Returns the response body text on a 2xx status.
    pub async fn post_json(&self, url: &Url, body: &[u8]) -> Result<String, RemoteFailure> {
        let mut last_err = RemoteFailure::Transport("no attempt made".to_string());

        for attempt in self.retry.attempts() {
            if attempt > 0 {
                let delay = self.retry.backoff(attempt);
                debug!(%url, attempt, ?delay, "retrying remote call");
                tokio::time::sleep(delay).await;
            }

            let builder = self
                .http
                .post(url.clone())
                .header("content-type", "application/json")
                .header("accept", "application/json")
                .body(body.to_vec());
            let builder = self.signer.apply(builder, "POST", url, body);

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = match response.text().await {
                        Ok(t) => t,
                        Err(e) => {
                            last_err = RemoteFailure::Transport(e.to_string());
                            continue;
                        }
                    };

                    if status.is_success() {
                        return Ok(text);
                    }

                    let failure = RemoteFailure::Status {
                        status: status.as_u16(),
                        body: text.chars().take(500).collect(),
                    };
                    if !is_retryable_status(status.as_u16()) {
                        return Err(failure);
                    }
                    warn!(%url, status = status.as_u16(), attempt, "transient remote error");
                    last_err = failure;
                }
                Err(e) => {
                    warn!(%url, attempt, error = %e, "remote call failed");
                    last_err = RemoteFailure::Transport(e.to_string());
                }
            }
        }

        Err(last_err)
    }
}
