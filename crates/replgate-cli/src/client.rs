//! HTTP client for the `replgate` gateway.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use replgate_core::Query;
use replgate_core::config::ClientSettings;

/// Pause between attempts while retrying.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("HTTP query to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Cannot read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Connection options for [`ReplClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Scheme and host, e.g. `http://localhost`.
    pub url: String,
    pub port: u16,
    /// Timeout of each HTTP request.
    pub timeout: Duration,
    /// Keep retrying failed requests until `retry_timeout` has passed.
    pub retry: bool,
    pub retry_timeout: Duration,
}

impl From<&ClientSettings> for ClientOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            port: settings.port,
            timeout: settings.timeout,
            retry: false,
            retry_timeout: settings.retry_timeout,
        }
    }
}

#[derive(Debug)]
pub struct ReplClient {
    http: reqwest::Client,
    endpoint: String,
    retry: Option<Duration>,
}

impl ReplClient {
    pub fn new(options: &ClientOptions) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(ClientError::Build)?;
        let endpoint = format!("{}:{}/", options.url.trim_end_matches('/'), options.port);
        Ok(Self {
            http,
            endpoint,
            retry: options.retry.then_some(options.retry_timeout),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST `query` and return the response body.
    ///
    /// Failed requests are retried every [`RETRY_INTERVAL`] while the retry
    /// window is open. A non-200 status is never retried.
    pub async fn send(&self, query: &Query) -> Result<String, ClientError> {
        let deadline = self.retry.map(|window| Instant::now() + window);
        let mut attempt = 1u32;
        let response = loop {
            match self.http.post(&self.endpoint).json(query).send().await {
                Ok(response) => break response,
                Err(e) => match deadline {
                    Some(deadline) if Instant::now() < deadline => {
                        debug!(attempt, error = %e, "Query failed, retrying");
                        attempt += 1;
                        tokio::time::sleep(RETRY_INTERVAL).await;
                    }
                    _ => {
                        return Err(ClientError::Request {
                            url: self.endpoint.clone(),
                            source: e,
                        });
                    }
                },
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(ClientError::Body)?;
        if status != reqwest::StatusCode::OK {
            warn!(status = status.as_u16(), "Wrong returned status");
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
