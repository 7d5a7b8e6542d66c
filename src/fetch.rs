use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::warn;
use url::Url;

use crate::config::Config;
use crate::error::FetchError;
use crate::types::FetchedPage;

/// Network seam for the extraction pipeline.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// reqwest-backed fetcher with bounded retries and a response-size ceiling.
///
/// Transport errors and 5xx responses are retried with exponential backoff;
/// 4xx responses and oversized bodies fail immediately.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    request_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    max_body_bytes: usize,
}

enum AttemptError {
    Transient(String),
    Status(StatusCode),
    Fatal(FetchError),
}

impl HttpFetcher {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(&cfg.user_agent)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .redirect(Policy::limited(8))
            .connect_timeout(cfg.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            request_timeout: cfg.request_timeout,
            max_retries: cfg.fetch_retries,
            backoff_base: cfg.backoff_base,
            max_body_bytes: cfg.max_body_bytes,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    async fn attempt(&self, url: &Url) -> Result<FetchedPage, AttemptError> {
        let res = self
            .http
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        let final_url = res.url().clone();
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(len) = res.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(AttemptError::Fatal(FetchError::TooLarge {
                    limit: self.max_body_bytes,
                }));
            }
        }

        // Read in chunks so a missing or lying Content-Length still hits the cap.
        let mut res = res;
        let mut body = Vec::new();
        while let Some(chunk) = res
            .chunk()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(AttemptError::Fatal(FetchError::TooLarge {
                    limit: self.max_body_bytes,
                }));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            content_type,
            body: Bytes::from(body),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let retryable = match self.attempt(url).await {
                Ok(page) => return Ok(page),
                Err(AttemptError::Transient(message)) => {
                    if attempt > self.max_retries {
                        return Err(FetchError::Network {
                            attempts: attempt,
                            message,
                        });
                    }
                    message
                }
                Err(AttemptError::Status(status)) => {
                    if !status.is_server_error() || attempt > self.max_retries {
                        return Err(FetchError::Http {
                            status: status.as_u16(),
                        });
                    }
                    format!("http status {status}")
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
            };

            let delay = self.backoff(attempt);
            warn!(
                url = %url,
                attempt,
                backoff_ms = delay.as_millis() as u64,
                reason = %retryable,
                "retrying fetch"
            );
            sleep(delay).await;
        }
    }
}
