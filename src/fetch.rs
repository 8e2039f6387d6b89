use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use tracing::warn;

use crate::settings::Settings;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// HTTP client shared by the network stages: user agent and optional
/// session cookie on every request, exponential backoff on rate limits and
/// server errors.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    cookie: Option<String>,
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl Client {
    pub fn new(settings: &Settings) -> Result<Client> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build http client")?;
        Ok(Client {
            http,
            cookie: settings.cookie.clone(),
        })
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.get(url).await?;
        response
            .text()
            .await
            .with_context(|| format!("failed to read body of {}", url))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {}", url))?;
        Ok(bytes.to_vec())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let mut request = self.http.get(url);
            if let Some(cookie) = &self.cookie {
                request = request.header(COOKIE, cookie);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if !retryable(status) {
                        bail!("GET {} returned {}", url, status);
                    }
                    if attempt >= MAX_RETRIES {
                        bail!("GET {} returned {} after {} attempts", url, status, attempt + 1);
                    }
                    warn!("GET {} returned {}, retrying", url, status);
                }
                Err(err) => {
                    if attempt >= MAX_RETRIES {
                        return Err(err).with_context(|| format!("GET {} failed", url));
                    }
                    warn!("GET {} failed ({}), retrying", url, err);
                }
            }

            let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable(StatusCode::BAD_GATEWAY));
        assert!(retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!retryable(StatusCode::NOT_FOUND));
        assert!(!retryable(StatusCode::FORBIDDEN));
    }
}
