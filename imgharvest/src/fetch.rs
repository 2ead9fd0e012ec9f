//! HTTP fetch layer
//!
//! All network access goes through the [`Fetcher`] trait so the pipeline and
//! source adapter can be exercised against scripted implementations in tests.
//! [`HttpFetcher`] is the reqwest-backed implementation used in production.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Browser-like User-Agent, some hosts reject obvious bots
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP behavior knobs, shared by probes, page fetches, and downloads
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User-Agent header sent on every request
    pub user_agent: String,
    /// Per-attempt timeout for full downloads and page fetches
    pub request_timeout: Duration,
    /// Per-attempt timeout for score-time HEAD probes
    pub probe_timeout: Duration,
    /// Additional attempts after the first failure
    pub retries: u32,
    /// Base delay for exponential backoff between attempts
    pub backoff_base: Duration,
    /// Hard cap on downloaded body size
    pub max_body_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            retries: 2,
            backoff_base: Duration::from_millis(500),
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Headers learned from a HEAD probe
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// A fully downloaded body plus the content type the server declared
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Network access seam
pub trait Fetcher: Send + Sync + 'static {
    /// Issue a lightweight HEAD probe for scoring metadata
    fn probe(&self, url: &str) -> impl Future<Output = Result<ProbeResult>> + Send;

    /// Download a body, sending `referer` when given (hotlink protection)
    fn fetch(
        &self,
        url: &str,
        referer: Option<&str>,
    ) -> impl Future<Output = Result<FetchedBody>> + Send;

    /// Fetch a text resource (search responses, HTML pages)
    fn fetch_text(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Delay before retry `attempt` (0-based): base * 2^attempt
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

/// reqwest-backed [`Fetcher`] with retry and backoff
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Build a fetcher from config. Fails only if the TLS backend cannot
    /// be initialized.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()?;
        Ok(HttpFetcher { client, config })
    }

    /// Fetcher with default config
    pub fn with_defaults() -> Result<Self> {
        Self::new(FetchConfig::default())
    }

    async fn fetch_once(&self, url: &str, referer: Option<&str>) -> Result<FetchedBody> {
        let mut request = self.client.get(url);
        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }

        let response = request.send().await?.error_for_status()?;

        if let Some(len) = response.content_length() {
            if len > self.config.max_body_bytes {
                return Err(Error::Other(format!(
                    "body too large: {} bytes (cap {})",
                    len, self.config.max_body_bytes
                )));
            }
        }

        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
        let bytes = response.bytes().await?;
        if bytes.len() as u64 > self.config.max_body_bytes {
            return Err(Error::Other(format!(
                "body too large: {} bytes (cap {})",
                bytes.len(),
                self.config.max_body_bytes
            )));
        }

        Ok(FetchedBody {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn header_str(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

impl Fetcher for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<ProbeResult> {
        let response = self
            .client
            .head(url)
            .timeout(self.config.probe_timeout)
            .send()
            .await?
            .error_for_status()?;

        let content_type = header_str(&response, reqwest::header::CONTENT_TYPE);
        let content_length = response.content_length();

        Ok(ProbeResult {
            content_type,
            content_length,
        })
    }

    async fn fetch(&self, url: &str, referer: Option<&str>) -> Result<FetchedBody> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, referer).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.config.retries => {
                    let delay = backoff_delay(self.config.backoff_base, attempt);
                    tracing::debug!(
                        "fetch attempt {} failed for {}: {} (retrying in {:?})",
                        attempt + 1,
                        url,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_saturates_on_large_attempt() {
        let base = Duration::from_secs(1);
        // Must not overflow, exact value is irrelevant
        let _ = backoff_delay(base, 1000);
    }

    #[test]
    fn test_default_config() {
        let config = FetchConfig::default();
        assert_eq!(config.retries, 2);
        assert!(config.probe_timeout < config.request_timeout);
        assert!(config.user_agent.contains("Mozilla"));
    }
}
