//! Source query adapter
//!
//! Turns a keyword into a lazy, finite stream of image [`Candidate`]s. The
//! stream is not restartable; exhaustion is signaled with `Ok(None)`, never
//! as an error. Retry against the search provider is owned here, not by the
//! caller: once retries are spent the adapter fails with
//! [`Error::SourceUnavailable`].

pub mod extract;

use crate::error::{Error, Result};
use crate::fetch::{backoff_delay, Fetcher};
use crate::manifest::{meta, Candidate};
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Lazy candidate stream. `Ok(None)` is terminal (source exhausted).
pub trait ImageSource: Send {
    fn next(&mut self) -> impl Future<Output = Result<Option<Candidate>>> + Send;
}

/// Configuration for [`WebSearchSource`]
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// SearxNG-compatible search endpoint; queried as
    /// `{endpoint}?q=<keyword>&format=json`
    pub endpoint: String,
    /// Maximum number of result pages to harvest images from
    pub max_pages: usize,
    /// Additional attempts against the search endpoint after the first failure
    pub retries: u32,
    /// Base delay for backoff between search attempts
    pub backoff_base: Duration,
    /// When true, keep only candidates whose URL or alt text contains the
    /// first keyword token (the original crawler's filter)
    pub require_keyword_match: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            endpoint: "https://searx.be/search".to_string(),
            max_pages: 3,
            retries: 2,
            backoff_base: Duration::from_millis(500),
            require_keyword_match: false,
        }
    }
}

/// One search hit: a page expected to contain relevant images
#[derive(Debug, Clone, Deserialize)]
struct SearchHit {
    url: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Candidate source backed by a web search: queries the search endpoint for
/// pages, then harvests `<img>` references from each page lazily.
pub struct WebSearchSource<F: Fetcher> {
    fetcher: Arc<F>,
    config: SearchConfig,
    keyword: String,
    pages: VecDeque<(usize, SearchHit)>,
    buffered: VecDeque<Candidate>,
    seen_urls: HashSet<String>,
    initialized: bool,
}

impl<F: Fetcher> WebSearchSource<F> {
    pub fn new(fetcher: Arc<F>, config: SearchConfig, keyword: impl Into<String>) -> Self {
        WebSearchSource {
            fetcher,
            config,
            keyword: keyword.into(),
            pages: VecDeque::new(),
            buffered: VecDeque::new(),
            seen_urls: HashSet::new(),
            initialized: false,
        }
    }

    /// Query the search endpoint, with the adapter-owned retry policy
    async fn run_search(&self) -> Result<Vec<SearchHit>> {
        let query_url = Url::parse_with_params(
            &self.config.endpoint,
            [("q", self.keyword.as_str()), ("format", "json")],
        )
        .map_err(|e| Error::SourceUnavailable(format!("bad search endpoint: {}", e)))?;

        let mut attempt = 0;
        loop {
            match self.fetcher.fetch_text(query_url.as_str()).await {
                Ok(body) => {
                    let response: SearchResponse = serde_json::from_str(&body)
                        .map_err(|e| Error::SourceUnavailable(format!("bad search response: {}", e)))?;
                    tracing::info!(
                        "search for {:?} returned {} pages",
                        self.keyword,
                        response.results.len()
                    );
                    return Ok(response.results);
                }
                Err(e) if attempt < self.config.retries => {
                    let delay = backoff_delay(self.config.backoff_base, attempt);
                    tracing::debug!(
                        "search attempt {} failed: {} (retrying in {:?})",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(Error::SourceUnavailable(format!(
                        "search endpoint unreachable after {} attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }

    /// Fetch the next result page and buffer its image candidates.
    /// Page-level failures are logged and skipped, they never end the stream.
    async fn harvest_next_page(&mut self) -> bool {
        let (rank, hit) = match self.pages.pop_front() {
            Some(page) => page,
            None => return false,
        };

        let base = match Url::parse(&hit.url) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("skipping unparsable page URL {}: {}", hit.url, e);
                return true;
            }
        };

        let html = match self.fetcher.fetch_text(&hit.url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("failed to fetch page {}: {}", hit.url, e);
                return true;
            }
        };

        let images = extract::extract_images(&html, &base);
        tracing::debug!("page {} yielded {} image tags", hit.url, images.len());

        let keyword_token = self
            .keyword
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        for image in images {
            if self.config.require_keyword_match && !keyword_token.is_empty() {
                let haystack =
                    format!("{} {}", image.url.to_ascii_lowercase(), image.alt.to_ascii_lowercase());
                if !haystack.contains(&keyword_token) {
                    continue;
                }
            }

            if !self.seen_urls.insert(image.url.clone()) {
                continue;
            }

            let mut candidate = Candidate::new(&image.url, &self.keyword)
                .with_meta(meta::ALT, image.alt.as_str())
                .with_meta(meta::RANK, rank as i64)
                .with_meta(meta::PAGE_TITLE, hit.title.as_str());
            if let Some(width) = image.width {
                candidate = candidate.with_meta(meta::WIDTH, width);
            }
            if let Some(height) = image.height {
                candidate = candidate.with_meta(meta::HEIGHT, height);
            }
            let candidate = Candidate {
                referer: Some(hit.url.clone()),
                ..candidate
            };
            self.buffered.push_back(candidate);
        }

        true
    }
}

impl<F: Fetcher> ImageSource for WebSearchSource<F> {
    async fn next(&mut self) -> Result<Option<Candidate>> {
        if !self.initialized {
            let hits = self.run_search().await?;
            self.pages = hits
                .into_iter()
                .take(self.config.max_pages)
                .enumerate()
                .collect();
            self.initialized = true;
        }

        loop {
            if let Some(candidate) = self.buffered.pop_front() {
                return Ok(Some(candidate));
            }
            if !self.harvest_next_page().await {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchedBody, ProbeResult};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fetcher double serving canned text bodies by URL
    struct CannedFetcher {
        bodies: HashMap<String, String>,
        failures: Mutex<u32>,
        fail_first: u32,
    }

    impl CannedFetcher {
        fn new(bodies: Vec<(&str, &str)>) -> Self {
            CannedFetcher {
                bodies: bodies
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                failures: Mutex::new(0),
                fail_first: 0,
            }
        }

        fn failing_first(mut self, count: u32) -> Self {
            self.fail_first = count;
            self
        }
    }

    impl Fetcher for CannedFetcher {
        async fn probe(&self, _url: &str) -> Result<ProbeResult> {
            Ok(ProbeResult::default())
        }

        async fn fetch(&self, _url: &str, _referer: Option<&str>) -> Result<FetchedBody> {
            Err(Error::Other("not used".into()))
        }

        async fn fetch_text(&self, url: &str) -> Result<String> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures < self.fail_first {
                    *failures += 1;
                    return Err(Error::Other("transient".into()));
                }
            }
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Other(format!("no canned body for {}", url)))
        }
    }

    fn search_body(pages: &[&str]) -> String {
        let results: Vec<serde_json::Value> = pages
            .iter()
            .map(|u| serde_json::json!({ "url": u, "title": "page" }))
            .collect();
        serde_json::json!({ "results": results }).to_string()
    }

    fn test_config() -> SearchConfig {
        SearchConfig {
            endpoint: "https://search.test/search".to_string(),
            max_pages: 3,
            retries: 1,
            backoff_base: Duration::from_millis(1),
            require_keyword_match: false,
        }
    }

    #[tokio::test]
    async fn test_streams_candidates_across_pages() {
        let fetcher = Arc::new(CannedFetcher::new(vec![
            (
                "https://search.test/search?q=cats&format=json",
                &search_body(&["https://a.test/", "https://b.test/"]),
            ),
            (
                "https://a.test/",
                r#"<img src="/one.jpg" alt="cat one"><img src="/two.png" alt="cat two">"#,
            ),
            ("https://b.test/", r#"<img src="/three.gif" alt="cat three">"#),
        ]));

        let mut source = WebSearchSource::new(fetcher, test_config(), "cats");

        let mut urls = Vec::new();
        while let Some(candidate) = source.next().await.unwrap() {
            urls.push(candidate.source_url);
        }

        assert_eq!(
            urls,
            vec![
                "https://a.test/one.jpg",
                "https://a.test/two.png",
                "https://b.test/three.gif"
            ]
        );
    }

    #[tokio::test]
    async fn test_candidate_metadata_and_referer() {
        let fetcher = Arc::new(CannedFetcher::new(vec![
            (
                "https://search.test/search?q=cats&format=json",
                &search_body(&["https://a.test/"]),
            ),
            (
                "https://a.test/",
                r#"<img src="/one.jpg" alt="tabby" width="800" height="600">"#,
            ),
        ]));

        let mut source = WebSearchSource::new(fetcher, test_config(), "cats");
        let candidate = source.next().await.unwrap().unwrap();

        assert_eq!(candidate.referer.as_deref(), Some("https://a.test/"));
        assert_eq!(candidate.meta_str(meta::ALT), Some("tabby"));
        assert_eq!(candidate.meta_i64(meta::RANK), Some(0));
        assert_eq!(candidate.meta_i64(meta::WIDTH), Some(800));
        assert_eq!(candidate.meta_i64(meta::HEIGHT), Some(600));
        assert_eq!(candidate.origin_query, "cats");
    }

    #[tokio::test]
    async fn test_candidate_without_declared_dimensions() {
        let fetcher = Arc::new(CannedFetcher::new(vec![
            (
                "https://search.test/search?q=cats&format=json",
                &search_body(&["https://a.test/"]),
            ),
            ("https://a.test/", r#"<img src="/one.jpg" alt="tabby">"#),
        ]));

        let mut source = WebSearchSource::new(fetcher, test_config(), "cats");
        let candidate = source.next().await.unwrap().unwrap();

        assert_eq!(candidate.meta_i64(meta::WIDTH), None);
        assert_eq!(candidate.meta_i64(meta::HEIGHT), None);
    }

    #[tokio::test]
    async fn test_search_retry_then_success() {
        let fetcher = Arc::new(
            CannedFetcher::new(vec![
                (
                    "https://search.test/search?q=cats&format=json",
                    &search_body(&[]),
                ),
            ])
            .failing_first(1),
        );

        let mut source = WebSearchSource::new(fetcher, test_config(), "cats");
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_unavailable_after_retries() {
        let fetcher = Arc::new(CannedFetcher::new(vec![]).failing_first(10));
        let mut source = WebSearchSource::new(fetcher, test_config(), "cats");

        match source.next().await {
            Err(Error::SourceUnavailable(_)) => {}
            other => panic!("expected SourceUnavailable, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_page_failure_is_skipped() {
        // Page a.test has no canned body and fails; b.test still yields
        let fetcher = Arc::new(CannedFetcher::new(vec![
            (
                "https://search.test/search?q=cats&format=json",
                &search_body(&["https://a.test/", "https://b.test/"]),
            ),
            ("https://b.test/", r#"<img src="/late.jpg" alt="cat">"#),
        ]));

        let mut source = WebSearchSource::new(fetcher, test_config(), "cats");
        let candidate = source.next().await.unwrap().unwrap();
        assert_eq!(candidate.source_url, "https://b.test/late.jpg");
        assert!(source.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyword_is_form_encoded_in_search_url() {
        // The canned fetcher only answers the exact encoded URL
        let fetcher = Arc::new(CannedFetcher::new(vec![(
            "https://search.test/search?q=chest+radiograph%26more&format=json",
            &search_body(&[]),
        )]));

        let mut source = WebSearchSource::new(fetcher, test_config(), "chest radiograph&more");
        assert!(source.next().await.unwrap().is_none());
    }
}
