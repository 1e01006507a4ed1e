//! Page fetching with a fast direct path and a rendering fallback.
//!
//! Product pages are first requested directly with a browser-like header
//! set. When that fails or comes back as an unhydrated script shell, the page
//! is handed to a `Renderer`, which returns markup after client-side content
//! has settled. A rendering failure is not an error for the caller: whatever
//! the fast path produced (possibly nothing) is used instead.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::header::{self, HeaderMap, HeaderValue};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Settings;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] header::InvalidHeaderValue),
    #[error("render failed: {0}")]
    Render(String),
    #[error("no renderer configured (set SPIDER_API_KEY)")]
    RendererUnavailable,
}

/// Produces the markup of a URL once dynamic content has loaded.
pub trait Renderer {
    fn render(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Renderer backed by the spider.cloud API.
pub struct SpiderRenderer {
    spider: Spider,
}

impl SpiderRenderer {
    /// `None` when `SPIDER_API_KEY` is not set or the client can't be built.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("SPIDER_API_KEY").ok()?;
        match Spider::new(Some(api_key)) {
            Ok(spider) => Some(SpiderRenderer { spider }),
            Err(e) => {
                warn!("Failed to create Spider client: {}", e);
                None
            }
        }
    }
}

impl Renderer for SpiderRenderer {
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| FetchError::Render(e.to_string()))?;

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };

        parsed
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FetchError::Render(format!("no content in spider response for {}", url)))
    }
}

/// Minimum spacing between successive requests of one kind.
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Pacer { delay, last: None }
    }

    /// Sleep until `delay` has passed since the previous call.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FetchStats {
    pub fast: usize,
    pub rendered: usize,
    /// Both paths came up short; the fast-path body (maybe empty) was used.
    pub exhausted: usize,
}

/// True when a fast-path body is too small or is a bare script shell.
pub fn looks_incomplete(html: &str, min_len: usize) -> bool {
    html.len() < min_len
        || (html.to_lowercase().contains("javascript") && html.contains("window.__INITIAL_STATE__"))
}

pub struct Fetcher<R> {
    client: reqwest::Client,
    renderer: Option<R>,
    min_page_len: usize,
    pacer: Pacer,
    pub stats: FetchStats,
}

impl<R: Renderer> Fetcher<R> {
    pub fn new(settings: &Settings, renderer: Option<R>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_str(&settings.user_agent)?);
        headers.insert(header::ACCEPT, HeaderValue::from_str(&settings.accept)?);
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_str(&settings.accept_language)?,
        );
        headers.insert(header::REFERER, HeaderValue::from_str(&settings.referer)?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Fetcher {
            client,
            renderer,
            min_page_len: settings.min_page_len,
            pacer: Pacer::new(settings.page_delay()),
            stats: FetchStats::default(),
        })
    }

    /// Shared client (same headers and timeout) for image downloads.
    pub fn client(&self) -> reqwest::Client {
        self.client.clone()
    }

    pub async fn fetch_fast(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }

    /// Fast path, then renderer. Never fails; returns empty markup when
    /// both paths produced nothing.
    pub async fn fetch_page(&mut self, url: &str) -> String {
        self.pacer.wait().await;

        let fast = match self.fetch_fast(url).await {
            Ok(html) if !looks_incomplete(&html, self.min_page_len) => {
                self.stats.fast += 1;
                return html;
            }
            Ok(html) => {
                debug!("Direct fetch of {} looks incomplete ({} bytes)", url, html.len());
                Some(html)
            }
            Err(e) => {
                warn!("Direct fetch failed for {}: {}", url, e);
                None
            }
        };

        match self.render(url).await {
            Ok(html) => {
                self.stats.rendered += 1;
                html
            }
            Err(e) => {
                warn!("Failed to render {}: {}", url, e);
                self.stats.exhausted += 1;
                fast.unwrap_or_default()
            }
        }
    }

    /// Renderer first (listing pages lazy-load their grid), direct fetch
    /// as fallback.
    pub async fn fetch_rendered(&mut self, url: &str) -> Result<String, FetchError> {
        self.pacer.wait().await;
        match self.render(url).await {
            Ok(html) => {
                self.stats.rendered += 1;
                Ok(html)
            }
            Err(e) => {
                warn!("Failed to render {}: {}; trying direct fetch", url, e);
                let html = self.fetch_fast(url).await?;
                self.stats.fast += 1;
                Ok(html)
            }
        }
    }

    async fn render(&self, url: &str) -> Result<String, FetchError> {
        match &self.renderer {
            Some(r) => r.render(url).await,
            None => Err(FetchError::RendererUnavailable),
        }
    }
}
