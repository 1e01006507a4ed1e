use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

const ENV_PREFIX: &str = "SCRAPER";

const DEFAULT_SITE_ORIGIN: &str = "https://www.sephora.com";
const DEFAULT_LISTING_URL: &str = "https://www.sephora.com/shop/perfume?ref=filters[sizeRefinement]=mini,filters[sizeRefinement]=value,filters[sizeRefinement]=refill";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const DEFAULT_REFERER: &str = "https://www.sephora.com/";
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_PAGE_DELAY_SECS: f64 = 1.0;
const DEFAULT_IMAGE_DELAY_SECS: f64 = 0.2;
const DEFAULT_MIN_PAGE_LEN: usize = 2000;
/// Lowest page delay an override may set.
const MIN_PAGE_DELAY_SECS: f64 = 0.25;

/// Runtime settings shared by every component. Built once in `main` and
/// passed down by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Origin used to absolutize site-relative links and images.
    pub site_origin: String,
    /// Listing page crawled by the page pipeline when no override is given.
    pub listing_url: String,
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    pub referer: String,
    pub request_timeout_secs: u64,
    pub page_delay_secs: f64,
    pub image_delay_secs: f64,
    /// Fast-path responses shorter than this are treated as unrendered.
    pub min_page_len: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            site_origin: DEFAULT_SITE_ORIGIN.to_string(),
            listing_url: DEFAULT_LISTING_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            page_delay_secs: DEFAULT_PAGE_DELAY_SECS,
            image_delay_secs: DEFAULT_IMAGE_DELAY_SECS,
            min_page_len: DEFAULT_MIN_PAGE_LEN,
        }
    }
}

impl Settings {
    /// Defaults overridden by `SCRAPER_*` environment variables,
    /// e.g. `SCRAPER_PAGE_DELAY_SECS=2.5`.
    pub fn load() -> Result<Self> {
        let d = Settings::default();
        let settings = config::Config::builder()
            .set_default("site_origin", d.site_origin)?
            .set_default("listing_url", d.listing_url)?
            .set_default("user_agent", d.user_agent)?
            .set_default("accept", d.accept)?
            .set_default("accept_language", d.accept_language)?
            .set_default("referer", d.referer)?
            .set_default("request_timeout_secs", d.request_timeout_secs as i64)?
            .set_default("page_delay_secs", d.page_delay_secs)?
            .set_default("image_delay_secs", d.image_delay_secs)?
            .set_default("min_page_len", d.min_page_len as i64)?
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize::<Settings>()
            .context("Invalid SCRAPER_* settings")?;
        Ok(settings.with_pacing_floor())
    }

    /// Raise a page delay configured below `MIN_PAGE_DELAY_SECS`.
    fn with_pacing_floor(mut self) -> Self {
        if self.page_delay_secs.is_nan() || self.page_delay_secs < MIN_PAGE_DELAY_SECS {
            warn!(
                "page_delay_secs={} is below the {}s floor; using the floor",
                self.page_delay_secs, MIN_PAGE_DELAY_SECS
            );
            self.page_delay_secs = MIN_PAGE_DELAY_SECS;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.page_delay_secs.max(0.0))
    }

    pub fn image_delay(&self) -> Duration {
        Duration::from_secs_f64(self.image_delay_secs.max(0.0))
    }
}
