use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::Settings;
use crate::dedup::{Admission, Deduplicator};
use crate::fetch::{Fetcher, Renderer};
use crate::images::{resolve_url, ImageCache};
use crate::parser::listing::ListingRecord;
use crate::parser::{links, product_page, ListingExtractor};
use crate::store::{PageRecord, ResumableStore};

pub enum ListingSource {
    File(PathBuf),
    Url(String),
}

pub struct ListingJob {
    pub source: ListingSource,
    pub out: PathBuf,
    pub images_dir: PathBuf,
    pub download_images: bool,
}

pub struct PagesJob {
    pub start_url: String,
    pub max: Option<usize>,
    pub out: PathBuf,
    pub images_dir: PathBuf,
    pub download_images: bool,
}

#[derive(Debug, Default)]
pub struct ListingSummary {
    pub objects: usize,
    pub malformed: usize,
    pub product_like: usize,
    pub kept: usize,
    pub already_persisted: usize,
    pub duplicates: usize,
    pub no_key: usize,
    pub write_failures: usize,
    pub images: ImageCounts,
}

#[derive(Debug, Default)]
pub struct PagesSummary {
    pub links: usize,
    pub kept: usize,
    pub already_persisted: usize,
    pub duplicates: usize,
    pub write_failures: usize,
    pub images: ImageCounts,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCounts {
    pub downloaded: usize,
    pub cached: usize,
    pub failed: usize,
}

impl ImageCounts {
    fn from_cache(cache: Option<&ImageCache>) -> Self {
        cache
            .map(|c| ImageCounts {
                downloaded: c.downloaded,
                cached: c.cached,
                failed: c.failed,
            })
            .unwrap_or_default()
    }

    fn print(&self) {
        println!(
            "Images: {} downloaded, {} already cached, {} failed.",
            self.downloaded, self.cached, self.failed
        );
    }
}

impl ListingSummary {
    pub fn print(&self) {
        println!(
            "Scanned {} JSON objects ({} malformed spans discarded); {} product-like.",
            self.objects, self.malformed, self.product_like
        );
        println!(
            "Saved {} new rows; skipped {} already persisted, {} duplicates, {} without identity.",
            self.kept, self.already_persisted, self.duplicates, self.no_key
        );
        if self.write_failures > 0 {
            println!("Failed to write {} rows.", self.write_failures);
        }
    }
}

impl PagesSummary {
    pub fn print(&self) {
        println!(
            "Saved {} of {} product pages; skipped {} already persisted, {} duplicates.",
            self.kept, self.links, self.already_persisted, self.duplicates
        );
        if self.write_failures > 0 {
            println!("Failed to write {} rows.", self.write_failures);
        }
    }
}

/// Listing pipeline: markup → scan → filter → normalize → dedup → append.
pub async fn run_listing<R: Renderer>(
    settings: &Settings,
    fetcher: &mut Fetcher<R>,
    job: &ListingJob,
) -> Result<ListingSummary> {
    let html = match &job.source {
        ListingSource::File(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        ListingSource::Url(url) => {
            println!("Fetching {} ...", url);
            fetcher.fetch_page(url).await
        }
    };

    let mut store = ResumableStore::<ListingRecord>::open(&job.out)?;
    let mut images = if job.download_images {
        Some(ImageCache::new(&job.images_dir, fetcher.client(), settings)?)
    } else {
        None
    };
    let mut dedup = Deduplicator::new();
    let mut summary = ListingSummary::default();

    println!("Scanning {} bytes of markup for JSON objects...", html.len());
    let mut extractor = ListingExtractor::new(&html);
    for mut record in extractor.by_ref() {
        let key = record.dedup_key().to_string();
        if dedup.admit(&key) != Admission::Kept {
            continue;
        }
        // Admitted keys are new to this run, so a hit here came from a
        // previous run.
        if store.contains(&key) {
            summary.already_persisted += 1;
            continue;
        }

        if let Some(cache) = images.as_mut() {
            if let Some(url) = resolve_url(&settings.site_origin, &record.hero_image) {
                if let Some(path) = cache.fetch(&url).await {
                    record.local_hero_image = path.display().to_string();
                }
            }
        }

        match store.append(&record) {
            Ok(()) => summary.kept += 1,
            Err(e) => {
                warn!("{:#}", e);
                summary.write_failures += 1;
            }
        }
    }

    summary.objects = extractor.scan.objects;
    summary.malformed = extractor.scan.malformed;
    summary.product_like = extractor.product_like;
    summary.duplicates = dedup.duplicates;
    summary.no_key = dedup.no_key;
    summary.images = ImageCounts::from_cache(images.as_ref());

    info!("{} rows now in {}", store.len(), job.out.display());
    summary.print();
    if job.download_images {
        summary.images.print();
    }
    Ok(summary)
}

/// Page pipeline: rendered listing → product links → one row per page.
pub async fn run_pages<R: Renderer>(
    settings: &Settings,
    fetcher: &mut Fetcher<R>,
    job: &PagesJob,
) -> Result<PagesSummary> {
    println!("Loading listing {} ...", job.start_url);
    let mut product_urls = match fetcher.fetch_rendered(&job.start_url).await {
        Ok(html) => links::product_links(&html, &settings.site_origin),
        Err(e) => {
            warn!("Failed to load listing {}: {}", job.start_url, e);
            Vec::new()
        }
    };
    println!("Found {} product links on the listing page.", product_urls.len());

    if let Some(max) = job.max {
        product_urls.truncate(max);
    }
    process_product_pages(settings, fetcher, &product_urls, job).await
}

pub async fn process_product_pages<R: Renderer>(
    settings: &Settings,
    fetcher: &mut Fetcher<R>,
    product_urls: &[String],
    job: &PagesJob,
) -> Result<PagesSummary> {
    let mut store = ResumableStore::<PageRecord>::open(&job.out)?;
    let mut images = if job.download_images {
        Some(ImageCache::new(&job.images_dir, fetcher.client(), settings)?)
    } else {
        None
    };
    let mut dedup = Deduplicator::new();
    let mut summary = PagesSummary {
        links: product_urls.len(),
        ..Default::default()
    };

    let pb = ProgressBar::new(product_urls.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for url in product_urls {
        pb.inc(1);
        if dedup.admit(url) != Admission::Kept {
            continue;
        }
        if store.contains(url) {
            summary.already_persisted += 1;
            continue;
        }

        let html = fetcher.fetch_page(url).await;
        let page = product_page::parse(&html, url);

        let mut downloaded = Vec::new();
        if let Some(cache) = images.as_mut() {
            for img in &page.image_urls {
                let Some(abs) = resolve_url(url, img) else { continue };
                if let Some(path) = cache.fetch(&abs).await {
                    downloaded.push(path.display().to_string());
                }
            }
        }

        let record = PageRecord {
            product_page_url: url.clone(),
            product_name: page.name.unwrap_or_default(),
            price: page.price.unwrap_or_default(),
            star_rating: page.star_rating,
            review_count: page.review_count,
            image_urls: page.image_urls,
            downloaded_images: downloaded,
        };
        match store.append(&record) {
            Ok(()) => summary.kept += 1,
            Err(e) => {
                warn!("{:#}", e);
                summary.write_failures += 1;
            }
        }
    }
    pb.finish_and_clear();

    summary.duplicates = dedup.duplicates;
    summary.images = ImageCounts::from_cache(images.as_ref());

    info!("{} rows now in {}", store.len(), job.out.display());
    summary.print();
    if job.download_images {
        summary.images.print();
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::fetch::tests::{fast_settings, FakeRenderer};
    use crate::test_support::TestServer;

    const LISTING: &str = r#"<html><script>
        window.__CONFIG__ = {"site":"shop"};
        var grid = [
          {"productId":"P1","brandName":"Acme","displayName":"Rose","heroImage":"/img/p1.jpg","currentSku":{"listPrice":"$10"}},
          {"productId":"P2","brandName":"Acme","displayName":"Oud","isNew":false},
          {"productId":"P1","brandName":"Acme","displayName":"Rose (again)"},
          {"brandName":""},
          {"targetUrl":"/product/musk-P3","displayName":"Musk"}
        ];
        var bad = {unquoted: true};
    </script></html>"#;

    fn listing_job(dir: &std::path::Path, source: ListingSource, images: bool) -> ListingJob {
        ListingJob {
            source,
            out: dir.join("listing.csv"),
            images_dir: dir.join("images"),
            download_images: images,
        }
    }

    fn pages_job(dir: &std::path::Path) -> PagesJob {
        PagesJob {
            start_url: String::new(),
            max: None,
            out: dir.join("pages.csv"),
            images_dir: dir.join("images"),
            download_images: true,
        }
    }

    fn fetcher() -> Fetcher<FakeRenderer> {
        Fetcher::new(&fast_settings(), None).unwrap()
    }

    fn product_html(name: &str, image: &str) -> Vec<u8> {
        format!(
            r#"<html><head><script type="application/ld+json">
            {{"@type":"Product","name":"{}","image":"{}","offers":{{"price":"20.00"}},
              "aggregateRating":{{"ratingValue":4.5,"reviewCount":12}}}}
            </script></head><body>{}</body></html>"#,
            name,
            image,
            "padding ".repeat(20)
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn listing_run_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("listing.html");
        fs::write(&input, LISTING).unwrap();
        let job = listing_job(dir.path(), ListingSource::File(input), false);
        let settings = fast_settings();

        let first = run_listing(&settings, &mut fetcher(), &job).await.unwrap();
        assert_eq!(first.objects, 6);
        assert_eq!(first.malformed, 1);
        assert_eq!(first.product_like, 5);
        assert_eq!(first.kept, 3);
        assert_eq!(first.duplicates, 1);
        assert_eq!(first.no_key, 1);

        let second = run_listing(&settings, &mut fetcher(), &job).await.unwrap();
        assert_eq!(second.already_persisted, 3);
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.no_key, 1);
        assert_eq!(second.kept, 0);

        let text = fs::read_to_string(&job.out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("productId,displayName,"));
        assert_eq!(lines[1], "P1,Rose,Acme,,,,$10,/img/p1.jpg,,,,");
        assert_eq!(lines[2], "P2,Oud,Acme,,,False,,,,,,");
        assert!(lines[3].starts_with(",Musk,,"));
    }

    #[tokio::test]
    async fn listing_downloads_relative_hero_images() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![("/img/p1.jpg", 200, b"IMG1".to_vec())]).await;
        let input = dir.path().join("listing.html");
        fs::write(&input, LISTING).unwrap();
        let job = listing_job(dir.path(), ListingSource::File(input), true);
        let settings = Settings {
            site_origin: server.url(""),
            ..fast_settings()
        };

        let summary = run_listing(&settings, &mut fetcher(), &job).await.unwrap();
        assert_eq!(summary.images.downloaded, 1);
        assert_eq!(fs::read(dir.path().join("images").join("p1.jpg")).unwrap(), b"IMG1");

        let text = fs::read_to_string(&job.out).unwrap();
        let p1 = text.lines().nth(1).unwrap();
        assert!(p1.ends_with("p1.jpg"), "{}", p1);
    }

    #[tokio::test]
    async fn listing_from_url() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![("/shop", 200, LISTING.as_bytes().to_vec())]).await;
        let job = listing_job(dir.path(), ListingSource::Url(server.url("/shop")), false);

        let summary = run_listing(&fast_settings(), &mut fetcher(), &job).await.unwrap();
        assert_eq!(summary.kept, 3);
    }

    #[tokio::test]
    async fn missing_input_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let job = listing_job(dir.path(), ListingSource::File(dir.path().join("nope.html")), false);
        assert!(run_listing(&fast_settings(), &mut fetcher(), &job).await.is_err());
    }

    #[tokio::test]
    async fn product_pages_skip_persisted_urls() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![
            ("/product/a", 200, product_html("Alpha", "/img/a.jpg")),
            ("/product/b", 200, product_html("Beta", "/img/b.jpg")),
            ("/img/b.jpg", 200, b"B".to_vec()),
        ])
        .await;
        let (a, b) = (server.url("/product/a"), server.url("/product/b"));
        let job = pages_job(dir.path());
        fs::write(&job.out, format!("{}\n{},Alpha,$1,,,,\n", page_headers(), a)).unwrap();

        let settings = fast_settings();
        let urls = vec![a.clone(), b.clone(), b.clone()];
        let summary = process_product_pages(&settings, &mut fetcher(), &urls, &job)
            .await
            .unwrap();
        assert_eq!(summary.already_persisted, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.kept, 1);
        assert_eq!(server.hits("/product/a"), 0);
        assert_eq!(server.hits("/product/b"), 1);
        assert_eq!(server.hits("/img/b.jpg"), 1);

        let again = process_product_pages(&settings, &mut fetcher(), &urls, &job)
            .await
            .unwrap();
        assert_eq!(again.already_persisted, 2);
        assert_eq!(again.duplicates, 1);
        assert_eq!(server.hits("/product/b"), 1);

        let text = fs::read_to_string(&job.out).unwrap();
        let row = text.lines().nth(2).unwrap();
        let img = dir.path().join("images").join("b.jpg");
        assert_eq!(
            row,
            format!(
                "{},Beta,20.00,4.5,12,/img/b.jpg,{}",
                b,
                img.display()
            )
        );
    }

    #[tokio::test]
    async fn unreachable_page_is_still_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let server = TestServer::start(vec![]).await;
        let url = server.url("/product/gone");
        let job = PagesJob {
            download_images: false,
            ..pages_job(dir.path())
        };

        let summary = process_product_pages(&fast_settings(), &mut fetcher(), &[url.clone()], &job)
            .await
            .unwrap();
        assert_eq!(summary.kept, 1);
        let text = fs::read_to_string(&job.out).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), format!("{},,,,,,", url));
    }

    #[tokio::test]
    async fn pages_run_discovers_links_and_applies_cap() {
        let dir = tempfile::tempdir().unwrap();
        let listing = r#"<a href="/product/a?x=1">A</a><a href="/product/b">B</a>"#;
        let server = TestServer::start(vec![
            ("/shop/all", 200, listing.as_bytes().to_vec()),
            ("/product/a", 200, product_html("Alpha", "https://cdn.invalid/a.jpg")),
        ])
        .await;
        let settings = Settings {
            site_origin: server.url(""),
            ..fast_settings()
        };
        let job = PagesJob {
            start_url: server.url("/shop/all"),
            max: Some(1),
            download_images: false,
            ..pages_job(dir.path())
        };

        let mut f = Fetcher::new(&settings, Some(FakeRenderer::new(None))).unwrap();
        let summary = run_pages(&settings, &mut f, &job).await.unwrap();
        assert_eq!(summary.links, 1);
        assert_eq!(summary.kept, 1);
        assert_eq!(server.hits("/product/b"), 0);
        let text = fs::read_to_string(&job.out).unwrap();
        assert!(text.contains("Alpha"));
    }

    fn page_headers() -> String {
        use crate::store::Row;
        PageRecord::HEADERS.join(",")
    }
}
