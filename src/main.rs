mod config;
mod dedup;
mod fetch;
mod images;
mod parser;
mod pipeline;
mod store;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::time::Instant;

use clap::{ArgGroup, Parser, Subcommand};

use config::Settings;
use fetch::{FetchStats, Fetcher, SpiderRenderer};
use pipeline::{ListingJob, ListingSource, PagesJob};

#[derive(Parser)]
#[command(name = "product_scraper", about = "Product listing and detail page scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract products from JSON embedded in a listing page
    #[command(group(ArgGroup::new("source").required(true).args(["input_file", "url"])))]
    Listing {
        /// Saved listing page
        #[arg(long)]
        input_file: Option<PathBuf>,
        /// Listing page to fetch
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value = "listing_products.csv")]
        out: PathBuf,
        #[arg(long, default_value = "images")]
        images_dir: PathBuf,
        /// Download each product's hero image
        #[arg(long)]
        download_images: bool,
    },
    /// Follow product links from a listing and scrape each product page
    Pages {
        /// Listing URL (default: SCRAPER_LISTING_URL or the built-in listing)
        #[arg(long)]
        start_url: Option<String>,
        /// Max product pages to visit
        #[arg(short = 'n', long)]
        max: Option<usize>,
        #[arg(long, default_value = "product_pages.csv")]
        out: PathBuf,
        #[arg(long, default_value = "images")]
        images_dir: PathBuf,
        /// Download every product image
        #[arg(long)]
        download_images: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let mut fetcher = Fetcher::new(&settings, SpiderRenderer::from_env())?;

    let result = match cli.command {
        Commands::Listing {
            input_file,
            url,
            out,
            images_dir,
            download_images,
        } => {
            let source = match (input_file, url) {
                (Some(path), _) => ListingSource::File(path),
                (None, Some(url)) => ListingSource::Url(url),
                (None, None) => anyhow::bail!("one of --input-file or --url is required"),
            };
            let job = ListingJob {
                source,
                out,
                images_dir,
                download_images,
            };
            pipeline::run_listing(&settings, &mut fetcher, &job).await.map(|_| ())
        }
        Commands::Pages {
            start_url,
            max,
            out,
            images_dir,
            download_images,
        } => {
            let job = PagesJob {
                start_url: start_url.unwrap_or_else(|| settings.listing_url.clone()),
                max,
                out,
                images_dir,
                download_images,
            };
            pipeline::run_pages(&settings, &mut fetcher, &job).await.map(|_| ())
        }
    };

    print_fetch_stats(&fetcher.stats);

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_fetch_stats(stats: &FetchStats) {
    let total = stats.fast + stats.rendered + stats.exhausted;
    if total == 0 {
        return;
    }
    println!(
        "Fetched {} pages: {} direct, {} rendered, {} unavailable.",
        total, stats.fast, stats.rendered, stats.exhausted
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
