use clap::Parser;

use crate::models::run::{RunMode, RunParams};

/// PLUS product scraper.
/// Exit codes: 0=run finished (item failures included), 1=could not start or finalize
#[derive(Parser, Debug)]
#[command(name = "plus-scraper")]
#[command(about = "Resumable, rate-limited scraper for PLUS product data")]
#[command(version)]
pub struct Cli {
    #[arg(long, help = "Refresh the product sitemap only")]
    pub sitemap: bool,

    #[arg(long, help = "Scrape product details from the cached work list")]
    pub scrape: bool,

    #[arg(long, help = "Refresh the sitemap, then scrape (default)")]
    pub all: bool,

    #[arg(long, value_name = "ID", help = "Fetch and store a single product")]
    pub sku: Option<String>,

    #[arg(long, help = "Retry the products in the dead-letter file")]
    pub retry: bool,

    #[arg(long, help = "Process at most this many products")]
    pub limit: Option<usize>,

    #[arg(long, default_value_t = 0, help = "Skip the first N products of the work list")]
    pub skip: usize,

    #[arg(long, default_value_t = 10, help = "Products saved per storage batch")]
    pub batch_size: usize,

    #[arg(long, help = "Fetch the sitemap even if a cached work list exists")]
    pub force_refresh: bool,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,
}

impl Cli {
    /// `--sku` beats `--retry`, which beats `--sitemap` or `--scrape` on their own.
    pub fn mode(&self) -> RunMode {
        if let Some(sku) = self.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return RunMode::Single(sku.to_string());
        }
        if self.retry {
            return RunMode::RetryDeadLetters;
        }
        match (self.sitemap, self.scrape, self.all) {
            (true, false, false) => RunMode::DiscoverOnly,
            (false, true, false) => RunMode::ScrapeOnly,
            _ => RunMode::Full,
        }
    }

    pub fn run_params(&self) -> RunParams {
        RunParams {
            mode: self.mode(),
            skip: self.skip,
            limit: self.limit,
            batch_size: self.batch_size,
            force_refresh: self.force_refresh,
            ..RunParams::default()
        }
    }
}
