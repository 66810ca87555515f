//! Market-Mirror main entry point
//!
//! Command-line interface for running mirror batches, single-item
//! enrichment, and operational inspection of the store.

use clap::Parser;
use market_mirror::config::load_config_with_hash;
use market_mirror::enrich::{enrich_single, EnrichContext};
use market_mirror::records::{
    SellerReviewCacheEntry, ShippingMetaEntry, SHIPPING_META_KEY, SELLER_REVIEW_CACHE_KEY,
};
use market_mirror::runner::run_mirror;
use market_mirror::session::SessionManager;
use market_mirror::store::{KvStoreExt, Stores};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Market-Mirror: a freshness-aware marketplace mirror
///
/// Crawls a remote marketplace under rate and session constraints,
/// maintaining local snapshots of items, reviews, descriptions, per-market
/// shipping options, and seller profiles.
#[derive(Parser, Debug)]
#[command(name = "market-mirror")]
#[command(version)]
#[command(about = "A freshness-aware marketplace mirror", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Crawl every item in full mode, ignoring staleness metadata
    #[arg(long)]
    force_all: bool,

    /// Validate config and show what would run without crawling
    #[arg(long, conflicts_with_all = ["stats", "item"])]
    dry_run: bool,

    /// Show store statistics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "item"])]
    stats: bool,

    /// Enrich a single item id and exit (external step mode)
    #[arg(long, value_name = "ID")]
    item: Option<String>,

    /// Comma-separated markets for --item (defaults to all configured)
    #[arg(long, value_name = "MARKETS", requires = "item")]
    markets: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.force_all {
        config.crawler.force_all = true;
    }

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }
    if cli.stats {
        return handle_stats(&config);
    }
    if let Some(item_id) = &cli.item {
        return handle_single_item(&config, item_id, cli.markets.as_deref()).await;
    }

    match run_mirror(&config, &config_hash).await {
        Ok(summary) => {
            summary.print();
            Ok(())
        }
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            Err(e.into())
        }
    }
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("market_mirror=info,warn"),
            1 => EnvFilter::new("market_mirror=debug,info"),
            2 => EnvFilter::new("market_mirror=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: validates config and shows what would run
fn handle_dry_run(config: &market_mirror::Config) {
    println!("=== Market-Mirror Dry Run ===\n");

    println!("Site:");
    println!("  Primary host: {}", config.site.primary_host);
    println!("  Alternates:   {}", config.site.alt_hosts.join(", "));
    println!("  Markets:      {}", config.site.markets.join(", "));

    println!("\nCrawler:");
    println!("  Review page size:    {}", config.crawler.review_page_size);
    println!(
        "  Refresh window:      {} days",
        config.crawler.refresh_window_days
    );
    println!(
        "  Review cache age:    {} days",
        config.crawler.seller_review_max_age_days
    );
    println!("  Item concurrency:    {}", config.crawler.item_concurrency);
    println!(
        "  Seller concurrency:  {}",
        config.crawler.seller_concurrency
    );
    println!("  Enrich limit:        {}", config.crawler.enrich_limit);
    println!("  Force all:           {}", config.crawler.force_all);

    println!("\nSession:");
    println!(
        "  Credentials:  {}",
        if config.session.has_credentials() {
            "configured"
        } else {
            "none (anonymous)"
        }
    );
    println!("  Auth cookie:  {}", config.session.auth_cookie);

    println!("\nIndex snapshots ({}):", config.index.len());
    for entry in &config.index {
        println!("  - {} ({})", entry.path, entry.market);
    }

    println!("\nBlacklisted sellers: {}", config.blacklist.sellers.len());
    println!("\n✓ Configuration is valid");
}

/// Handles --stats: prints store counts and exits
fn handle_stats(config: &market_mirror::Config) -> Result<(), Box<dyn std::error::Error>> {
    let stores = Stores::open(
        std::path::Path::new(&config.output.database_path),
        &config.site.markets,
    )?;

    println!("Database: {}\n", config.output.database_path);

    let items = stores.shared.list("items/core/")?.len();
    let sellers = stores.shared.list("sellers/")?.len();
    println!("Item core records:   {}", items);
    println!("Seller profiles:     {}", sellers);

    let shipping_meta: HashMap<String, ShippingMetaEntry> = stores
        .shared
        .get_json(SHIPPING_META_KEY)?
        .unwrap_or_default();
    println!("Shipping meta:       {} entries", shipping_meta.len());
    let full_crawled = shipping_meta
        .values()
        .filter(|e| e.last_full_crawl.is_some())
        .count();
    println!("  with full crawl:   {}", full_crawled);

    let review_cache: HashMap<String, SellerReviewCacheEntry> = stores
        .shared
        .get_json(SELLER_REVIEW_CACHE_KEY)?
        .unwrap_or_default();
    println!("Review cache:        {} entries", review_cache.len());

    for market in &config.site.markets {
        if let Some(store) = stores.market(market) {
            let count = store.list("shipping/")?.len();
            println!("Shipping [{market}]:       {count} records");
        }
    }

    Ok(())
}

/// Handles --item: enriches one item in full mode (external step mode)
async fn handle_single_item(
    config: &market_mirror::Config,
    item_id: &str,
    markets: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let stores = Arc::new(Stores::open(
        std::path::Path::new(&config.output.database_path),
        &config.site.markets,
    )?);
    let endpoints = config.site.endpoints();
    let session = Arc::new(
        SessionManager::establish(&config.session, &endpoints.login_hosts(), &stores.shared)
            .await?,
    );

    let markets: Vec<String> = match markets {
        Some(list) => list.split(',').map(|m| m.trim().to_string()).collect(),
        None => config.site.markets.clone(),
    };

    let shipping_meta: HashMap<String, ShippingMetaEntry> = stores
        .shared
        .get_json(SHIPPING_META_KEY)?
        .unwrap_or_default();
    let shipping_meta = Arc::new(Mutex::new(shipping_meta));

    let ctx = EnrichContext {
        session,
        stores: Arc::clone(&stores),
        endpoints,
        review_page_size: config.crawler.review_page_size,
        shipping_meta: Arc::clone(&shipping_meta),
    };

    let outcome = enrich_single(&ctx, item_id, &markets, chrono::Utc::now()).await;

    // Flush the aggregate update for this one item
    let meta = shipping_meta.lock().unwrap().clone();
    stores.shared.put_json(SHIPPING_META_KEY, &meta)?;

    println!(
        "item {}: reviews {}, description {}, shipping written {:?}, failed {:?}",
        outcome.id,
        if outcome.reviews_ok { "ok" } else { "failed" },
        if outcome.description_ok { "ok" } else { "failed" },
        outcome.shipping_written,
        outcome.shipping_failed
    );

    Ok(())
}
