//! Catalog Sync - Pokemon TCG Catalog Database
//!
//! Ingests card data from a REST API, an offline JSON dump or a
//! storefront scraper into one normalized SQLite catalog, and reports
//! on what the catalog holds.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;

use catalog_sync::collection;
use catalog_sync::db::{open_store, queries};
use catalog_sync::sources::{
    ApiOptions, ApiSource, DumpOptions, DumpSource, ScrapeOptions, ScrapeSource, SourceAdapter,
};
use catalog_sync::sync::{self, SyncOptions};
use catalog_sync::ConflictPolicy;

/// Pokemon TCG catalog sync - pulls card data into SQLite and keeps it current
#[derive(Parser, Debug)]
#[command(name = "catalog_sync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite catalog file
    #[arg(long, global = true, default_value_t = default_db_path())]
    database: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync cards from one source into the catalog
    Sync(SyncArgs),
    /// Merge duplicate owned-copy rows from a CSV file
    MergeCopies(MergeArgs),
    /// Print catalog counts and per-set completeness
    Stats,
    /// Search cards by name
    Find(FindArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceArg {
    Api,
    Dump,
    Scraper,
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Source to ingest from
    #[arg(long, value_enum)]
    source: SourceArg,

    /// Only process records modified on or after this date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,

    /// Walk the full run and report every change without writing
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Set codes (api/dump) or edition ids (scraper) to restrict the run to
    #[arg(long, value_delimiter = ',')]
    sets: Option<Vec<String>>,

    /// Stop at the first failing record instead of counting it
    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    /// On field conflicts keep the stored value instead of the incoming one
    #[arg(long, default_value_t = false)]
    prefer_existing: bool,

    /// Card API base URL
    #[arg(long)]
    api_base: Option<String>,

    /// API key, sent as X-Api-Key
    #[arg(long)]
    api_key: Option<String>,

    /// Cards per API page
    #[arg(long)]
    page_size: Option<u32>,

    /// Pause between requests in milliseconds (api and scraper)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Root directory of the offline dataset clone
    #[arg(long)]
    dump_root: Option<PathBuf>,

    /// Scraped storefront base URL
    #[arg(long)]
    scrape_base: Option<String>,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// CSV of owned copies (headers: set_code, number, variant,
    /// condition, grade, quantity, storage)
    #[arg(long)]
    file: PathBuf,

    /// Write the merged rows into the catalog (default: report only)
    #[arg(long, default_value_t = false)]
    apply: bool,
}

#[derive(Args, Debug)]
struct FindArgs {
    /// Name or name fragment to search for
    query: String,

    /// Maximum number of hits to print
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

/// Returns the default database path: ~/.local/share/catalog_sync/catalog.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("catalog_sync")
        .join("catalog.db")
        .to_string_lossy()
        .to_string()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let db_path = PathBuf::from(&cli.database);

    let code = match cli.command {
        Command::Sync(args) => cmd_sync(&db_path, args),
        Command::MergeCopies(args) => cmd_merge_copies(&db_path, args),
        Command::Stats => cmd_stats(&db_path),
        Command::Find(args) => cmd_find(&db_path, args),
    };
    std::process::exit(code);
}

/// Open the catalog, creating the parent directory on first use.
fn open_catalog(path: &Path) -> Option<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                return None;
            }
            log::info!("Created directory: {}", parent.display());
        }
    }
    match open_store(path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            log::error!("Failed to open catalog at {}: {}", path.display(), e);
            None
        }
    }
}

fn build_adapter(args: &SyncArgs) -> Result<Box<dyn SourceAdapter>, String> {
    match args.source {
        SourceArg::Api => {
            let mut options = ApiOptions::default();
            if let Some(base) = &args.api_base {
                options.base_url = base.clone();
            }
            options.api_key = args.api_key.clone();
            if let Some(size) = args.page_size {
                options.page_size = size;
            }
            if let Some(ms) = args.delay_ms {
                options.delay_ms = ms;
            }
            options.sets = args.sets.clone();
            Ok(Box::new(ApiSource::new(options)))
        }
        SourceArg::Dump => {
            let root = args
                .dump_root
                .as_ref()
                .ok_or("--dump-root is required with --source dump")?;
            let mut options = DumpOptions::new(root);
            options.sets = args.sets.clone();
            Ok(Box::new(DumpSource::new(options)))
        }
        SourceArg::Scraper => {
            let edids = args.sets.clone().unwrap_or_default();
            if edids.is_empty() {
                return Err("--sets <edid,...> is required with --source scraper".to_string());
            }
            let mut options = ScrapeOptions::default();
            if let Some(base) = &args.scrape_base {
                options.base_url = base.clone();
            }
            if let Some(ms) = args.delay_ms {
                options.delay_ms = ms;
            }
            options.edids = edids;
            Ok(Box::new(ScrapeSource::new(options)))
        }
    }
}

fn cmd_sync(db_path: &Path, args: SyncArgs) -> i32 {
    let mut adapter = match build_adapter(&args) {
        Ok(adapter) => adapter,
        Err(msg) => {
            log::error!("{}", msg);
            return 1;
        }
    };

    let Some(mut conn) = open_catalog(db_path) else {
        return 1;
    };
    log::info!("Starting {} sync", adapter.kind());
    log::info!("Catalog: {}", db_path.display());

    let options = SyncOptions {
        since: args.since,
        sets: args.sets.clone(),
        dry_run: args.dry_run,
        fail_fast: args.fail_fast,
        policy: if args.prefer_existing {
            ConflictPolicy::PreferExisting
        } else {
            ConflictPolicy::PreferIncoming
        },
    };

    match sync::run(&mut conn, adapter.as_mut(), &options) {
        Ok(summary) => {
            println!("{}", summary);
            0
        }
        Err(e) => {
            log::error!("Sync failed: {}", e);
            1
        }
    }
}

fn cmd_merge_copies(db_path: &Path, args: MergeArgs) -> i32 {
    let copies = match collection::load_copies(&args.file) {
        Ok(copies) => copies,
        Err(e) => {
            log::error!("Failed to read {}: {}", args.file.display(), e);
            return 1;
        }
    };
    if copies.is_empty() {
        println!("no owned copies in {}", args.file.display());
        return 0;
    }

    let row_count = copies.len();
    let merged = match collection::merge_groups(copies) {
        Ok(merged) => merged,
        Err(e) => {
            log::error!("{}", e);
            return 1;
        }
    };
    println!("{} rows merge into {} groups:", row_count, merged.len());
    for row in &merged {
        println!("  {}", row);
    }
    if !args.apply {
        println!("report only; pass --apply to write the merged rows");
        return 0;
    }

    let Some(mut conn) = open_catalog(db_path) else {
        return 1;
    };
    match collection::apply_merged(&mut conn, &merged) {
        Ok(written) => {
            log::info!("{} merged rows written", written);
            0
        }
        Err(e) => {
            log::error!("Failed to apply merged rows: {}", e);
            1
        }
    }
}

fn cmd_stats(db_path: &Path) -> i32 {
    let Some(conn) = open_catalog(db_path) else {
        return 1;
    };
    let stats = match queries::catalog_stats(&conn) {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("Failed to read catalog stats: {}", e);
            return 1;
        }
    };
    println!("series:       {}", stats.series);
    println!("sets:         {}", stats.sets);
    println!("cards:        {}", stats.cards);
    println!(
        "price points: {} (latest {})",
        stats.price_points,
        stats.latest_price_date.as_deref().unwrap_or("none")
    );
    println!(
        "owned copies: {} rows, {} cards total",
        stats.owned_rows, stats.owned_quantity
    );

    let sets = match queries::set_completeness(&conn) {
        Ok(sets) => sets,
        Err(e) => {
            log::error!("Failed to read set completeness: {}", e);
            return 1;
        }
    };
    if !sets.is_empty() {
        println!();
        for set in sets {
            let total = set
                .total
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!(
                "  {} / {} ({}): {}/{}",
                set.series,
                set.name.as_deref().unwrap_or(&set.code),
                set.code,
                set.have,
                total
            );
        }
    }
    0
}

fn cmd_find(db_path: &Path, args: FindArgs) -> i32 {
    let Some(conn) = open_catalog(db_path) else {
        return 1;
    };
    match queries::find_cards(&conn, &args.query, args.limit) {
        Ok(hits) if hits.is_empty() => {
            println!("no cards match '{}'", args.query);
            0
        }
        Ok(hits) => {
            for hit in hits {
                println!(
                    "{} #{}  {}  [{}]{}",
                    hit.set_code,
                    hit.number,
                    hit.name,
                    hit.set_name.as_deref().unwrap_or("unnamed set"),
                    hit.rarity
                        .map(|r| format!("  {}", r))
                        .unwrap_or_default()
                );
                match queries::latest_prices(&conn, hit.card_id) {
                    Ok(prices) if !prices.is_empty() => {
                        let summary: Vec<String> = prices
                            .iter()
                            .map(|p| {
                                format!(
                                    "{} {:.2} {} ({})",
                                    p.source, p.amount, p.currency, p.collected_on
                                )
                            })
                            .collect();
                        println!("    {}", summary.join(", "));
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("Price lookup failed for card {}: {}", hit.card_id, e),
                }
            }
            0
        }
        Err(e) => {
            log::error!("Search failed: {}", e);
            1
        }
    }
}
