mod assets;
mod config;
mod db;
mod discovery;
mod model;
mod output;
mod parser;
mod pipeline;
mod scraper;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::assets::{AssetAggregator, AssetFetcher, HttpAssetFetcher};
use crate::config::{Depth, RunConfig};
use crate::discovery::{DiscoveryConfig, RenderSession, SessionProvider};
use crate::model::{CandidateRef, RunResult, RunSummary, RunTally};
use crate::output::RunDirectory;
use crate::pipeline::{DetailPipeline, PipelineConfig};
use crate::scraper::{ArchivingSource, SpiderMarkupSource, SpiderSessionProvider};

#[derive(Parser)]
#[command(name = "adlib_scraper", about = "LinkedIn ad library scraper via spider.cloud")]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, default_value = config::DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover ads on a listing page, extract them and fetch their assets
    Run {
        /// Ad library search URL
        target_url: String,
        /// Max detail pages to process
        #[arg(default_value_t = config::DEFAULT_MAX_CANDIDATES)]
        max_candidates: usize,
        /// 1 = discovery only, 2 = + extraction, 3 = + asset fetch
        #[arg(default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=3))]
        depth: u8,
        /// Group key for shared assets (default: companyIds parameter of the URL)
        #[arg(long)]
        group: Option<String>,
        /// Pause between detail pages
        #[arg(long, default_value_t = config::INTER_ITEM_DELAY_MS)]
        delay_ms: u64,
        /// Root directory for run output
        #[arg(long, default_value = config::OUTPUT_ROOT)]
        out: PathBuf,
        /// Drop listing cards that look like video ads before fetching them
        #[arg(long)]
        skip_video_listings: bool,
        /// Stop scrolling once the number of ads stops growing
        #[arg(long)]
        until_stable: bool,
        /// Scroll rounds on the listing page
        #[arg(long, default_value_t = config::SCROLL_ROUNDS)]
        scroll_rounds: usize,
    },
    /// Re-run the detail pipeline over the failed candidates of an earlier run
    RetryFailed {
        run_id: i64,
    },
    /// Re-extract records from archived markup
    Reextract {
        /// Only this run (default: all runs)
        #[arg(long)]
        run: Option<i64>,
    },
    /// Fetch assets for the stored records of a run
    FetchAssets {
        run_id: i64,
        #[arg(short, long, default_value_t = config::ASSET_CONCURRENCY)]
        concurrency: usize,
    },
    /// Show stored runs
    Stats {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            target_url,
            max_candidates,
            depth,
            group,
            delay_ms,
            out,
            skip_video_listings,
            until_stable,
            scroll_rounds,
        } => {
            let mut cfg = RunConfig::new(&target_url, max_candidates, Depth::from_level(depth)?);
            if let Some(group) = group {
                cfg.group_key = group;
            }
            cfg.inter_item_delay = Duration::from_millis(delay_ms);
            cfg.output_root = out;
            cfg.skip_video_listings = skip_video_listings;
            cfg.until_stable = until_stable;
            cfg.scroll_rounds = scroll_rounds;

            let api_key = config::api_key()?;
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;

            let provider = SpiderSessionProvider::new(api_key.clone(), cfg.markup_timeout)?;
            let mut session = provider
                .open(&cfg.target_url)
                .await
                .context("Failed to acquire render session")?;

            let outcome = discover_and_process(&conn, &cfg, session.as_mut(), &api_key).await;
            if let Err(e) = session.close().await {
                warn!("Failed to close render session: {:#}", e);
            }
            outcome
        }
        Commands::RetryFailed { run_id } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let Some(run) = db::fetch_run(&conn, run_id)? else {
                bail!("Run {} not found", run_id);
            };
            let failed = db::fetch_failed(&conn, run_id)?;
            if failed.is_empty() {
                println!("Run {} has no failed candidates.", run_id);
                return Ok(());
            }

            let depth = Depth::from_level(run.depth)?.max(Depth::Extract);
            let mut cfg = RunConfig::new(&run.target_url, failed.len(), depth);
            cfg.group_key = run.group_key.clone();
            let api_key = config::api_key()?;

            let mut dir = match run.output_dir.as_deref() {
                Some(existing) => RunDirectory::existing(Path::new(existing), &cfg.group_key)?,
                None => RunDirectory::create(&cfg.output_root, &cfg.group_key)?,
            };
            let new_run = db::insert_run(&conn, &cfg, Some(dir.path()))?;
            db::save_candidates(&conn, new_run, &failed)?;
            println!("Retrying {} failed candidates of run {} as run {}...", failed.len(), run_id, new_run);
            process(&conn, &cfg, new_run, &failed, &mut dir, &api_key).await
        }
        Commands::Reextract { run } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let pages = db::fetch_pages(&conn, run)?;
            if pages.is_empty() {
                println!("No archived markup. Run 'run' with depth 2 or 3 first.");
                return Ok(());
            }
            println!("Re-extracting {} pages...", pages.len());
            let counts = reextract_pages(&conn, &pages)?;
            counts.print();
            Ok(())
        }
        Commands::FetchAssets { run_id, concurrency } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let Some(run) = db::fetch_run(&conn, run_id)? else {
                bail!("Run {} not found", run_id);
            };
            let records = db::fetch_records(&conn, run_id)?;
            if records.is_empty() {
                println!("Run {} has no records.", run_id);
                return Ok(());
            }
            let dir = match run.output_dir.as_deref() {
                Some(existing) => RunDirectory::existing(Path::new(existing), &run.group_key)?,
                None => RunDirectory::create(Path::new(config::OUTPUT_ROOT), &run.group_key)?,
            };

            let fetcher: Arc<dyn AssetFetcher> =
                Arc::new(HttpAssetFetcher::new(Duration::from_secs(config::ASSET_TIMEOUT_SECS))?);
            let aggregator = Arc::new(AssetAggregator::new(fetcher));
            println!("Fetching assets for {} records (concurrency {})...", records.len(), concurrency);
            let outcomes = aggregator
                .submit_all(records, &run.group_key, dir.path(), concurrency, true)
                .await;
            db::add_asset_outcomes(&conn, run_id, &outcomes)?;

            let ok = outcomes.iter().filter(|o| o.is_success()).count();
            println!(
                "Assets: {} saved, {} failed -> {}",
                ok,
                outcomes.len() - ok,
                dir.path().display()
            );
            Ok(())
        }
        Commands::Stats { limit } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let runs = db::list_runs(&conn, limit)?;
            if runs.is_empty() {
                println!("No runs yet.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<12} | {:>5} | {:>5} | {:>4} | {:>6} | {:>4} | {:>9} | {:<19} | {:<30}",
                "Run", "Group", "Depth", "Found", "OK", "Failed", "Skip", "Assets", "Started", "Output"
            );
            println!("{}", "-".repeat(118));

            for r in &runs {
                let started = r
                    .started_at
                    .as_deref()
                    .map(|s| s.chars().take(19).collect::<String>().replace('T', " "))
                    .unwrap_or_else(|| "-".into());
                let output = r
                    .output_dir
                    .as_deref()
                    .map(|d| truncate(d, 30))
                    .unwrap_or_else(|| "-".into());
                let assets = format!("{}/{}", r.successful_asset_fetches, r.failed_asset_fetches);
                println!(
                    "{:>4} | {:<12} | {:>5} | {:>5} | {:>4} | {:>6} | {:>4} | {:>9} | {:<19} | {:<30}",
                    r.id,
                    truncate(&r.group_key, 12),
                    r.depth,
                    r.total_found,
                    r.successful_details,
                    r.failed_details,
                    r.classified_skipped,
                    assets,
                    started,
                    output
                );
            }

            let total_ms: i64 = runs.iter().filter_map(|r| r.duration_ms).sum();
            println!(
                "\n{} runs | {} total run time",
                runs.len(),
                format_duration(Duration::from_millis(total_ms.max(0) as u64))
            );
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Everything between acquiring and releasing the render session.
async fn discover_and_process(
    conn: &rusqlite::Connection,
    cfg: &RunConfig,
    session: &mut dyn RenderSession,
    api_key: &str,
) -> anyhow::Result<()> {
    let mut dir = RunDirectory::create(&cfg.output_root, &cfg.group_key)?;
    let run_id = db::insert_run(conn, cfg, Some(dir.path()))?;
    info!("Run {} for group {} -> {}", run_id, cfg.group_key, dir.path().display());

    let candidates = discovery::discover(session, &DiscoveryConfig::from(cfg)).await?;
    db::save_candidates(conn, run_id, &candidates)?;

    if cfg.depth == Depth::Discover {
        for c in &candidates {
            println!("{}  {}", c.id, c.url);
        }
        let result = RunResult {
            summary: RunTally::start(candidates.len()).finish(),
            records: Vec::new(),
            asset_outcomes: Vec::new(),
            failures: Vec::new(),
        };
        return finish(conn, run_id, &result, &dir);
    }

    process(conn, cfg, run_id, &candidates, &mut dir, api_key).await
}

/// Detail pipeline over `candidates`, then persist and report.
async fn process(
    conn: &rusqlite::Connection,
    cfg: &RunConfig,
    run_id: i64,
    candidates: &[CandidateRef],
    dir: &mut RunDirectory,
    api_key: &str,
) -> anyhow::Result<()> {
    let source = ArchivingSource::new(SpiderMarkupSource::new(api_key.to_string(), cfg.markup_timeout)?);
    let aggregator = if cfg.depth >= Depth::Assets {
        let fetcher: Arc<dyn AssetFetcher> = Arc::new(HttpAssetFetcher::new(cfg.asset_timeout)?);
        Some(AssetAggregator::new(fetcher))
    } else {
        None
    };

    let outcome = DetailPipeline::new(&source, aggregator.as_ref(), &mut *dir, PipelineConfig::from(cfg))
        .run(candidates)
        .await;

    // markup fetched before an abort is still worth keeping
    let archived = db::save_pages(conn, run_id, &source.into_pages())?;
    info!("Archived {} pages", archived);

    let result = outcome?;
    finish(conn, run_id, &result, dir)
}

fn finish(
    conn: &rusqlite::Connection,
    run_id: i64,
    result: &RunResult,
    dir: &RunDirectory,
) -> anyhow::Result<()> {
    let path = dir.write_result(result)?;
    db::save_result(conn, run_id, result, Some(dir.path()))?;
    print_summary(run_id, &result.summary);
    println!("Result: {}", path.display());
    Ok(())
}

fn print_summary(run_id: i64, s: &RunSummary) {
    println!("Run {}", run_id);
    println!("Found:     {}", s.total_found);
    println!("Processed: {}", s.total_processed);
    println!("OK:        {}", s.successful_details);
    println!("Failed:    {}", s.failed_details);
    println!("Skipped:   {}", s.classified_skipped);
    println!(
        "Assets:    {} saved, {} failed",
        s.successful_asset_fetches, s.failed_asset_fetches
    );
    println!("Took:      {}", format_duration(Duration::from_millis(s.duration_ms)));
}

struct ReextractCounts {
    pages: usize,
    records: usize,
    skipped: usize,
    failed: usize,
    runs: usize,
}

impl ReextractCounts {
    fn print(&self) {
        println!(
            "Re-extracted {} pages across {} runs: {} records, {} skipped, {} without headline.",
            self.pages, self.runs, self.records, self.skipped, self.failed,
        );
    }
}

fn reextract_pages(
    conn: &rusqlite::Connection,
    pages: &[db::ArchivedPage],
) -> anyhow::Result<ReextractCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(pages.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }

    let mut counts = ReextractCounts {
        pages: pages.len(),
        records: 0,
        skipped: 0,
        failed: 0,
        runs: 0,
    };
    let mut by_run: BTreeMap<i64, Vec<model::Record>> = BTreeMap::new();

    for chunk in pages.chunks(500) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|page| {
                let record = parser::extract(&page.markup, &page.url);
                (page.run_id, pipeline::reclassify(record))
            })
            .collect();

        for (run_id, outcome) in results {
            let records = by_run.entry(run_id).or_default();
            match outcome {
                Ok(record) => {
                    counts.records += 1;
                    records.push(record);
                }
                Err(pipeline::NO_HEADLINE) => counts.failed += 1,
                Err(_) => counts.skipped += 1,
            }
        }
        pb.inc(chunk.len() as u64);
    }

    for (run_id, records) in &by_run {
        db::replace_records(conn, *run_id, records)?;
    }
    counts.runs = by_run.len();

    pb.finish_and_clear();
    Ok(counts)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
