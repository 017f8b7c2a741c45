use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assets::AssetAggregator;
use crate::config::RunConfig;
use crate::model::{AssetFetchOutcome, CandidateRef, FailedCandidate, Record, RunResult, RunTally};
use crate::parser;
use crate::parser::classify::is_non_processable;

pub const NO_HEADLINE: &str = "no headline found";

/// Synchronous, per-URL text retrieval.
#[async_trait]
pub trait MarkupSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Raised by a markup source that can no longer serve any request (revoked key, no credits).
/// This is the only error that stops a run midway.
#[derive(Debug, Error)]
#[error("markup source unusable: {0}")]
pub struct SourceUnusable(pub String);

/// Where a run's files land. Starts provisional; the pipeline asks for relocation once.
pub trait OutputTarget: Send {
    fn asset_dir(&self) -> &Path;
    fn relocate(&mut self, company: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub group_key: String,
    pub inter_item_delay: Duration,
    pub show_progress: bool,
}

impl From<&RunConfig> for PipelineConfig {
    fn from(cfg: &RunConfig) -> Self {
        PipelineConfig {
            group_key: cfg.group_key.clone(),
            inter_item_delay: cfg.inter_item_delay,
            show_progress: cfg.show_progress,
        }
    }
}

enum Outcome {
    Succeeded(Record),
    Skipped(Record),
    Failed(String),
}

/// Sequential fetch → extract → classify over a candidate list, one candidate at a time.
pub struct DetailPipeline<'a> {
    source: &'a dyn MarkupSource,
    assets: Option<&'a AssetAggregator>,
    output: &'a mut dyn OutputTarget,
    cfg: PipelineConfig,
}

impl<'a> DetailPipeline<'a> {
    pub fn new(
        source: &'a dyn MarkupSource,
        assets: Option<&'a AssetAggregator>,
        output: &'a mut dyn OutputTarget,
        cfg: PipelineConfig,
    ) -> Self {
        DetailPipeline {
            source,
            assets,
            output,
            cfg,
        }
    }

    pub async fn run(self, candidates: &[CandidateRef]) -> Result<RunResult> {
        let DetailPipeline {
            source,
            assets,
            output,
            cfg,
        } = self;

        let mut tally = RunTally::start(candidates.len());
        let mut records = Vec::new();
        let mut asset_outcomes: Vec<AssetFetchOutcome> = Vec::new();
        let mut failures = Vec::new();
        let mut relocated = false;

        let pb = progress_bar(candidates.len(), cfg.show_progress);

        for (i, candidate) in candidates.iter().enumerate() {
            let outcome = process_candidate(source, candidate).await?;
            tally.total_processed += 1;

            match outcome {
                Outcome::Failed(reason) => {
                    warn!("Candidate {} failed: {}", candidate.id, reason);
                    tally.failed_details += 1;
                    failures.push(FailedCandidate {
                        id: candidate.id.clone(),
                        url: candidate.url.clone(),
                        reason,
                    });
                }
                Outcome::Skipped(record) => {
                    info!(
                        "Skipping {} ({})",
                        candidate.id,
                        record.format.as_deref().unwrap_or("unknown format")
                    );
                    tally.classified_skipped += 1;
                }
                Outcome::Succeeded(record) => {
                    tally.successful_details += 1;
                    if record.image_url.is_none() {
                        debug!("Record {} has no image", candidate.id);
                    }

                    if !relocated {
                        if let Some(company) = record.company.as_deref() {
                            relocated = true;
                            if let Err(e) = output.relocate(company) {
                                warn!("Could not relocate output for {}: {:#}", company, e);
                            }
                        }
                    }

                    if let Some(aggregator) = assets {
                        let outcomes = aggregator
                            .submit(&record, &cfg.group_key, output.asset_dir())
                            .await;
                        tally.count_assets(&outcomes);
                        asset_outcomes.extend(outcomes);
                    }
                    records.push(record);
                }
            }
            pb.inc(1);

            if i + 1 < candidates.len() && !cfg.inter_item_delay.is_zero() {
                tokio::time::sleep(cfg.inter_item_delay).await;
            }
        }

        pb.finish_and_clear();
        let summary = tally.finish();
        info!(
            "Processed {} candidates ({} ok, {} failed, {} skipped) in {}ms",
            summary.total_processed,
            summary.successful_details,
            summary.failed_details,
            summary.classified_skipped,
            summary.duration_ms
        );

        Ok(RunResult {
            summary,
            records,
            asset_outcomes,
            failures,
        })
    }
}

/// Per-candidate state machine. Only a [`SourceUnusable`] error escapes.
async fn process_candidate(source: &dyn MarkupSource, candidate: &CandidateRef) -> Result<Outcome> {
    let markup = match source.fetch(&candidate.url).await {
        Ok(markup) => markup,
        Err(e) if e.downcast_ref::<SourceUnusable>().is_some() => return Err(e),
        Err(e) => return Ok(Outcome::Failed(format!("{:#}", e))),
    };

    Ok(classify_record(parser::extract(&markup, &candidate.url)))
}

fn classify_record(record: Record) -> Outcome {
    if record.headline.is_none() {
        Outcome::Failed(NO_HEADLINE.to_string())
    } else if is_non_processable(&record) {
        Outcome::Skipped(record)
    } else {
        Outcome::Succeeded(record)
    }
}

/// Outcome label for a record re-extracted from archived markup.
pub fn reclassify(record: Record) -> std::result::Result<Record, &'static str> {
    match classify_record(record) {
        Outcome::Succeeded(record) => Ok(record),
        Outcome::Skipped(_) => Err("skipped"),
        Outcome::Failed(_) => Err(NO_HEADLINE),
    }
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

// ── Tests ──
