use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered, not yet fetched detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub id: String,
    pub url: String,
}

/// One extracted ad. Built once by the field extractor and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Option<String>,
    pub source_url: String,
    pub headline: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub image_alt: Option<String>,
    pub target_url: Option<String>,
    pub logo_url: Option<String>,
    pub format: Option<String>,
    pub call_to_action: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Main,
    Companion,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Main => "main",
            AssetKind::Companion => "companion",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssetResult {
    #[serde(rename_all = "camelCase")]
    Saved { local_name: String, byte_size: u64 },
    Failed { error: String },
}

/// Outcome of a single attempted asset fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFetchOutcome {
    pub kind: AssetKind,
    pub url: String,
    #[serde(flatten)]
    pub result: AssetResult,
}

impl AssetFetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, AssetResult::Saved { .. })
    }
}

/// A candidate that did not produce a record, with the reason kept for a later retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCandidate {
    pub id: String,
    pub url: String,
    pub reason: String,
}

/// Finalized run counters. Only produced by [`RunTally::finish`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_found: usize,
    pub total_processed: usize,
    pub successful_details: usize,
    pub failed_details: usize,
    pub classified_skipped: usize,
    pub successful_asset_fetches: usize,
    pub failed_asset_fetches: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Mutable counters owned by a running pipeline.
#[derive(Debug)]
pub struct RunTally {
    pub total_found: usize,
    pub total_processed: usize,
    pub successful_details: usize,
    pub failed_details: usize,
    pub classified_skipped: usize,
    pub successful_asset_fetches: usize,
    pub failed_asset_fetches: usize,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunTally {
    pub fn start(total_found: usize) -> Self {
        RunTally {
            total_found,
            total_processed: 0,
            successful_details: 0,
            failed_details: 0,
            classified_skipped: 0,
            successful_asset_fetches: 0,
            failed_asset_fetches: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn count_assets(&mut self, outcomes: &[AssetFetchOutcome]) {
        for outcome in outcomes {
            if outcome.is_success() {
                self.successful_asset_fetches += 1;
            } else {
                self.failed_asset_fetches += 1;
            }
        }
    }

    pub fn finish(self) -> RunSummary {
        RunSummary {
            total_found: self.total_found,
            total_processed: self.total_processed,
            successful_details: self.successful_details,
            failed_details: self.failed_details,
            classified_skipped: self.classified_skipped,
            successful_asset_fetches: self.successful_asset_fetches,
            failed_asset_fetches: self.failed_asset_fetches,
            start_time: self.started_at,
            end_time: Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Everything a run hands to the output surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub summary: RunSummary,
    pub records: Vec<Record>,
    pub asset_outcomes: Vec<AssetFetchOutcome>,
    pub failures: Vec<FailedCandidate>,
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_camel_case() {
        let record = Record {
            id: Some("42".into()),
            source_url: "https://www.linkedin.com/ad-library/detail/42".into(),
            headline: Some("Hello".into()),
            company: None,
            description: None,
            image_url: None,
            image_alt: None,
            target_url: None,
            logo_url: Some("https://media/logo".into()),
            format: None,
            call_to_action: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sourceUrl"], "https://www.linkedin.com/ad-library/detail/42");
        assert_eq!(json["logoUrl"], "https://media/logo");
        assert!(json["company"].is_null());
    }

    #[test]
    fn asset_outcome_shapes() {
        let ok = AssetFetchOutcome {
            kind: AssetKind::Main,
            url: "https://a/img".into(),
            result: AssetResult::Saved {
                local_name: "1_image_5.jpg".into(),
                byte_size: 10,
            },
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["kind"], "main");
        assert_eq!(json["localName"], "1_image_5.jpg");
        assert_eq!(json["byteSize"], 10);

        let failed = AssetFetchOutcome {
            kind: AssetKind::Companion,
            url: "https://a/logo".into(),
            result: AssetResult::Failed {
                error: "HTTP 404".into(),
            },
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["kind"], "companion");
        assert_eq!(json["error"], "HTTP 404");
        assert!(json.get("localName").is_none());
    }

    #[test]
    fn tally_counts_asset_outcomes() {
        let mut tally = RunTally::start(3);
        tally.count_assets(&[
            AssetFetchOutcome {
                kind: AssetKind::Main,
                url: "u1".into(),
                result: AssetResult::Saved {
                    local_name: "a.jpg".into(),
                    byte_size: 1,
                },
            },
            AssetFetchOutcome {
                kind: AssetKind::Companion,
                url: "u2".into(),
                result: AssetResult::Failed { error: "boom".into() },
            },
        ]);
        let summary = tally.finish();
        assert_eq!(summary.total_found, 3);
        assert_eq!(summary.successful_asset_fetches, 1);
        assert_eq!(summary.failed_asset_fetches, 1);
        assert!(summary.end_time >= summary.start_time);
    }
}
