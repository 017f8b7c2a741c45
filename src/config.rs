use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Result};
use regex::Regex;

pub const DEFAULT_MAX_CANDIDATES: usize = 10;
pub const INTER_ITEM_DELAY_MS: u64 = 2000;
pub const SCROLL_ROUNDS: usize = 5;
pub const SCROLL_PAUSE_MS: u64 = 2000;
pub const ASSET_TIMEOUT_SECS: u64 = 30;
pub const MARKUP_TIMEOUT_SECS: u64 = 60;
pub const ASSET_CONCURRENCY: usize = 4;
pub const OUTPUT_ROOT: &str = "data/runs";
pub const DB_PATH: &str = "data/adlib.sqlite";
pub const API_KEY_VAR: &str = "SPIDER_API_KEY";

static GROUP_PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]companyIds?=(\d+)").unwrap());

/// How far a run goes: discovery only, + extraction, + asset fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Depth {
    Discover = 1,
    Extract = 2,
    Assets = 3,
}

impl Depth {
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            1 => Ok(Depth::Discover),
            2 => Ok(Depth::Extract),
            3 => Ok(Depth::Assets),
            other => bail!("depth level must be 1, 2 or 3 (got {})", other),
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

/// Everything a run needs, fixed before the first request goes out.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target_url: String,
    pub group_key: String,
    pub max_candidates: usize,
    pub depth: Depth,
    pub inter_item_delay: Duration,
    pub scroll_rounds: usize,
    pub scroll_pause: Duration,
    pub skip_video_listings: bool,
    pub until_stable: bool,
    pub asset_timeout: Duration,
    pub markup_timeout: Duration,
    pub output_root: PathBuf,
    pub show_progress: bool,
}

impl RunConfig {
    pub fn new(target_url: &str, max_candidates: usize, depth: Depth) -> Self {
        RunConfig {
            target_url: target_url.to_string(),
            group_key: group_key_from_url(target_url).unwrap_or_else(|| "unknown".to_string()),
            max_candidates,
            depth,
            inter_item_delay: Duration::from_millis(INTER_ITEM_DELAY_MS),
            scroll_rounds: SCROLL_ROUNDS,
            scroll_pause: Duration::from_millis(SCROLL_PAUSE_MS),
            skip_video_listings: false,
            until_stable: false,
            asset_timeout: Duration::from_secs(ASSET_TIMEOUT_SECS),
            markup_timeout: Duration::from_secs(MARKUP_TIMEOUT_SECS),
            output_root: PathBuf::from(OUTPUT_ROOT),
            show_progress: true,
        }
    }
}

/// `companyIds=89771` style query parameter of a listing URL.
pub fn group_key_from_url(url: &str) -> Option<String> {
    GROUP_PARAM_RE.captures(url).map(|c| c[1].to_string())
}

pub fn api_key() -> Result<String> {
    match std::env::var(API_KEY_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable must be set", API_KEY_VAR),
    }
}

// ── Tests ──
