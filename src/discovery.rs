use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::model::CandidateRef;

/// Detail links on the listing page; group 1 is the ad id.
pub static DETAIL_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/ad-library/detail/(\d+)").unwrap());

/// Ancestors inspected by the video pre-filter.
const MAX_ANCESTOR_DEPTH: usize = 6;
/// Unchanged anchor counts in a row before `until_stable` stops scrolling.
const STABLE_ROUNDS: usize = 2;

/// One ancestor of a listing anchor, nearest first.
#[derive(Debug, Clone, Default)]
pub struct AncestorInfo {
    pub tag: String,
    pub class: String,
    pub aria_label: String,
    pub has_video: bool,
    /// Detail links anywhere below this ancestor.
    pub detail_links: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Anchor {
    pub href: String,
    pub text: String,
    pub ancestors: Vec<AncestorInfo>,
}

/// A live rendered listing page.
#[async_trait]
pub trait RenderSession: Send {
    /// Whether new content needs wall-clock time to load after a scroll. Sessions that
    /// only record a scroll budget for a later render answer `false`.
    fn needs_settle(&self) -> bool {
        true
    }
    async fn trigger_scroll_growth(&mut self) -> Result<()>;
    async fn list_matching_anchors(&mut self, pattern: &Regex) -> Result<Vec<Anchor>>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self, target_url: &str) -> Result<Box<dyn RenderSession>>;
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub max_candidates: usize,
    pub scroll_rounds: usize,
    pub scroll_pause: Duration,
    pub skip_video_listings: bool,
    pub until_stable: bool,
}

impl From<&RunConfig> for DiscoveryConfig {
    fn from(cfg: &RunConfig) -> Self {
        DiscoveryConfig {
            max_candidates: cfg.max_candidates,
            scroll_rounds: cfg.scroll_rounds,
            scroll_pause: cfg.scroll_pause,
            skip_video_listings: cfg.skip_video_listings,
            until_stable: cfg.until_stable,
        }
    }
}

/// Grow the listing by scrolling, then read its detail links once.
pub async fn discover(
    session: &mut dyn RenderSession,
    cfg: &DiscoveryConfig,
) -> Result<Vec<CandidateRef>> {
    if cfg.until_stable {
        scroll_until_stable(session, cfg).await?;
    } else {
        for round in 0..cfg.scroll_rounds {
            session.trigger_scroll_growth().await?;
            debug!("Scroll round {}/{}", round + 1, cfg.scroll_rounds);
            tokio::time::sleep(settle_pause(session, cfg)).await;
        }
    }

    let anchors = session.list_matching_anchors(&DETAIL_LINK_RE).await?;
    let candidates = select_candidates(&anchors, cfg);
    info!(
        "Discovered {} candidates from {} anchors",
        candidates.len(),
        anchors.len()
    );
    Ok(candidates)
}

fn settle_pause(session: &dyn RenderSession, cfg: &DiscoveryConfig) -> Duration {
    if session.needs_settle() {
        cfg.scroll_pause
    } else {
        Duration::ZERO
    }
}

async fn scroll_until_stable(session: &mut dyn RenderSession, cfg: &DiscoveryConfig) -> Result<()> {
    let mut last_count = None;
    let mut unchanged = 0;

    for round in 0..cfg.scroll_rounds {
        session.trigger_scroll_growth().await?;
        tokio::time::sleep(settle_pause(session, cfg)).await;

        let count = session.list_matching_anchors(&DETAIL_LINK_RE).await?.len();
        debug!("Scroll round {}: {} anchors", round + 1, count);
        if last_count == Some(count) {
            unchanged += 1;
            if unchanged >= STABLE_ROUNDS {
                info!("Anchor count stable at {} after {} rounds", count, round + 1);
                break;
            }
        } else {
            unchanged = 0;
        }
        last_count = Some(count);
    }
    Ok(())
}

/// Parse ids, dedupe keeping the first URL per id, optionally drop video cards,
/// then keep the first `max_candidates` in page order.
pub fn select_candidates(anchors: &[Anchor], cfg: &DiscoveryConfig) -> Vec<CandidateRef> {
    let mut seen = HashSet::new();
    let mut skipped_video = 0usize;

    let candidates: Vec<CandidateRef> = anchors
        .iter()
        .filter_map(|a| {
            let id = DETAIL_LINK_RE.captures(&a.href)?.get(1)?.as_str().to_string();
            seen.insert(id.clone()).then_some((id, a))
        })
        .filter(|(_, a)| {
            let drop = cfg.skip_video_listings && looks_like_video(a);
            if drop {
                skipped_video += 1;
            }
            !drop
        })
        .map(|(id, a)| CandidateRef {
            id,
            url: a.href.clone(),
        })
        .take(cfg.max_candidates)
        .collect();

    if skipped_video > 0 {
        info!("Pre-filter dropped {} video listings", skipped_video);
    }
    candidates
}

/// Walk up the card that holds this anchor looking for video markers. The walk stops
/// once an ancestor also contains other detail links.
fn looks_like_video(anchor: &Anchor) -> bool {
    anchor
        .ancestors
        .iter()
        .take(MAX_ANCESTOR_DEPTH)
        .take_while(|a| a.detail_links <= 1)
        .any(|a| {
            a.has_video
                || a.tag.eq_ignore_ascii_case("video")
                || a.class.to_lowercase().contains("video")
                || a.aria_label.to_lowercase().contains("video")
        })
}

// ── Tests ──
