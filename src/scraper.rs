use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{debug, info, warn};

use crate::discovery::{AncestorInfo, Anchor, RenderSession, SessionProvider};
use crate::pipeline::{MarkupSource, SourceUnusable};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const SPIDER_SCRAPE_URL: &str = "https://api.spider.cloud/scrape";
/// Scroll time requested from the renderer per growth round.
const SCROLL_STEP_MS: u64 = 2000;
const ANCESTOR_LIMIT: usize = 8;
/// Missing or revoked key, exhausted credits.
const UNUSABLE_STATUSES: [u16; 2] = [401, 402];

static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static VIDEO_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("video").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Raw detail-page markup through spider.cloud.
pub struct SpiderMarkupSource {
    spider: Spider,
    timeout: Duration,
}

impl SpiderMarkupSource {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(SpiderMarkupSource { spider, timeout })
    }

    async fn scrape_once(&self, url: &str) -> Result<String> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if UNUSABLE_STATUSES.iter().any(|s| msg.contains(&s.to_string())) {
                    anyhow!(SourceUnusable(msg))
                } else {
                    anyhow!("Spider scrape failed: {}", msg)
                }
            })?;

        page_content(response)
    }
}

#[async_trait]
impl MarkupSource for SpiderMarkupSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        for attempt in 0..=MAX_RETRIES {
            let result = tokio::time::timeout(self.timeout, self.scrape_once(url))
                .await
                .map_err(|_| anyhow!("Timed out after {}s fetching {}", self.timeout.as_secs(), url))?;

            match result {
                Err(e)
                    if attempt < MAX_RETRIES
                        && e.downcast_ref::<SourceUnusable>().is_none()
                        && is_retryable(&e.to_string()) =>
                {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                        url,
                        attempt + 1,
                        MAX_RETRIES,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
        bail!("Retries exhausted for {}", url)
    }
}

fn is_retryable(error: &str) -> bool {
    error.contains("429")
        || error.contains("rate")
        || error.contains("500")
        || error.contains("502")
        || error.contains("503")
}

/// First page's `content` out of a spider response, which may arrive as a JSON string.
fn page_content(value: serde_json::Value) -> Result<String> {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };

    let first = parsed.as_array().and_then(|arr| arr.first());

    if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64()) {
        if UNUSABLE_STATUSES.iter().any(|&s| i64::from(s) == status) {
            return Err(SourceUnusable(format!("upstream returned HTTP {}", status)).into());
        }
        if status >= 400 {
            bail!("Upstream returned HTTP {}", status);
        }
    }

    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("No content in spider response"))
}

/// Keeps a copy of every page fetched through it, for later re-extraction.
pub struct ArchivingSource<S> {
    inner: S,
    pages: Mutex<Vec<(String, String)>>,
}

impl<S: MarkupSource> ArchivingSource<S> {
    pub fn new(inner: S) -> Self {
        ArchivingSource {
            inner,
            pages: Mutex::new(Vec::new()),
        }
    }

    /// `(url, markup)` pairs in fetch order.
    pub fn into_pages(self) -> Vec<(String, String)> {
        self.pages
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<S: MarkupSource> MarkupSource for ArchivingSource<S> {
    async fn fetch(&self, url: &str) -> Result<String> {
        let markup = self.inner.fetch(url).await?;
        self.pages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((url.to_string(), markup.clone()));
        Ok(markup)
    }
}

/// Opens Chrome-rendered listing sessions on spider.cloud.
pub struct SpiderSessionProvider {
    client: reqwest::Client,
    api_key: String,
}

impl SpiderSessionProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build render HTTP client")?;
        Ok(SpiderSessionProvider { client, api_key })
    }
}

#[async_trait]
impl SessionProvider for SpiderSessionProvider {
    async fn open(&self, target_url: &str) -> Result<Box<dyn RenderSession>> {
        let target = Url::parse(target_url).with_context(|| format!("Invalid target URL {}", target_url))?;
        info!("Opened render session for {}", target);
        Ok(Box::new(SpiderRenderSession {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            target,
            scroll_rounds: 0,
            snapshot: None,
            closed: false,
        }))
    }
}

/// The remote renderer is stateless, so scroll growth accumulates a scroll budget
/// that the next anchor read renders with.
pub struct SpiderRenderSession {
    client: reqwest::Client,
    api_key: String,
    target: Url,
    scroll_rounds: u64,
    snapshot: Option<String>,
    closed: bool,
}

impl SpiderRenderSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            bail!("Render session for {} is closed", self.target);
        }
        Ok(())
    }

    async fn render(&self) -> Result<String> {
        let body = serde_json::json!({
            "url": self.target.as_str(),
            "limit": 1,
            "request": "chrome",
            "return_format": "raw",
            "scroll": self.scroll_rounds * SCROLL_STEP_MS,
        });

        let response = self
            .client
            .post(SPIDER_SCRAPE_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Render request failed")?;

        let status = response.status();
        if UNUSABLE_STATUSES.contains(&status.as_u16()) {
            return Err(SourceUnusable(format!("render request returned {}", status)).into());
        }
        let response = response.error_for_status().context("Render request rejected")?;

        let value: serde_json::Value = response.json().await.context("Bad render response")?;
        page_content(value)
    }
}

#[async_trait]
impl RenderSession for SpiderRenderSession {
    fn needs_settle(&self) -> bool {
        false
    }

    async fn trigger_scroll_growth(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.scroll_rounds += 1;
        self.snapshot = None;
        Ok(())
    }

    async fn list_matching_anchors(&mut self, pattern: &Regex) -> Result<Vec<Anchor>> {
        self.ensure_open()?;
        let html = match self.snapshot.take() {
            Some(html) => html,
            None => self.render().await?,
        };
        let anchors = parse_anchors(&html, &self.target, pattern);
        debug!("Read {} matching anchors", anchors.len());
        self.snapshot = Some(html);
        Ok(anchors)
    }

    async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        self.snapshot = None;
        info!("Closed render session for {}", self.target);
        Ok(())
    }
}

/// Anchors whose href matches `pattern`, with absolute URLs and their nearest ancestors.
pub fn parse_anchors(html: &str, base: &Url, pattern: &Regex) -> Vec<Anchor> {
    let doc = Html::parse_document(html);
    let matches = |el: &ElementRef| el.value().attr("href").is_some_and(|h| pattern.is_match(h));

    doc.select(&LINK_SEL)
        .filter(|a| matches(a))
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let href = base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string());
            let text = a.text().collect::<Vec<_>>().join(" ");
            let text = WHITESPACE_RE.replace_all(text.trim(), " ").to_string();

            let ancestors = a
                .ancestors()
                .filter_map(ElementRef::wrap)
                .take(ANCESTOR_LIMIT)
                .map(|el| AncestorInfo {
                    tag: el.value().name().to_string(),
                    class: el.value().attr("class").unwrap_or("").to_string(),
                    aria_label: el.value().attr("aria-label").unwrap_or("").to_string(),
                    has_video: el.select(&VIDEO_SEL).next().is_some(),
                    detail_links: el.select(&LINK_SEL).filter(|l| matches(l)).count(),
                })
                .collect();

            Some(Anchor { href, text, ancestors })
        })
        .collect()
}

// ── Tests ──
