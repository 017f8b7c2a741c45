use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::model::{AssetFetchOutcome, AssetKind, AssetResult, Record};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];
const DEFAULT_EXTENSION: &str = ".jpg";
const JITTER_MS: u64 = 400;
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("timeout fetching {url}")]
    Timeout { url: String },

    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            AssetError::Timeout {
                url: url.to_string(),
            }
        } else {
            AssetError::Network {
                url: url.to_string(),
                source,
            }
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        AssetError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Streams one URL into a local file, returning the bytes written. On error the file at
/// `dest` may be missing or incomplete.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, AssetError>;
}

/// Plain HTTP fetcher with a total per-request budget.
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build asset HTTP client")?;
        Ok(HttpAssetFetcher { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, AssetError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AssetError::from_reqwest(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AssetError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| AssetError::io(dest, e))?;
        let written = stream_to_file(&mut file, response, url, dest).await;
        drop(file);

        if written.is_err() {
            debug!("Removing partial file {}", dest.display());
            let _ = tokio::fs::remove_file(dest).await;
        }
        written
    }
}

async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    dest: &Path,
) -> Result<u64, AssetError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AssetError::from_reqwest(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| AssetError::io(dest, e))?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| AssetError::io(dest, e))?;
    Ok(written)
}

/// Decides which assets a record needs and fetches them. The companion (logo) asset is
/// attempted at most once per group key for the aggregator's lifetime, success or not.
pub struct AssetAggregator {
    fetcher: Arc<dyn AssetFetcher>,
    companions: Mutex<HashSet<String>>,
}

impl AssetAggregator {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        AssetAggregator {
            fetcher,
            companions: Mutex::new(HashSet::new()),
        }
    }

    /// True only for the first caller per group key.
    fn claim_companion(&self, group_key: &str) -> bool {
        let mut claimed = self
            .companions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.insert(group_key.to_string())
    }

    pub async fn submit(&self, record: &Record, group_key: &str, dir: &Path) -> Vec<AssetFetchOutcome> {
        let mut outcomes = Vec::new();

        if let Some(url) = &record.image_url {
            let name = main_asset_name(record.id.as_deref(), url);
            outcomes.push(self.fetch_one(AssetKind::Main, url, dir, name).await);
        }

        if let Some(url) = &record.logo_url {
            if self.claim_companion(group_key) {
                let name = companion_asset_name(group_key, url);
                outcomes.push(self.fetch_one(AssetKind::Companion, url, dir, name).await);
            }
        }

        outcomes
    }

    /// Fetch assets for many records with bounded concurrency and a little jitter per task.
    pub async fn submit_all(
        self: Arc<Self>,
        records: Vec<Record>,
        group_key: &str,
        dir: &Path,
        concurrency: usize,
        show_progress: bool,
    ) -> Vec<AssetFetchOutcome> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let pb = progress_bar(records.len(), show_progress);
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<AssetFetchOutcome>>(concurrency.max(1) * 2);

        for record in records {
            let aggregator = Arc::clone(&self);
            let sem = Arc::clone(&semaphore);
            let tx = tx.clone();
            let group_key = group_key.to_string();
            let dir = dir.to_path_buf();

            tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                let jitter = rand::thread_rng().gen_range(0..=JITTER_MS);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                let outcomes = aggregator.submit(&record, &group_key, &dir).await;
                let _ = tx.send(outcomes).await;
            });
        }
        drop(tx);

        let mut all = Vec::new();
        while let Some(outcomes) = rx.recv().await {
            all.extend(outcomes);
            pb.inc(1);
        }
        pb.finish_and_clear();
        all
    }

    async fn fetch_one(&self, kind: AssetKind, url: &str, dir: &Path, name: String) -> AssetFetchOutcome {
        let dest = dir.join(&name);
        let result = match self.fetch_into(url, dir, &dest).await {
            Ok(byte_size) => {
                info!("Saved {} asset {} ({} bytes)", kind.as_str(), name, byte_size);
                AssetResult::Saved {
                    local_name: name,
                    byte_size,
                }
            }
            Err(e) => {
                warn!("Failed {} asset {}: {}", kind.as_str(), url, e);
                AssetResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        AssetFetchOutcome {
            kind,
            url: url.to_string(),
            result,
        }
    }

    /// Download into `<dest>.part` and rename over `dest` only once the body is complete,
    /// so a failed attempt never touches a file saved earlier under the same name.
    async fn fetch_into(&self, url: &str, dir: &Path, dest: &Path) -> Result<u64, AssetError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AssetError::io(dir, e))?;

        let part = part_path(dest);
        let written = match self.fetcher.fetch_to(url, &part).await {
            Ok(written) => tokio::fs::rename(&part, dest)
                .await
                .map(|_| written)
                .map_err(|e| AssetError::io(dest, e)),
            Err(e) => Err(e),
        };

        if written.is_err() && tokio::fs::try_exists(&part).await.unwrap_or(false) {
            debug!("Removing partial file {}", part.display());
            let _ = tokio::fs::remove_file(&part).await;
        }
        written
    }
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} assets") {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(PART_SUFFIX);
    dest.with_file_name(name)
}

/// `.ext` from the URL path when it is a known image type, `.jpg` otherwise.
pub fn extension_from_url(url: &str) -> String {
    let ext = Url::parse(url).ok().and_then(|parsed| {
        let last = parsed.path().rsplit('/').next()?.to_string();
        let (_, ext) = last.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    });
    match ext {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => format!(".{}", ext),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

pub fn main_asset_name(record_id: Option<&str>, url: &str) -> String {
    format!(
        "{}_image_{}{}",
        record_id.unwrap_or("unknown"),
        chrono::Utc::now().timestamp_millis(),
        extension_from_url(url)
    )
}

pub fn companion_asset_name(group_key: &str, url: &str) -> String {
    format!("{}_logo{}", group_key, extension_from_url(url))
}

// ── Tests ──
