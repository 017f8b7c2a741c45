use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::model::RunResult;
use crate::pipeline::OutputTarget;

const RESULT_FILE: &str = "result.json";
const SLUG_MAX: usize = 60;

/// On-disk home of one run: `<root>/<group>_<timestamp>` until the company is known,
/// then `<root>/<company-slug>_<group>`.
#[derive(Debug)]
pub struct RunDirectory {
    root: PathBuf,
    dir: PathBuf,
    group_key: String,
    relocated: bool,
}

impl RunDirectory {
    pub fn create(root: &Path, group_key: &str) -> Result<Self> {
        let name = format!("{}_{}", slugify(group_key), Utc::now().format("%Y%m%d_%H%M%S"));
        let dir = root.join(name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory {}", dir.display()))?;
        Ok(RunDirectory {
            root: root.to_path_buf(),
            dir,
            group_key: group_key.to_string(),
            relocated: false,
        })
    }

    /// Reuse an existing directory, e.g. one recorded by an earlier run.
    pub fn existing(dir: &Path, group_key: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to open run directory {}", dir.display()))?;
        Ok(RunDirectory {
            root: dir.parent().map(Path::to_path_buf).unwrap_or_default(),
            dir: dir.to_path_buf(),
            group_key: group_key.to_string(),
            relocated: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write_result(&self, result: &RunResult) -> Result<PathBuf> {
        let path = self.dir.join(RESULT_FILE);
        let json = serde_json::to_string_pretty(result)?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

impl OutputTarget for RunDirectory {
    fn asset_dir(&self) -> &Path {
        &self.dir
    }

    fn relocate(&mut self, company: &str) -> Result<()> {
        if self.relocated {
            return Ok(());
        }
        self.relocated = true;

        let base = format!("{}_{}", slugify(company), slugify(&self.group_key));
        let mut target = self.root.join(&base);
        if target.exists() {
            target = self
                .root
                .join(format!("{}_{}", base, Utc::now().format("%Y%m%d_%H%M%S")));
        }

        std::fs::rename(&self.dir, &target).with_context(|| {
            format!("Failed to move {} to {}", self.dir.display(), target.display())
        })?;
        info!("Run directory is now {}", target.display());
        self.dir = target;
        Ok(())
    }
}

/// Lowercase ASCII words joined by `-`.
pub fn slugify(s: &str) -> String {
    let mut slug = String::new();
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug: String = slug.trim_end_matches('-').chars().take(SLUG_MAX).collect();
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunTally;

    #[test]
    fn slugs() {
        assert_eq!(slugify("Northwind Analytics, Inc."), "northwind-analytics-inc");
        assert_eq!(slugify("  --Ünïcode  "), "n-code");
        assert_eq!(slugify("!!!"), "unnamed");
        assert_eq!(slugify("89771"), "89771");
    }

    #[test]
    fn relocates_once_and_keeps_files() {
        let root = tempfile::tempdir().unwrap();
        let mut run = RunDirectory::create(root.path(), "89771").unwrap();
        assert!(run.path().file_name().unwrap().to_string_lossy().starts_with("89771_"));
        std::fs::write(run.path().join("asset.jpg"), b"x").unwrap();

        run.relocate("Northwind Analytics").unwrap();
        let moved = root.path().join("northwind-analytics_89771");
        assert_eq!(run.path(), moved.as_path());
        assert!(moved.join("asset.jpg").exists());

        run.relocate("Someone Else").unwrap();
        assert_eq!(run.path(), moved.as_path());
    }

    #[test]
    fn relocation_avoids_existing_directory() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("acme_1")).unwrap();
        let mut run = RunDirectory::create(root.path(), "1").unwrap();
        run.relocate("Acme").unwrap();
        let name = run.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("acme_1_"));
    }

    #[test]
    fn writes_result_json() {
        let root = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(root.path(), "g").unwrap();
        let result = RunResult {
            summary: RunTally::start(0).finish(),
            records: vec![],
            asset_outcomes: vec![],
            failures: vec![],
        };
        let path = run.write_result(&result).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["summary"]["totalFound"], 0);
        assert!(json["assetOutcomes"].as_array().unwrap().is_empty());
    }
}
