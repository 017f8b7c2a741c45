use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::config::RunConfig;
use crate::model::{AssetFetchOutcome, AssetResult, CandidateRef, Record, RunResult};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id                       INTEGER PRIMARY KEY,
            target_url               TEXT NOT NULL,
            group_key                TEXT NOT NULL,
            depth                    INTEGER NOT NULL,
            output_dir               TEXT,
            started_at               TEXT,
            finished_at              TEXT,
            duration_ms              INTEGER,
            total_found              INTEGER NOT NULL DEFAULT 0,
            total_processed          INTEGER NOT NULL DEFAULT 0,
            successful_details       INTEGER NOT NULL DEFAULT 0,
            failed_details           INTEGER NOT NULL DEFAULT 0,
            classified_skipped       INTEGER NOT NULL DEFAULT 0,
            successful_asset_fetches INTEGER NOT NULL DEFAULT 0,
            failed_asset_fetches     INTEGER NOT NULL DEFAULT 0,
            created_at               TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS candidates (
            id        INTEGER PRIMARY KEY,
            run_id    INTEGER NOT NULL REFERENCES runs(id),
            ad_id     TEXT NOT NULL,
            url       TEXT NOT NULL,
            position  INTEGER NOT NULL,
            UNIQUE(run_id, ad_id)
        );

        CREATE TABLE IF NOT EXISTS page_markup (
            id         INTEGER PRIMARY KEY,
            run_id     INTEGER NOT NULL REFERENCES runs(id),
            url        TEXT NOT NULL,
            markup     TEXT NOT NULL,
            fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(run_id, url)
        );

        CREATE TABLE IF NOT EXISTS records (
            id             INTEGER PRIMARY KEY,
            run_id         INTEGER NOT NULL REFERENCES runs(id),
            ad_id          TEXT,
            source_url     TEXT NOT NULL,
            headline       TEXT,
            company        TEXT,
            description    TEXT,
            image_url      TEXT,
            image_alt      TEXT,
            target_url     TEXT,
            logo_url       TEXT,
            format         TEXT,
            call_to_action TEXT,
            UNIQUE(run_id, source_url)
        );
        CREATE INDEX IF NOT EXISTS idx_records_company ON records(company);

        CREATE TABLE IF NOT EXISTS failed_candidates (
            id      INTEGER PRIMARY KEY,
            run_id  INTEGER NOT NULL REFERENCES runs(id),
            ad_id   TEXT NOT NULL,
            url     TEXT NOT NULL,
            reason  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_failed_run ON failed_candidates(run_id);

        CREATE TABLE IF NOT EXISTS asset_outcomes (
            id         INTEGER PRIMARY KEY,
            run_id     INTEGER NOT NULL REFERENCES runs(id),
            kind       TEXT NOT NULL CHECK(kind IN ('main','companion')),
            url        TEXT NOT NULL,
            local_name TEXT,
            byte_size  INTEGER,
            error      TEXT
        );
        ",
    )?;
    Ok(())
}

// ── Runs ──

pub fn insert_run(conn: &Connection, cfg: &RunConfig, output_dir: Option<&Path>) -> Result<i64> {
    conn.execute(
        "INSERT INTO runs (target_url, group_key, depth, output_dir) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            cfg.target_url,
            cfg.group_key,
            cfg.depth.level(),
            output_dir.map(|d| d.to_string_lossy().to_string()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: i64,
    pub target_url: String,
    pub group_key: String,
    pub depth: u8,
    pub output_dir: Option<String>,
    pub started_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub total_found: i64,
    pub successful_details: i64,
    pub failed_details: i64,
    pub classified_skipped: i64,
    pub successful_asset_fetches: i64,
    pub failed_asset_fetches: i64,
}

const RUN_COLUMNS: &str = "id, target_url, group_key, depth, output_dir, started_at, duration_ms,
     total_found, successful_details, failed_details, classified_skipped,
     successful_asset_fetches, failed_asset_fetches";

fn run_row(row: &rusqlite::Row) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        target_url: row.get(1)?,
        group_key: row.get(2)?,
        depth: row.get(3)?,
        output_dir: row.get(4)?,
        started_at: row.get(5)?,
        duration_ms: row.get(6)?,
        total_found: row.get(7)?,
        successful_details: row.get(8)?,
        failed_details: row.get(9)?,
        classified_skipped: row.get(10)?,
        successful_asset_fetches: row.get(11)?,
        failed_asset_fetches: row.get(12)?,
    })
}

pub fn fetch_run(conn: &Connection, run_id: i64) -> Result<Option<RunRow>> {
    let sql = format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS);
    let row = conn
        .query_row(&sql, [run_id], run_row)
        .optional()?;
    Ok(row)
}

pub fn list_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let sql = format!("SELECT {} FROM runs ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit as i64], run_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn save_candidates(conn: &Connection, run_id: i64, candidates: &[CandidateRef]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO candidates (run_id, ad_id, url, position) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (i, c) in candidates.iter().enumerate() {
            stmt.execute(rusqlite::params![run_id, c.id, c.url, i as i64])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Store a finished run's summary, records, failures and asset outcomes in one transaction.
pub fn save_result(
    conn: &Connection,
    run_id: i64,
    result: &RunResult,
    output_dir: Option<&Path>,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let s = &result.summary;
        tx.execute(
            "UPDATE runs SET output_dir = COALESCE(?2, output_dir), started_at = ?3, finished_at = ?4,
                duration_ms = ?5, total_found = ?6, total_processed = ?7, successful_details = ?8,
                failed_details = ?9, classified_skipped = ?10, successful_asset_fetches = ?11,
                failed_asset_fetches = ?12
             WHERE id = ?1",
            rusqlite::params![
                run_id,
                output_dir.map(|d| d.to_string_lossy().to_string()),
                s.start_time.to_rfc3339(),
                s.end_time.to_rfc3339(),
                s.duration_ms as i64,
                s.total_found as i64,
                s.total_processed as i64,
                s.successful_details as i64,
                s.failed_details as i64,
                s.classified_skipped as i64,
                s.successful_asset_fetches as i64,
                s.failed_asset_fetches as i64,
            ],
        )?;

        insert_records(&tx, run_id, &result.records)?;

        let mut f_stmt = tx.prepare(
            "INSERT INTO failed_candidates (run_id, ad_id, url, reason) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for f in &result.failures {
            f_stmt.execute(rusqlite::params![run_id, f.id, f.url, f.reason])?;
        }

        insert_outcomes(&tx, run_id, &result.asset_outcomes)?;
    }
    tx.commit()?;
    Ok(())
}

// ── Records ──

fn insert_records(conn: &Connection, run_id: i64, records: &[Record]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO records
         (run_id, ad_id, source_url, headline, company, description, image_url, image_alt,
          target_url, logo_url, format, call_to_action)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?;
    for r in records {
        stmt.execute(rusqlite::params![
            run_id, r.id, r.source_url, r.headline, r.company, r.description, r.image_url,
            r.image_alt, r.target_url, r.logo_url, r.format, r.call_to_action,
        ])?;
    }
    Ok(())
}

pub fn fetch_records(conn: &Connection, run_id: i64) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(
        "SELECT ad_id, source_url, headline, company, description, image_url, image_alt,
                target_url, logo_url, format, call_to_action
         FROM records WHERE run_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([run_id], |row| {
            Ok(Record {
                id: row.get(0)?,
                source_url: row.get(1)?,
                headline: row.get(2)?,
                company: row.get(3)?,
                description: row.get(4)?,
                image_url: row.get(5)?,
                image_alt: row.get(6)?,
                target_url: row.get(7)?,
                logo_url: row.get(8)?,
                format: row.get(9)?,
                call_to_action: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Swap a run's stored records for freshly re-extracted ones.
pub fn replace_records(conn: &Connection, run_id: i64, records: &[Record]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM records WHERE run_id = ?1", [run_id])?;
    insert_records(&tx, run_id, records)?;
    tx.commit()?;
    Ok(())
}

pub fn fetch_failed(conn: &Connection, run_id: i64) -> Result<Vec<CandidateRef>> {
    let mut stmt = conn.prepare(
        "SELECT ad_id, url FROM failed_candidates WHERE run_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([run_id], |row| {
            Ok(CandidateRef {
                id: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Markup archive ──

pub struct ArchivedPage {
    pub run_id: i64,
    pub url: String,
    pub markup: String,
}

pub fn save_pages(conn: &Connection, run_id: i64, pages: &[(String, String)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO page_markup (run_id, url, markup) VALUES (?1, ?2, ?3)",
        )?;
        for (url, markup) in pages {
            count += stmt.execute(rusqlite::params![run_id, url, markup])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_pages(conn: &Connection, run_id: Option<i64>) -> Result<Vec<ArchivedPage>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, url, markup FROM page_markup
         WHERE ?1 IS NULL OR run_id = ?1
         ORDER BY id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![run_id], |row| {
            Ok(ArchivedPage {
                run_id: row.get(0)?,
                url: row.get(1)?,
                markup: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Assets ──

fn insert_outcomes(conn: &Connection, run_id: i64, outcomes: &[AssetFetchOutcome]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO asset_outcomes (run_id, kind, url, local_name, byte_size, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for o in outcomes {
        let (local_name, byte_size, error) = match &o.result {
            AssetResult::Saved { local_name, byte_size } => {
                (Some(local_name.as_str()), Some(*byte_size as i64), None)
            }
            AssetResult::Failed { error } => (None, None, Some(error.as_str())),
        };
        stmt.execute(rusqlite::params![
            run_id,
            o.kind.as_str(),
            o.url,
            local_name,
            byte_size,
            error,
        ])?;
    }
    Ok(())
}

/// Append outcomes from a later bulk fetch and bump the run's asset counters.
pub fn add_asset_outcomes(conn: &Connection, run_id: i64, outcomes: &[AssetFetchOutcome]) -> Result<()> {
    let ok = outcomes.iter().filter(|o| o.is_success()).count() as i64;
    let failed = outcomes.len() as i64 - ok;

    let tx = conn.unchecked_transaction()?;
    insert_outcomes(&tx, run_id, outcomes)?;
    tx.execute(
        "UPDATE runs SET successful_asset_fetches = successful_asset_fetches + ?2,
                         failed_asset_fetches = failed_asset_fetches + ?3
         WHERE id = ?1",
        rusqlite::params![run_id, ok, failed],
    )?;
    tx.commit()?;
    Ok(())
}

// ── Tests ──
