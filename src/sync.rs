//! Sync orchestrator.
//!
//! Drives one run: enumerate raw records from a source adapter,
//! normalize each one, upsert card by card, and count what happened.
//! Bad records are counted and skipped so one malformed card never
//! aborts a run (unless fail-fast is on); a failing source is fatal.
//!
//! Mutating runs hold the store's single-row lease for their duration.
//! Dry runs write nothing, so they don't take the lease and can run
//! alongside a real sync.

use std::fmt;

use chrono::{Local, NaiveDate};
use rusqlite::Connection;

use crate::db::{self, upsert_card, ConflictPolicy, UpsertAction, UpsertOptions};
use crate::error::SyncError;
use crate::normalize::{slugify, Normalizer};
use crate::record::CanonicalRecord;
use crate::sources::SourceAdapter;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Skip records whose source-reported modification date is older.
    /// Records without one are always processed.
    pub since: Option<NaiveDate>,
    /// Restrict the run to these sets, matched as slugs against the
    /// record's set code and set name.
    pub sets: Option<Vec<String>>,
    /// Report every change without writing any.
    pub dry_run: bool,
    /// Stop at the first record that fails instead of counting it.
    pub fail_fast: bool,
    pub policy: ConflictPolicy,
}

/// What one run did, in deterministic one-line form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub source: String,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Records the since-date or set filter dropped after fetching.
    pub skipped: usize,
    pub failed: usize,
    pub prices_appended: usize,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} fetched, {} created, {} updated, {} unchanged, {} skipped, {} failed, {} prices appended{}",
            self.source,
            self.fetched,
            self.created,
            self.updated,
            self.unchanged,
            self.skipped,
            self.failed,
            self.prices_appended,
            if self.dry_run { " (dry run)" } else { "" }
        )
    }
}

/// Run one sync against the store, using today's local date for
/// undated price observations.
pub fn run(
    conn: &mut Connection,
    adapter: &mut dyn SourceAdapter,
    options: &SyncOptions,
) -> Result<RunSummary, SyncError> {
    run_with_date(conn, adapter, options, Local::now().date_naive())
}

/// Same as [`run`] with an explicit collection date, so tests control
/// the clock.
pub fn run_with_date(
    conn: &mut Connection,
    adapter: &mut dyn SourceAdapter,
    options: &SyncOptions,
    today: NaiveDate,
) -> Result<RunSummary, SyncError> {
    let holder = lock_holder();
    let take_lock = !options.dry_run;
    if take_lock {
        db::try_acquire_run_lock(conn, &holder)?;
    }
    let result = run_inner(conn, adapter, options, today);
    if take_lock {
        if let Err(err) = db::release_run_lock(conn, &holder) {
            log::warn!("failed to release run lock: {err}");
        }
    }
    result
}

fn run_inner(
    conn: &mut Connection,
    adapter: &mut dyn SourceAdapter,
    options: &SyncOptions,
    today: NaiveDate,
) -> Result<RunSummary, SyncError> {
    let mut summary = RunSummary {
        source: adapter.kind().to_string(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    let records = adapter.list_records(options.since)?;
    summary.fetched = records.len();
    log::info!("{}: fetched {} records", summary.source, summary.fetched);

    let normalizer = Normalizer::new(today);
    let upsert_options = UpsertOptions {
        policy: options.policy,
        dry_run: options.dry_run,
    };

    for raw in &records {
        let record = match normalizer.normalize(raw) {
            Ok(record) => record,
            Err(err) => {
                summary.failed += 1;
                log::warn!(
                    "{}: skipping {}: {}",
                    summary.source,
                    raw_identity(&raw.payload),
                    err
                );
                if options.fail_fast {
                    return Err(SyncError::Stopped(err.to_string()));
                }
                continue;
            }
        };

        // Adapters restrict what they fetch where they can; this makes
        // the set filter hold no matter what a source hands back.
        if let Some(filter) = &options.sets {
            if !set_selected(&record, filter) {
                summary.skipped += 1;
                continue;
            }
        }

        // Covers sources that report a per-record date; the dump also
        // pre-filters by file mtime.
        if let (Some(since), Some(modified_on)) = (options.since, record.modified_on) {
            if modified_on < since {
                summary.skipped += 1;
                continue;
            }
        }

        match upsert_card(conn, &record, upsert_options) {
            Ok(outcome) => {
                match outcome.action {
                    UpsertAction::Created => summary.created += 1,
                    UpsertAction::Updated => summary.updated += 1,
                    UpsertAction::Unchanged => summary.unchanged += 1,
                }
                summary.prices_appended += outcome.prices_appended;
                if options.dry_run {
                    for change in outcome.changes.iter() {
                        log::info!(
                            "[dry run] {}/{} {}: {}",
                            record.set.code,
                            record.number,
                            record.name,
                            change
                        );
                    }
                }
            }
            Err(err) => {
                summary.failed += 1;
                log::warn!(
                    "{}: failed to store {} #{}: {}",
                    summary.source,
                    record.name,
                    record.number,
                    err
                );
                if options.fail_fast {
                    return Err(SyncError::Stopped(err.to_string()));
                }
            }
        }
    }

    log::info!("{summary}");
    Ok(summary)
}

/// Slug comparison against set code and set name. Scraped sets carry
/// synthesized `lp-{edid}` codes, so a bare edition id also matches.
fn set_selected(record: &CanonicalRecord, filter: &[String]) -> bool {
    let code = slugify(&record.set.code);
    let name = record.set.name.as_deref().map(slugify);
    filter.iter().any(|entry| {
        let entry = slugify(entry);
        entry == code || format!("lp-{entry}") == code || name.as_deref() == Some(entry.as_str())
    })
}

/// Best-effort identity of a payload that failed to normalize, so the
/// skip log names something findable in the source. Malformed stubs
/// carry the file path or card link instead of a name.
fn raw_identity(payload: &serde_json::Value) -> String {
    let field = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|key| payload.get(*key).and_then(serde_json::Value::as_str))
            .unwrap_or("?")
            .to_string()
    };
    format!(
        "{} #{}",
        field(&["name", "sourcePath", "link"]),
        field(&["number", "localId"])
    )
}

fn lock_holder() -> String {
    format!("pid-{}", std::process::id())
}

#[cfg(test)]
#[path = "sync_scenarios.rs"]
mod scenarios;
