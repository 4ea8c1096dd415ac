//! Offline dataset adapter.
//!
//! Walks a local clone of the card database laid out as
//! `<root>/data/<Serie>.json` (serie metadata),
//! `<root>/data/<Serie>/<set>.json` (set metadata) and
//! `<root>/data/<Serie>/<set>/<localId>.json` (one card per file).
//! Serie and set context is merged into every card payload so the
//! normalizer sees one self-contained object per card, and the card
//! file's modification time becomes the record's `modifiedOn` so
//! since-date syncs work offline.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde_json::Value;

use super::{RawRecord, SourceAdapter, SourceKind};
use crate::error::SourceError;
use crate::normalize::slugify;

/// Settings for [`DumpSource`].
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Clone root; card data is expected under `<root>/data`.
    pub root: PathBuf,
    /// Language key used to resolve localized name objects.
    pub lang: String,
    /// Set ids or names to restrict the walk to (slug comparison).
    pub sets: Option<Vec<String>>,
}

impl DumpOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lang: "en".to_string(),
            sets: None,
        }
    }
}

/// Offline JSON dataset source.
pub struct DumpSource {
    options: DumpOptions,
}

impl DumpSource {
    pub fn new(options: DumpOptions) -> Self {
        Self { options }
    }

    fn set_selected(&self, set_value: &Value, stem: &str) -> bool {
        let Some(filter) = &self.options.sets else {
            return true;
        };
        let id = set_value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(stem);
        filter
            .iter()
            .any(|wanted| slugify(wanted) == slugify(id) || slugify(wanted) == slugify(stem))
    }

    /// Card file -> payload with localId, set context, language and
    /// modification date merged in.
    fn card_payload(
        &self,
        path: &Path,
        local_id: &str,
        set_value: &Value,
        modified: Option<NaiveDate>,
    ) -> Result<Value, SourceError> {
        let mut card = read_json(path)?;
        let obj = card.as_object_mut().ok_or_else(|| {
            SourceError::Malformed(format!("{}: card file is not a JSON object", path.display()))
        })?;
        obj.insert("localId".to_string(), Value::String(local_id.to_string()));
        obj.insert("set".to_string(), set_value.clone());
        obj.insert(
            "language".to_string(),
            Value::String(self.options.lang.clone()),
        );
        if let Some(date) = modified {
            obj.insert(
                "modifiedOn".to_string(),
                Value::String(date.format("%Y-%m-%d").to_string()),
            );
        }
        Ok(card)
    }
}

impl SourceAdapter for DumpSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Dump
    }

    fn list_records(&mut self, since: Option<NaiveDate>) -> Result<Vec<RawRecord>, SourceError> {
        let data_root = self.options.root.join("data");
        if !data_root.is_dir() {
            return Err(SourceError::Malformed(format!(
                "no data directory under {}",
                self.options.root.display()
            )));
        }

        let series = load_series(&data_root)?;
        let mut records = Vec::new();

        for serie_dir in sorted_dir(&data_root)? {
            if !serie_dir.is_dir() {
                continue;
            }
            let dir_name = match serie_dir.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let serie_value = series.get(&dir_name).cloned();

            for set_file in sorted_dir(&serie_dir)? {
                if !set_file.is_file() || !is_json(&set_file) {
                    continue;
                }
                let set_stem = match file_stem(&set_file) {
                    Some(stem) => stem,
                    None => continue,
                };

                let mut set_value = match read_json(&set_file) {
                    Ok(value) => value,
                    Err(err) => {
                        log::warn!("skipping unreadable set file {}: {}", set_file.display(), err);
                        continue;
                    }
                };
                if let (Some(serie), Some(obj)) = (&serie_value, set_value.as_object_mut()) {
                    obj.entry("serie").or_insert_with(|| serie.clone());
                }

                if !self.set_selected(&set_value, &set_stem) {
                    log::debug!("set {} filtered out", set_stem);
                    continue;
                }

                let card_dir = serie_dir.join(&set_stem);
                if !card_dir.is_dir() {
                    log::debug!("set {} has no card directory", set_stem);
                    continue;
                }

                for card_file in sorted_dir(&card_dir)? {
                    if !card_file.is_file() || !is_json(&card_file) {
                        continue;
                    }
                    let modified = modified_date(&card_file);
                    if let (Some(cutoff), Some(changed)) = (since, modified) {
                        if changed < cutoff {
                            continue;
                        }
                    }
                    let local_id = match file_stem(&card_file) {
                        Some(stem) => stem,
                        None => continue,
                    };
                    let payload =
                        match self.card_payload(&card_file, &local_id, &set_value, modified) {
                            Ok(payload) => payload,
                            Err(err) => {
                                log::warn!("malformed card file: {}", err);
                                // Emit a stub so the run counts the failure
                                // instead of silently dropping the card.
                                serde_json::json!({
                                    "sourcePath": card_file.display().to_string(),
                                })
                            }
                        };
                    records.push(RawRecord::new(SourceKind::Dump, payload));
                }
            }
        }

        log::info!("dataset walk produced {} card records", records.len());
        Ok(records)
    }
}

/// Top-level serie metadata files, keyed by file stem (which is also
/// the serie directory name).
fn load_series(data_root: &Path) -> Result<HashMap<String, Value>, SourceError> {
    let mut series = HashMap::new();
    for path in sorted_dir(data_root)? {
        if !path.is_file() || !is_json(&path) {
            continue;
        }
        let Some(stem) = file_stem(&path) else {
            continue;
        };
        match read_json(&path) {
            Ok(value) => {
                series.insert(stem, value);
            }
            Err(err) => log::warn!("skipping unreadable serie file {}: {}", path.display(), err),
        }
    }
    Ok(series)
}

fn sorted_dir(path: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries)
}

fn read_json(path: &Path) -> Result<Value, SourceError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|err| SourceError::Malformed(format!("{}: {}", path.display(), err)))
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("json")
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

fn modified_date(path: &Path) -> Option<NaiveDate> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(chrono::DateTime::<chrono::Local>::from(modified).date_naive())
}
