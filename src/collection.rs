//! Owned-copy merging for the user's collection.
//!
//! Copies are eligible for merging only when they share the same
//! (set, number, variant, condition) key. Merging sums quantities; any
//! disagreement on a non-quantity attribute fails the whole merge, so a
//! conflict never leaves a partially merged row behind.

use std::fmt;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

use crate::error::{CollectionError, MergeConflictError};

/// Condition classes for physical copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    NearMint,
    LightlyPlayed,
    ModeratelyPlayed,
    HeavilyPlayed,
    Damaged,
}

impl Condition {
    /// Returns the abbreviation used in CSV files and the database
    /// (e.g. "NM", "LP").
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::NearMint => "NM",
            Condition::LightlyPlayed => "LP",
            Condition::ModeratelyPlayed => "MP",
            Condition::HeavilyPlayed => "HP",
            Condition::Damaged => "DMG",
        }
    }

    /// Parse an abbreviation or full name (e.g. "NM", "near mint") into
    /// a Condition.
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_lowercase().as_str() {
            "nm" | "near mint" => Some(Condition::NearMint),
            "lp" | "lightly played" => Some(Condition::LightlyPlayed),
            "mp" | "moderately played" => Some(Condition::ModeratelyPlayed),
            "hp" | "heavily played" => Some(Condition::HeavilyPlayed),
            "dmg" | "damaged" => Some(Condition::Damaged),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the user's collection: some number of physical copies of
/// a single card in a single variant and condition.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedCopy {
    pub set_code: String,
    pub number: String,
    /// Print variant ("holo", "reverse-holo", ...); empty for the
    /// regular print.
    pub variant: String,
    pub condition: Condition,
    /// Professional grade for slabbed copies. A graded and a raw copy
    /// never merge.
    pub grade: Option<f64>,
    pub quantity: u32,
    /// Where the copies live ("binder 3", "box B"). Informational only,
    /// never part of the merge key.
    pub storage: Option<String>,
}

impl OwnedCopy {
    pub fn new(set_code: impl Into<String>, number: impl Into<String>) -> Self {
        OwnedCopy {
            set_code: set_code.into(),
            number: number.into(),
            variant: String::new(),
            condition: Condition::NearMint,
            grade: None,
            quantity: 1,
            storage: None,
        }
    }

    fn same_key(&self, other: &OwnedCopy) -> bool {
        self.set_code == other.set_code
            && self.number == other.number
            && self.variant == other.variant
            && self.condition == other.condition
    }
}

/// The collapsed form of one merge group.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCopy {
    pub copy: OwnedCopy,
    /// How many input rows collapsed into this one.
    pub source_rows: usize,
}

impl fmt::Display for MergedCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x {} #{}",
            self.copy.quantity, self.copy.set_code, self.copy.number
        )?;
        if !self.copy.variant.is_empty() {
            write!(f, " {}", self.copy.variant)?;
        }
        write!(f, " {}", self.copy.condition)?;
        if let Some(grade) = self.copy.grade {
            write!(f, " grade {}", grade)?;
        }
        write!(
            f,
            " ({} source row{})",
            self.source_rows,
            if self.source_rows == 1 { "" } else { "s" }
        )
    }
}

/// Collapse copies of one merge group into a single row, summing
/// quantities. Merging an empty slice is an error.
///
/// Every copy must agree with the first on each non-quantity attribute;
/// the first disagreement fails the whole merge. Storage is the only
/// exception: a missing storage location fills in from any row that has
/// one.
pub fn merge_copies(copies: &[OwnedCopy]) -> Result<MergedCopy, CollectionError> {
    let Some(first) = copies.first() else {
        return Err(CollectionError::EmptyMerge);
    };
    let mut merged = first.clone();
    for copy in &copies[1..] {
        if copy.set_code != first.set_code {
            return Err(MergeConflictError::new(
                "set",
                first.set_code.clone(),
                copy.set_code.clone(),
            )
            .into());
        }
        if copy.number != first.number {
            return Err(MergeConflictError::new(
                "number",
                first.number.clone(),
                copy.number.clone(),
            )
            .into());
        }
        if copy.variant != first.variant {
            return Err(MergeConflictError::new(
                "variant",
                first.variant.clone(),
                copy.variant.clone(),
            )
            .into());
        }
        if copy.condition != first.condition {
            return Err(MergeConflictError::new(
                "condition",
                first.condition.as_str(),
                copy.condition.as_str(),
            )
            .into());
        }
        if copy.grade != first.grade {
            return Err(MergeConflictError::new(
                "grade",
                format_grade(first.grade),
                format_grade(copy.grade),
            )
            .into());
        }
        merged.quantity += copy.quantity;
        if merged.storage.is_none() {
            merged.storage = copy.storage.clone();
        }
    }
    Ok(MergedCopy {
        copy: merged,
        source_rows: copies.len(),
    })
}

fn format_grade(grade: Option<f64>) -> String {
    match grade {
        Some(value) => value.to_string(),
        None => "ungraded".to_string(),
    }
}

/// Partition copies by merge key (in order of first appearance) and
/// merge each group.
pub fn merge_groups(copies: Vec<OwnedCopy>) -> Result<Vec<MergedCopy>, CollectionError> {
    let mut groups: Vec<Vec<OwnedCopy>> = Vec::new();
    for copy in copies {
        match groups.iter_mut().find(|group| group[0].same_key(&copy)) {
            Some(group) => group.push(copy),
            None => groups.push(vec![copy]),
        }
    }
    groups.iter().map(|group| merge_copies(group)).collect()
}

/// Raw CSV row. Expected headers: set_code, number, variant, condition,
/// grade, quantity, storage. Only set_code, number and quantity are
/// required.
#[derive(Debug, Deserialize)]
struct CsvCopy {
    set_code: String,
    number: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    quantity: String,
    #[serde(default)]
    storage: Option<String>,
}

fn copy_from_row(row: CsvCopy, line: usize) -> Result<OwnedCopy, CollectionError> {
    let quantity: u32 = row.quantity.parse().map_err(|_| CollectionError::Row {
        line,
        reason: format!("bad quantity '{}'", row.quantity),
    })?;
    let condition = match &row.condition {
        None => Condition::NearMint,
        Some(label) => Condition::parse(label).ok_or_else(|| CollectionError::Row {
            line,
            reason: format!("unknown condition '{}'", label),
        })?,
    };
    let grade = match row.grade.as_deref() {
        None => None,
        Some(raw) => Some(raw.parse::<f64>().map_err(|_| CollectionError::Row {
            line,
            reason: format!("bad grade '{}'", raw),
        })?),
    };
    Ok(OwnedCopy {
        set_code: row.set_code.to_lowercase(),
        number: row.number,
        variant: row.variant.unwrap_or_default().to_lowercase(),
        condition,
        grade,
        quantity,
        storage: row.storage,
    })
}

/// Read owned copies from a CSV file.
///
/// The reader is flexible (short rows leave the optional columns empty)
/// and trims every field.
pub fn load_copies<P: AsRef<Path>>(path: P) -> Result<Vec<OwnedCopy>, CollectionError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut copies = Vec::new();
    for (index, result) in reader.deserialize().enumerate() {
        let row: CsvCopy = result?;
        // The header row occupies line 1.
        copies.push(copy_from_row(row, index + 2)?);
    }
    Ok(copies)
}

/// Write merged rows into the store, replacing any previous rows for
/// the same (card, variant, condition).
///
/// Everything is written in one transaction; a row referencing a card
/// the catalog does not have aborts the whole apply.
pub fn apply_merged(conn: &mut Connection, merged: &[MergedCopy]) -> Result<usize, CollectionError> {
    let tx = conn.transaction()?;
    let mut written = 0;
    for row in merged {
        let copy = &row.copy;
        let card_id: i64 = tx
            .query_row(
                "SELECT c.id
                 FROM cards c
                 JOIN sets s ON s.id = c.set_id
                 WHERE s.code = ?1 AND c.number = ?2",
                params![copy.set_code, copy.number],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| CollectionError::UnknownCard {
                set_code: copy.set_code.clone(),
                number: copy.number.clone(),
            })?;
        tx.execute(
            "DELETE FROM owned_copies WHERE card_id = ?1 AND variant = ?2 AND condition = ?3",
            params![card_id, copy.variant, copy.condition.as_str()],
        )?;
        tx.execute(
            "INSERT INTO owned_copies (card_id, variant, condition, grade, quantity, storage)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                card_id,
                copy.variant,
                copy.condition.as_str(),
                copy.grade,
                copy.quantity,
                copy.storage
            ],
        )?;
        written += 1;
    }
    tx.commit()?;
    Ok(written)
}
