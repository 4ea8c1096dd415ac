//! Canonical record model.
//!
//! Source-agnostic in-memory representation of one card and its nested
//! entities, produced by the normalizer and consumed by the upsert
//! engine. Nothing in here knows which source a record came from.
//!
//! Child collections are `Option<Vec<_>>`: `None` means the source does
//! not report that group at all (storage is left untouched), while
//! `Some(vec)` - including an empty vec - means the source is
//! authoritative for the group this run and storage is diffed against it.

use chrono::NaiveDate;

/// Reference to the series a set belongs to. Resolved by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesRef {
    pub name: String,
    pub code: Option<String>,
    pub release_date: Option<NaiveDate>,
}

/// Reference to the set a card belongs to. Natural key is (series, code).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetRef {
    pub series: Option<SeriesRef>,
    pub code: String,
    pub name: Option<String>,
    pub release_date: Option<NaiveDate>,
    /// Declared card count; advisory, used for completeness stats only.
    pub total_cards: Option<i64>,
    pub symbol_url: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AbilityRecord {
    pub name: String,
    /// Ability classification as the source reports it (e.g. "Poke-Power").
    pub kind: Option<String>,
    pub text: Option<String>,
}

/// One entry of an attack's energy cost, in printed order.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEntry {
    pub energy: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttackRecord {
    pub name: String,
    pub cost: Vec<CostEntry>,
    /// Opaque; sources print values like "30+" or "x2".
    pub damage: Option<String>,
    pub text: Option<String>,
}

/// Weakness or resistance: an energy type plus a printed modifier
/// such as "x2" or "-30".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedModifier {
    pub energy: String,
    pub modifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LegalityRecord {
    pub format: String,
    pub status: String,
}

/// Print variant of a card (holo, reverse, first-edition, ...).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantRecord {
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageRecord {
    pub kind: String,
    /// Variant kind this image is scoped to, if any.
    pub variant: Option<String>,
    pub small_url: Option<String>,
    pub large_url: Option<String>,
}

/// One dated price observation. Append-only: the natural key is
/// (card, source, collected_on) and a row is never updated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub source: String,
    pub collected_on: NaiveDate,
    pub amount: f64,
    pub currency: String,
}

/// One card ready for persistence, with everything the source knows
/// about it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalRecord {
    pub name: String,
    /// Opaque string; formats like "4/102" or "SWSH001" round-trip
    /// unchanged.
    pub number: String,
    pub set: SetRef,
    pub hp: Option<i64>,
    pub primary_class: Option<String>,
    pub secondary_class: Option<String>,
    pub rarity: Option<String>,
    pub artist: Option<String>,
    pub rule_text: Option<String>,
    pub footer_text: Option<String>,
    pub language: Option<String>,
    pub published: Option<bool>,
    pub abilities: Option<Vec<AbilityRecord>>,
    pub attacks: Option<Vec<AttackRecord>>,
    pub weaknesses: Option<Vec<TypedModifier>>,
    pub resistances: Option<Vec<TypedModifier>>,
    pub legalities: Option<Vec<LegalityRecord>>,
    pub variants: Option<Vec<VariantRecord>>,
    pub images: Option<Vec<ImageRecord>>,
    /// Always known; an empty vec simply appends nothing.
    pub prices: Vec<PricePoint>,
    /// Source-reported last-modification date, if the source has one.
    /// Records without it are never filtered out by a since-date sync.
    pub modified_on: Option<NaiveDate>,
}

impl CanonicalRecord {
    /// Minimal record with just the identifying fields set.
    pub fn new(name: impl Into<String>, number: impl Into<String>, set_code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
            set: SetRef {
                code: set_code.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
