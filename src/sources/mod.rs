//! Source adapters: one per catalog source, each producing raw records.
//!
//! An adapter only enumerates source-shaped payloads; all mapping into
//! the canonical model happens in the normalizer. Downstream code never
//! inspects a payload directly, it only routes on [`SourceKind`].

mod api;
mod dump;
mod scraper;

pub use api::{ApiOptions, ApiSource};
pub use dump::{DumpOptions, DumpSource};
pub use scraper::{ScrapeOptions, ScrapeSource};

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::SourceError;

/// Which source a raw record came from. Selects the normalizer mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Remote paginated JSON API
    Api,
    /// Cloned offline JSON dataset on disk
    Dump,
    /// Scraped HTML listing site
    Scraper,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Api => "api",
            SourceKind::Dump => "dump",
            SourceKind::Scraper => "scraper",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(SourceKind::Api),
            "dump" => Ok(SourceKind::Dump),
            "scraper" => Ok(SourceKind::Scraper),
            other => Err(format!(
                "unknown source '{other}' (expected api, dump or scraper)"
            )),
        }
    }
}

/// One record as the source shaped it, tagged with its origin.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub kind: SourceKind,
    pub payload: Value,
}

impl RawRecord {
    pub fn new(kind: SourceKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// A catalog source the orchestrator can drain.
///
/// `list_records` is finite and restartable; ordering is not guaranteed
/// and must not matter to callers. Adapters may pre-filter by `since`
/// where the source supports it, but the orchestrator re-checks the
/// normalized modification date, so adapter-side filtering is purely an
/// optimization.
pub trait SourceAdapter {
    fn kind(&self) -> SourceKind;

    fn list_records(&mut self, since: Option<NaiveDate>) -> Result<Vec<RawRecord>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_round_trips_through_str() {
        for kind in [SourceKind::Api, SourceKind::Dump, SourceKind::Scraper] {
            assert_eq!(kind.as_str().parse::<SourceKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_source_kind_parse_rejects_unknown() {
        assert!("csv".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_source_kind_parse_is_case_insensitive() {
        assert_eq!("API".parse::<SourceKind>(), Ok(SourceKind::Api));
    }
}
