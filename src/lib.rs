//! Catalog Sync - Pokemon TCG Catalog Database
//!
//! Synchronizes card data from several sources (REST API, offline JSON
//! dump, storefront scraper) into one normalized SQLite catalog, keeps
//! a price history per card, and merges duplicate rows of the user's
//! own collection.

pub mod collection;
pub mod db;
pub mod error;
pub mod normalize;
pub mod record;
pub mod sources;
pub mod sync;

pub use collection::{
    apply_merged, load_copies, merge_copies, merge_groups, Condition, MergedCopy, OwnedCopy,
};
pub use db::{
    init_schema, open_memory_store, open_store, upsert_card, ConflictPolicy, UpsertAction,
    UpsertOptions, UpsertOutcome,
};
pub use error::{CollectionError, Result, SyncError};
pub use normalize::{Normalizer, SeriesMapping};
pub use record::CanonicalRecord;
pub use sources::{RawRecord, SourceAdapter, SourceKind};
pub use sync::{run, RunSummary, SyncOptions};
