//! End-to-end sync flows over canned source payloads.

use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::db::{open_memory_store, ConflictPolicy};
use crate::error::SourceError;
use crate::sources::{RawRecord, SourceAdapter, SourceKind};
use crate::sync::{run_with_date, SyncOptions};

struct CannedSource {
    kind: SourceKind,
    records: Vec<RawRecord>,
}

impl CannedSource {
    fn new(kind: SourceKind, payloads: Vec<Value>) -> Self {
        Self {
            kind,
            records: payloads
                .into_iter()
                .map(|payload| RawRecord::new(kind, payload))
                .collect(),
        }
    }
}

impl SourceAdapter for CannedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn list_records(&mut self, _since: Option<NaiveDate>) -> Result<Vec<RawRecord>, SourceError> {
        Ok(self.records.clone())
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

/// A card payload the way the REST API reports it.
fn api_card(name: &str, number: &str) -> Value {
    json!({
        "name": name,
        "number": number,
        "hp": "120",
        "types": ["Fire"],
        "rarity": "Rare Holo",
        "artist": "Mitsuhiro Arita",
        "attacks": [
            {"name": "Fire Spin", "cost": ["Fire", "Fire", "Fire", "Fire"],
             "damage": "100", "text": "Discard 2 Energy cards."}
        ],
        "weaknesses": [{"type": "Water", "value": "x2"}],
        "legalities": {"unlimited": "Legal"},
        "images": {"small": "https://img.example/s.png", "large": "https://img.example/l.png"},
        "set": {
            "id": "base1",
            "name": "Base",
            "series": "Base",
            "printedTotal": 102,
            "releaseDate": "1999/01/09"
        },
        "tcgplayer": {
            "updatedAt": "2024/04/30",
            "prices": {"holofoil": {"market": 350.0, "low": 300.0}}
        }
    })
}

#[test]
fn full_api_set_round_trips_idempotently() {
    let mut conn = open_memory_store().unwrap();
    let payloads = vec![
        api_card("Charizard", "4"),
        api_card("Blastoise", "2"),
        api_card("Venusaur", "15"),
    ];

    let mut source = CannedSource::new(SourceKind::Api, payloads.clone());
    let first = run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();
    assert_eq!(first.created, 3);
    assert_eq!(first.failed, 0);
    assert_eq!(first.prices_appended, 3);

    let mut source = CannedSource::new(SourceKind::Api, payloads);
    let second = run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.prices_appended, 0);

    let (series, sets, cards): (i64, i64, i64) = conn
        .query_row(
            "SELECT (SELECT COUNT(*) FROM series),
                    (SELECT COUNT(*) FROM sets),
                    (SELECT COUNT(*) FROM cards)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(series, 1);
    assert_eq!(sets, 1);
    assert_eq!(cards, 3);
}

#[test]
fn attacks_survive_a_source_that_does_not_report_them() {
    let mut conn = open_memory_store().unwrap();

    let dump_payload = json!({
        "name": {"en": "Charizard"},
        "localId": "4/102",
        "hp": 120,
        "set": {
            "id": "base1",
            "name": {"en": "Base"},
            "serie": {"id": "base", "name": {"en": "Base"}}
        },
        "attacks": [
            {"name": {"en": "Fire Spin"}, "cost": ["Fire", "Fire", "Fire", "Fire"],
             "damage": 100}
        ]
    });
    let mut dump = CannedSource::new(SourceKind::Dump, vec![dump_payload]);
    run_with_date(&mut conn, &mut dump, &SyncOptions::default(), today()).unwrap();

    // The storefront lists the same card with a price but says nothing
    // about attacks, so the stored attack must stay.
    let scrape_payload = json!({
        "nome": "Charizard",
        "numero": "4/102",
        "expansao": "base1",
        "holo": "sim",
        "pre_o": "R$ 1.234,56"
    });
    let mut scraper = CannedSource::new(SourceKind::Scraper, vec![scrape_payload]);
    let second = run_with_date(&mut conn, &mut scraper, &SyncOptions::default(), today()).unwrap();
    assert_eq!(second.prices_appended, 1);

    let cards: i64 = conn
        .query_row("SELECT COUNT(*) FROM cards", [], |row| row.get(0))
        .unwrap();
    assert_eq!(cards, 1);

    let attacks: i64 = conn
        .query_row("SELECT COUNT(*) FROM attacks", [], |row| row.get(0))
        .unwrap();
    assert_eq!(attacks, 1);

    let (amount, currency): (f64, String) = conn
        .query_row(
            "SELECT amount, currency FROM price_points WHERE source = 'scraper'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(amount, 1234.56);
    assert_eq!(currency, "BRL");
}

#[test]
fn dry_run_reports_changes_but_writes_none() {
    let mut conn = open_memory_store().unwrap();
    let mut source = CannedSource::new(SourceKind::Api, vec![api_card("Charizard", "4")]);
    run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();

    let mut changed = api_card("Charizard", "4");
    changed["hp"] = json!("130");
    changed["tcgplayer"]["updatedAt"] = json!("2024/05/02");
    let mut source = CannedSource::new(SourceKind::Api, vec![changed]);
    let options = SyncOptions {
        dry_run: true,
        ..Default::default()
    };
    let summary = run_with_date(&mut conn, &mut source, &options, today()).unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.prices_appended, 1);

    let hp: i64 = conn
        .query_row("SELECT hp FROM cards", [], |row| row.get(0))
        .unwrap();
    assert_eq!(hp, 120);
    let prices: i64 = conn
        .query_row("SELECT COUNT(*) FROM price_points", [], |row| row.get(0))
        .unwrap();
    assert_eq!(prices, 1);
}

#[test]
fn price_history_accumulates_without_touching_the_card() {
    let mut conn = open_memory_store().unwrap();
    let mut source = CannedSource::new(SourceKind::Api, vec![api_card("Charizard", "4")]);
    run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();

    let mut next_day = api_card("Charizard", "4");
    next_day["tcgplayer"]["updatedAt"] = json!("2024/05/02");
    next_day["tcgplayer"]["prices"]["holofoil"]["market"] = json!(360.0);
    let mut source = CannedSource::new(SourceKind::Api, vec![next_day]);
    let second = run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();

    // A new observation alone never counts as a card update.
    assert_eq!(second.unchanged, 1);
    assert_eq!(second.prices_appended, 1);

    let amounts: Vec<f64> = conn
        .prepare("SELECT amount FROM price_points ORDER BY collected_on")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(amounts, vec![350.0, 360.0]);
}

#[test]
fn prefer_existing_policy_reaches_the_upsert() {
    let mut conn = open_memory_store().unwrap();
    let mut source = CannedSource::new(SourceKind::Api, vec![api_card("Charizard", "4")]);
    run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();

    let mut bumped = api_card("Charizard", "4");
    bumped["hp"] = json!("130");
    bumped.as_object_mut().unwrap().remove("tcgplayer");

    let mut source = CannedSource::new(SourceKind::Api, vec![bumped.clone()]);
    let options = SyncOptions {
        policy: ConflictPolicy::PreferExisting,
        ..Default::default()
    };
    let summary = run_with_date(&mut conn, &mut source, &options, today()).unwrap();
    assert_eq!(summary.unchanged, 1);

    let hp: i64 = conn
        .query_row("SELECT hp FROM cards", [], |row| row.get(0))
        .unwrap();
    assert_eq!(hp, 120);

    let mut source = CannedSource::new(SourceKind::Api, vec![bumped]);
    let summary = run_with_date(&mut conn, &mut source, &SyncOptions::default(), today()).unwrap();
    assert_eq!(summary.updated, 1);

    let hp: i64 = conn
        .query_row("SELECT hp FROM cards", [], |row| row.get(0))
        .unwrap();
    assert_eq!(hp, 130);
}
