//! Read-side queries for the CLI: catalog totals, per-set
//! completeness and ranked card search.

use rusqlite::{params, Connection};

use super::DbResult;

/// Row counts and the most recent price observation date.
#[derive(Debug, Clone)]
pub struct CatalogStats {
    pub series: i64,
    pub sets: i64,
    pub cards: i64,
    pub price_points: i64,
    /// Distinct owned-copy rows; `owned_quantity` sums their counts.
    pub owned_rows: i64,
    pub owned_quantity: i64,
    pub latest_price_date: Option<String>,
}

pub fn catalog_stats(conn: &Connection) -> DbResult<CatalogStats> {
    let count = |sql: &str| -> DbResult<i64> { conn.query_row(sql, [], |row| row.get(0)) };
    Ok(CatalogStats {
        series: count("SELECT COUNT(*) FROM series")?,
        sets: count("SELECT COUNT(*) FROM sets")?,
        cards: count("SELECT COUNT(*) FROM cards")?,
        price_points: count("SELECT COUNT(*) FROM price_points")?,
        owned_rows: count("SELECT COUNT(*) FROM owned_copies")?,
        owned_quantity: count("SELECT COALESCE(SUM(quantity), 0) FROM owned_copies")?,
        latest_price_date: conn.query_row(
            "SELECT MAX(collected_on) FROM price_points",
            [],
            |row| row.get(0),
        )?,
    })
}

/// How many of a set's declared cards the catalog has so far. Sets
/// that never declared a count report `total` as None.
#[derive(Debug, Clone)]
pub struct SetCompleteness {
    pub series: String,
    pub code: String,
    pub name: Option<String>,
    pub have: i64,
    pub total: Option<i64>,
}

pub fn set_completeness(conn: &Connection) -> DbResult<Vec<SetCompleteness>> {
    let mut stmt = conn.prepare(
        "SELECT se.name, s.code, s.name, COUNT(c.id), s.total_cards
         FROM sets s
         JOIN series se ON se.id = s.series_id
         LEFT JOIN cards c ON c.set_id = s.id
         GROUP BY s.id
         ORDER BY se.name, s.code",
    )?;
    let results: DbResult<Vec<SetCompleteness>> = stmt
        .query_map([], |row| {
            Ok(SetCompleteness {
                series: row.get(0)?,
                code: row.get(1)?,
                name: row.get(2)?,
                have: row.get(3)?,
                total: row.get(4)?,
            })
        })?
        .collect();
    results
}

/// One card search hit.
#[derive(Debug, Clone)]
pub struct CardHit {
    pub card_id: i64,
    pub name: String,
    pub number: String,
    pub set_code: String,
    pub set_name: Option<String>,
    pub rarity: Option<String>,
}

/// Search cards by name (case-insensitive substring match). Exact
/// matches rank first, then prefix matches, then the rest, each
/// alphabetically.
pub fn find_cards(conn: &Connection, query: &str, limit: usize) -> DbResult<Vec<CardHit>> {
    let substring = format!("%{}%", query);
    let prefix = format!("{}%", query);
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.number, s.code, s.name, r.name
         FROM cards c
         JOIN sets s ON s.id = c.set_id
         LEFT JOIN rarities r ON r.id = c.rarity_id
         WHERE c.name LIKE ?1 COLLATE NOCASE
         ORDER BY
             CASE WHEN c.name = ?2 COLLATE NOCASE THEN 0
                  WHEN c.name LIKE ?3 COLLATE NOCASE THEN 1
                  ELSE 2
             END,
             c.name, s.code, c.number
         LIMIT ?4",
    )?;
    let results: DbResult<Vec<CardHit>> = stmt
        .query_map(params![substring, query, prefix, limit], |row| {
            Ok(CardHit {
                card_id: row.get(0)?,
                name: row.get(1)?,
                number: row.get(2)?,
                set_code: row.get(3)?,
                set_name: row.get(4)?,
                rarity: row.get(5)?,
            })
        })?
        .collect();
    results
}

/// Latest observation per price source for one card.
#[derive(Debug, Clone)]
pub struct PriceObservation {
    pub source: String,
    pub collected_on: String,
    pub amount: f64,
    pub currency: String,
}

pub fn latest_prices(conn: &Connection, card_id: i64) -> DbResult<Vec<PriceObservation>> {
    let mut stmt = conn.prepare(
        "SELECT p.source, p.collected_on, p.amount, p.currency
         FROM price_points p
         WHERE p.card_id = ?1
           AND p.collected_on = (SELECT MAX(collected_on) FROM price_points
                                 WHERE card_id = p.card_id AND source = p.source)
         ORDER BY p.source",
    )?;
    let results: DbResult<Vec<PriceObservation>> = stmt
        .query_map(params![card_id], |row| {
            Ok(PriceObservation {
                source: row.get(0)?,
                collected_on: row.get(1)?,
                amount: row.get(2)?,
                currency: row.get(3)?,
            })
        })?
        .collect();
    results
}
