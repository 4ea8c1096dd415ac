//! Catalog schema.
//!
//! Natural keys are enforced with UNIQUE constraints so upserts can
//! resolve rows without ever trusting surrogate ids from a source:
//! series and reference entities by name, sets by code, cards by
//! (set_id, number), price points by (card_id, source, collected_on).
//! Child tables cascade on card deletion. The foreign_keys pragma is
//! per-connection and set by the open helpers in the parent module.

use rusqlite::Connection;

use super::DbResult;

/// Create all tables and indexes if they don't exist. Safe to call on
/// every open.
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        -- Series group sets (e.g. 'Sword & Shield'). Resolved by name.
        CREATE TABLE IF NOT EXISTS series (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT,
            release_date TEXT
        );

        -- Sets are resolved by their globally unique code ('base1', 'lp-706').
        CREATE TABLE IF NOT EXISTS sets (
            id INTEGER PRIMARY KEY,
            series_id INTEGER NOT NULL REFERENCES series(id),
            code TEXT NOT NULL UNIQUE,
            name TEXT,
            release_date TEXT,
            total_cards INTEGER,
            symbol_url TEXT,
            logo_url TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sets_series ON sets(series_id);

        -- Reference entities, deduplicated by name across all sources.
        CREATE TABLE IF NOT EXISTS rarities (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS artists (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS energy_types (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS formats (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        -- One row per printed card. The number is an opaque string so
        -- forms like '4/102' or 'SWSH001' round-trip unchanged.
        CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY,
            set_id INTEGER NOT NULL REFERENCES sets(id),
            number TEXT NOT NULL,
            name TEXT NOT NULL,
            hp INTEGER,
            primary_class TEXT,
            secondary_class TEXT,
            rarity_id INTEGER REFERENCES rarities(id),
            artist_id INTEGER REFERENCES artists(id),
            rule_text TEXT,
            footer_text TEXT,
            language TEXT,
            published INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (set_id, number)
        );

        CREATE INDEX IF NOT EXISTS idx_cards_name ON cards(name);

        -- Child tables: fully replaced per card when a source reports
        -- the group, untouched otherwise.
        CREATE TABLE IF NOT EXISTS abilities (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            kind TEXT,
            text TEXT,
            UNIQUE (card_id, name)
        );

        CREATE TABLE IF NOT EXISTS attacks (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            damage TEXT,
            text TEXT,
            UNIQUE (card_id, name, position)
        );

        -- Ordered energy cost entries of one attack.
        CREATE TABLE IF NOT EXISTS attack_costs (
            id INTEGER PRIMARY KEY,
            attack_id INTEGER NOT NULL REFERENCES attacks(id) ON DELETE CASCADE,
            energy_type_id INTEGER NOT NULL REFERENCES energy_types(id),
            amount INTEGER NOT NULL,
            position INTEGER NOT NULL,
            UNIQUE (attack_id, position)
        );

        CREATE TABLE IF NOT EXISTS weaknesses (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            energy_type_id INTEGER NOT NULL REFERENCES energy_types(id),
            modifier TEXT,
            UNIQUE (card_id, energy_type_id)
        );

        CREATE TABLE IF NOT EXISTS resistances (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            energy_type_id INTEGER NOT NULL REFERENCES energy_types(id),
            modifier TEXT,
            UNIQUE (card_id, energy_type_id)
        );

        CREATE TABLE IF NOT EXISTS legalities (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            format_id INTEGER NOT NULL REFERENCES formats(id),
            status TEXT NOT NULL,
            UNIQUE (card_id, format_id)
        );

        CREATE TABLE IF NOT EXISTS variants (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            UNIQUE (card_id, kind)
        );

        CREATE TABLE IF NOT EXISTS images (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            variant TEXT,
            small_url TEXT,
            large_url TEXT,
            UNIQUE (card_id, kind, variant)
        );

        -- Append-only price history: one observation per card, source
        -- and day. Rows are never updated once written.
        CREATE TABLE IF NOT EXISTS price_points (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
            source TEXT NOT NULL,
            collected_on TEXT NOT NULL,
            amount REAL NOT NULL,
            currency TEXT NOT NULL,
            inserted_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (card_id, source, collected_on)
        );

        CREATE INDEX IF NOT EXISTS idx_price_points_date ON price_points(collected_on);

        -- Physical copies the user owns. Duplicate rows with the same
        -- (card, variant, condition) are allowed; the merge-copies
        -- operation collapses them.
        CREATE TABLE IF NOT EXISTS owned_copies (
            id INTEGER PRIMARY KEY,
            card_id INTEGER NOT NULL REFERENCES cards(id),
            variant TEXT NOT NULL DEFAULT '',
            condition TEXT NOT NULL DEFAULT 'NM',
            grade REAL,
            quantity INTEGER NOT NULL DEFAULT 1 CHECK (quantity >= 0),
            storage TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_owned_copies_card ON owned_copies(card_id);

        -- Single-row lease guarding mutating sync runs.
        CREATE TABLE IF NOT EXISTS sync_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        );
        ",
    )?;

    log::debug!("catalog schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::db::open_memory_store;
    use rusqlite::params;

    #[test]
    fn init_schema_creates_all_tables() {
        let conn = open_memory_store().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                 ('series','sets','rarities','artists','energy_types','formats','cards',
                  'abilities','attacks','attack_costs','weaknesses','resistances',
                  'legalities','variants','images','price_points','owned_copies','sync_lock')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 18);
    }

    #[test]
    fn init_schema_is_idempotent() {
        let conn = open_memory_store().unwrap();
        super::init_schema(&conn).unwrap();
    }

    #[test]
    fn deleting_a_card_cascades_to_children() {
        let conn = open_memory_store().unwrap();
        conn.execute("INSERT INTO series (name) VALUES ('Base')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO sets (series_id, code) VALUES (1, 'base1')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO cards (set_id, number, name) VALUES (1, '4', 'Charizard')",
            [],
        )
        .unwrap();
        conn.execute("INSERT INTO energy_types (name) VALUES ('Fire')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO attacks (card_id, name, position) VALUES (1, 'Fire Spin', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO attack_costs (attack_id, energy_type_id, amount, position)
             VALUES (1, 1, 4, 0)",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM cards WHERE id = 1", []).unwrap();

        let attacks: i64 = conn
            .query_row("SELECT COUNT(*) FROM attacks", [], |row| row.get(0))
            .unwrap();
        let costs: i64 = conn
            .query_row("SELECT COUNT(*) FROM attack_costs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(attacks, 0);
        assert_eq!(costs, 0);
    }

    #[test]
    fn card_numbers_are_unique_per_set_only() {
        let conn = open_memory_store().unwrap();
        conn.execute("INSERT INTO series (name) VALUES ('Base')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO sets (series_id, code) VALUES (1, 'base1'), (1, 'base2')",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO cards (set_id, number, name) VALUES (1, '4', 'Charizard')",
            [],
        )
        .unwrap();
        // Same number in another set is fine.
        conn.execute(
            "INSERT INTO cards (set_id, number, name) VALUES (2, '4', 'Machamp')",
            [],
        )
        .unwrap();
        // Same number in the same set is not.
        let dup = conn.execute(
            "INSERT INTO cards (set_id, number, name) VALUES (1, '4', 'Imposter')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn price_points_reject_same_day_duplicates() {
        let conn = open_memory_store().unwrap();
        conn.execute("INSERT INTO series (name) VALUES ('Base')", [])
            .unwrap();
        conn.execute("INSERT INTO sets (series_id, code) VALUES (1, 'base1')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO cards (set_id, number, name) VALUES (1, '4', 'Charizard')",
            [],
        )
        .unwrap();

        let insert = "INSERT OR IGNORE INTO price_points
                      (card_id, source, collected_on, amount, currency)
                      VALUES (?1, ?2, ?3, ?4, ?5)";
        let first = conn
            .execute(insert, params![1, "tcgplayer", "2024-05-01", 350.0, "USD"])
            .unwrap();
        let second = conn
            .execute(insert, params![1, "tcgplayer", "2024-05-01", 999.0, "USD"])
            .unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);

        let amount: f64 = conn
            .query_row("SELECT amount FROM price_points", [], |row| row.get(0))
            .unwrap();
        assert!((amount - 350.0).abs() < f64::EPSILON);
    }
}
