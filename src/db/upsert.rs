//! Card upsert engine.
//!
//! Incoming records are matched to storage by natural keys only: the
//! set by code, the card by (set_id, number), reference entities by
//! name. Scalar conflicts follow the [`ConflictPolicy`]; child
//! collections a source reports are diffed against storage row by row,
//! while collections the source does not report are left untouched.
//! Price points are append-only and never mark a card as updated.
//!
//! Each card runs in its own transaction. A dry run executes the full
//! transaction and rolls it back, so the reported change set is exactly
//! what a real run would have written.

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::PersistenceError;
use crate::normalize::UNCLASSIFIED_SERIES;
use crate::record::{
    AbilityRecord, AttackRecord, CanonicalRecord, CostEntry, ImageRecord, LegalityRecord,
    PricePoint, SeriesRef, SetRef, TypedModifier, VariantRecord,
};

use super::DbResult;

/// How to resolve a scalar field that both storage and the incoming
/// record know, with differing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The incoming value wins.
    #[default]
    PreferIncoming,
    /// The stored value wins; incoming values only fill fields that
    /// are still missing. Rows a known collection no longer contains
    /// are kept as well.
    PreferExisting,
}

/// What the upsert did to the card row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpsertAction::Created => "created",
            UpsertAction::Updated => "updated",
            UpsertAction::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

/// One observed difference, identified by a field path such as `hp`,
/// `set.name` or `attacks[Fire Spin].damage`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl fmt::Display for FieldChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            self.before.as_deref().unwrap_or("(none)"),
            self.after.as_deref().unwrap_or("(none)")
        )
    }
}

/// Field-level differences collected while upserting one card.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    fn record(
        &mut self,
        field: impl Into<String>,
        before: Option<String>,
        after: Option<String>,
    ) {
        self.changes.push(FieldChange {
            field: field.into(),
            before,
            after,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldChange> {
        self.changes.iter()
    }

    /// True if any recorded path starts with `prefix` (e.g. "attacks").
    pub fn touches(&self, prefix: &str) -> bool {
        self.changes.iter().any(|c| c.field.starts_with(prefix))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertOptions {
    pub policy: ConflictPolicy,
    /// Run the full transaction, report the outcome, write nothing.
    pub dry_run: bool,
}

/// Result of upserting one canonical record.
#[derive(Debug)]
pub struct UpsertOutcome {
    pub card_id: i64,
    pub action: UpsertAction,
    /// New price observations written this run. Appends alone never
    /// turn an unchanged card into an updated one.
    pub prices_appended: usize,
    pub changes: ChangeSet,
}

/// Upsert one card in its own transaction.
pub fn upsert_card(
    conn: &mut Connection,
    record: &CanonicalRecord,
    options: UpsertOptions,
) -> Result<UpsertOutcome, PersistenceError> {
    let tx = conn.transaction()?;
    let outcome = upsert_card_tx(&tx, record, options.policy)?;
    if options.dry_run {
        tx.rollback()?;
    } else {
        tx.commit()?;
    }
    Ok(outcome)
}

fn upsert_card_tx(
    tx: &Transaction<'_>,
    record: &CanonicalRecord,
    policy: ConflictPolicy,
) -> DbResult<UpsertOutcome> {
    let mut changes = ChangeSet::default();

    let (set_id, set_mutated) = resolve_set(tx, &record.set, policy, &mut changes)?;

    let (card_id, action) = match find_card(tx, set_id, &record.number)? {
        None => {
            let card_id = insert_card(tx, set_id, record)?;
            changes.record(
                "card",
                None,
                Some(format!(
                    "{} #{} [{}]",
                    record.name, record.number, record.set.code
                )),
            );
            (card_id, UpsertAction::Created)
        }
        Some(existing) => {
            let mutated = update_card_row(tx, &existing, record, policy, &mut changes)?;
            let action = if mutated {
                UpsertAction::Updated
            } else {
                UpsertAction::Unchanged
            };
            (existing.id, action)
        }
    };

    let mut children_mutated = false;
    if let Some(abilities) = &record.abilities {
        children_mutated |= sync_abilities(tx, card_id, abilities, policy, &mut changes)?;
    }
    if let Some(attacks) = &record.attacks {
        children_mutated |= sync_attacks(tx, card_id, attacks, policy, &mut changes)?;
    }
    if let Some(weaknesses) = &record.weaknesses {
        children_mutated |= sync_typed(tx, card_id, &WEAKNESSES, weaknesses, policy, &mut changes)?;
    }
    if let Some(resistances) = &record.resistances {
        children_mutated |=
            sync_typed(tx, card_id, &RESISTANCES, resistances, policy, &mut changes)?;
    }
    if let Some(legalities) = &record.legalities {
        children_mutated |= sync_legalities(tx, card_id, legalities, policy, &mut changes)?;
    }
    if let Some(variants) = &record.variants {
        children_mutated |= sync_variants(tx, card_id, variants, policy, &mut changes)?;
    }
    if let Some(images) = &record.images {
        children_mutated |= sync_images(tx, card_id, images, policy, &mut changes)?;
    }

    let prices_appended = append_prices(tx, card_id, &record.prices)?;

    let action = match action {
        UpsertAction::Unchanged if children_mutated || set_mutated => UpsertAction::Updated,
        other => other,
    };

    Ok(UpsertOutcome {
        card_id,
        action,
        prices_appended,
        changes,
    })
}

// ----- set and reference resolution -----

struct ExistingSet {
    id: i64,
    series_id: i64,
    series_name: String,
    name: Option<String>,
    release_date: Option<String>,
    total_cards: Option<i64>,
    symbol_url: Option<String>,
    logo_url: Option<String>,
}

fn resolve_set(
    tx: &Transaction<'_>,
    set: &SetRef,
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<(i64, bool)> {
    let existing = tx
        .prepare_cached(
            "SELECT s.id, s.series_id, se.name, s.name, s.release_date,
                    s.total_cards, s.symbol_url, s.logo_url
             FROM sets s
             JOIN series se ON se.id = s.series_id
             WHERE s.code = ?1",
        )?
        .query_row(params![set.code], |row| {
            Ok(ExistingSet {
                id: row.get(0)?,
                series_id: row.get(1)?,
                series_name: row.get(2)?,
                name: row.get(3)?,
                release_date: row.get(4)?,
                total_cards: row.get(5)?,
                symbol_url: row.get(6)?,
                logo_url: row.get(7)?,
            })
        })
        .optional()?;

    match existing {
        None => {
            let series_id = match &set.series {
                Some(series) => resolve_series(tx, series)?,
                // Unmapped sets are filed under the unclassified series
                // until a source reports a real one.
                None => resolve_named(tx, SERIES_SELECT, SERIES_INSERT, UNCLASSIFIED_SERIES)?,
            };
            tx.prepare_cached(
                "INSERT INTO sets (series_id, code, name, release_date, total_cards,
                                   symbol_url, logo_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                series_id,
                set.code,
                set.name,
                set.release_date.map(|d| d.to_string()),
                set.total_cards,
                set.symbol_url,
                set.logo_url,
            ])?;
            Ok((tx.last_insert_rowid(), true))
        }
        Some(have) => {
            let mut mutated = false;

            let (name, name_changed) =
                merge_field(changes, "set.name", &have.name, &set.name, policy);
            let incoming_date = set.release_date.map(|d| d.to_string());
            let (release_date, date_changed) = merge_field(
                changes,
                "set.release_date",
                &have.release_date,
                &incoming_date,
                policy,
            );
            let (total_cards, total_changed) = merge_field(
                changes,
                "set.total_cards",
                &have.total_cards,
                &set.total_cards,
                policy,
            );
            let (symbol_url, symbol_changed) = merge_field(
                changes,
                "set.symbol_url",
                &have.symbol_url,
                &set.symbol_url,
                policy,
            );
            let (logo_url, logo_changed) =
                merge_field(changes, "set.logo_url", &have.logo_url, &set.logo_url, policy);

            if name_changed || date_changed || total_changed || symbol_changed || logo_changed {
                tx.prepare_cached(
                    "UPDATE sets SET name = ?1, release_date = ?2, total_cards = ?3,
                                     symbol_url = ?4, logo_url = ?5
                     WHERE id = ?6",
                )?
                .execute(params![
                    name,
                    release_date,
                    total_cards,
                    symbol_url,
                    logo_url,
                    have.id
                ])?;
                mutated = true;
            }

            // A reported series moves the set out of the unclassified
            // bucket (or re-points it under prefer-incoming); a missing
            // one never does.
            if let Some(series) = &set.series {
                if series.name != have.series_name
                    && (policy == ConflictPolicy::PreferIncoming
                        || have.series_name == UNCLASSIFIED_SERIES)
                {
                    let series_id = resolve_series(tx, series)?;
                    if series_id != have.series_id {
                        tx.prepare_cached("UPDATE sets SET series_id = ?1 WHERE id = ?2")?
                            .execute(params![series_id, have.id])?;
                        changes.record(
                            "set.series",
                            Some(have.series_name.clone()),
                            Some(series.name.clone()),
                        );
                        mutated = true;
                    }
                }
            }

            Ok((have.id, mutated))
        }
    }
}

const SERIES_SELECT: &str = "SELECT id FROM series WHERE name = ?1";
const SERIES_INSERT: &str = "INSERT INTO series (name) VALUES (?1)";

fn resolve_series(tx: &Transaction<'_>, series: &SeriesRef) -> DbResult<i64> {
    let id = resolve_named(tx, SERIES_SELECT, SERIES_INSERT, &series.name)?;
    // Series metadata is shared across sets, so it fills in but never
    // churns.
    if series.code.is_some() || series.release_date.is_some() {
        tx.prepare_cached(
            "UPDATE series SET code = COALESCE(code, ?1),
                               release_date = COALESCE(release_date, ?2)
             WHERE id = ?3",
        )?
        .execute(params![
            series.code,
            series.release_date.map(|d| d.to_string()),
            id
        ])?;
    }
    Ok(id)
}

/// Look up a by-name entity, creating it on first sight.
fn resolve_named(
    tx: &Transaction<'_>,
    select_sql: &str,
    insert_sql: &str,
    name: &str,
) -> DbResult<i64> {
    let existing: Option<i64> = tx
        .prepare_cached(select_sql)?
        .query_row(params![name], |row| row.get(0))
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    tx.prepare_cached(insert_sql)?.execute(params![name])?;
    Ok(tx.last_insert_rowid())
}

const RARITY_SELECT: &str = "SELECT id FROM rarities WHERE name = ?1";
const RARITY_INSERT: &str = "INSERT INTO rarities (name) VALUES (?1)";
const ARTIST_SELECT: &str = "SELECT id FROM artists WHERE name = ?1";
const ARTIST_INSERT: &str = "INSERT INTO artists (name) VALUES (?1)";
const ENERGY_SELECT: &str = "SELECT id FROM energy_types WHERE name = ?1";
const ENERGY_INSERT: &str = "INSERT INTO energy_types (name) VALUES (?1)";
const FORMAT_SELECT: &str = "SELECT id FROM formats WHERE name = ?1";
const FORMAT_INSERT: &str = "INSERT INTO formats (name) VALUES (?1)";

fn resolve_optional_named(
    tx: &Transaction<'_>,
    select_sql: &str,
    insert_sql: &str,
    name: &Option<String>,
) -> DbResult<Option<i64>> {
    match name {
        Some(name) => resolve_named(tx, select_sql, insert_sql, name).map(Some),
        None => Ok(None),
    }
}

// ----- card row -----

struct ExistingCard {
    id: i64,
    name: String,
    hp: Option<i64>,
    primary_class: Option<String>,
    secondary_class: Option<String>,
    rarity: Option<String>,
    artist: Option<String>,
    rule_text: Option<String>,
    footer_text: Option<String>,
    language: Option<String>,
    published: Option<bool>,
}

fn find_card(tx: &Transaction<'_>, set_id: i64, number: &str) -> DbResult<Option<ExistingCard>> {
    tx.prepare_cached(
        "SELECT c.id, c.name, c.hp, c.primary_class, c.secondary_class,
                r.name, a.name, c.rule_text, c.footer_text, c.language, c.published
         FROM cards c
         LEFT JOIN rarities r ON r.id = c.rarity_id
         LEFT JOIN artists a ON a.id = c.artist_id
         WHERE c.set_id = ?1 AND c.number = ?2",
    )?
    .query_row(params![set_id, number], |row| {
        Ok(ExistingCard {
            id: row.get(0)?,
            name: row.get(1)?,
            hp: row.get(2)?,
            primary_class: row.get(3)?,
            secondary_class: row.get(4)?,
            rarity: row.get(5)?,
            artist: row.get(6)?,
            rule_text: row.get(7)?,
            footer_text: row.get(8)?,
            language: row.get(9)?,
            published: row.get(10)?,
        })
    })
    .optional()
}

fn insert_card(tx: &Transaction<'_>, set_id: i64, record: &CanonicalRecord) -> DbResult<i64> {
    let rarity_id = resolve_optional_named(tx, RARITY_SELECT, RARITY_INSERT, &record.rarity)?;
    let artist_id = resolve_optional_named(tx, ARTIST_SELECT, ARTIST_INSERT, &record.artist)?;
    tx.prepare_cached(
        "INSERT INTO cards (set_id, number, name, hp, primary_class, secondary_class,
                            rarity_id, artist_id, rule_text, footer_text, language, published)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?
    .execute(params![
        set_id,
        record.number,
        record.name,
        record.hp,
        record.primary_class,
        record.secondary_class,
        rarity_id,
        artist_id,
        record.rule_text,
        record.footer_text,
        record.language,
        record.published,
    ])?;
    Ok(tx.last_insert_rowid())
}

fn update_card_row(
    tx: &Transaction<'_>,
    existing: &ExistingCard,
    record: &CanonicalRecord,
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let incoming_name = Some(record.name.clone());
    let existing_name = Some(existing.name.clone());
    let (name, c0) = merge_field(changes, "name", &existing_name, &incoming_name, policy);
    let (hp, c1) = merge_field(changes, "hp", &existing.hp, &record.hp, policy);
    let (primary_class, c2) = merge_field(
        changes,
        "primary_class",
        &existing.primary_class,
        &record.primary_class,
        policy,
    );
    let (secondary_class, c3) = merge_field(
        changes,
        "secondary_class",
        &existing.secondary_class,
        &record.secondary_class,
        policy,
    );
    let (rarity, c4) = merge_field(changes, "rarity", &existing.rarity, &record.rarity, policy);
    let (artist, c5) = merge_field(changes, "artist", &existing.artist, &record.artist, policy);
    let (rule_text, c6) = merge_field(
        changes,
        "rule_text",
        &existing.rule_text,
        &record.rule_text,
        policy,
    );
    let (footer_text, c7) = merge_field(
        changes,
        "footer_text",
        &existing.footer_text,
        &record.footer_text,
        policy,
    );
    let (language, c8) = merge_field(
        changes,
        "language",
        &existing.language,
        &record.language,
        policy,
    );
    let (published, c9) = merge_field(
        changes,
        "published",
        &existing.published,
        &record.published,
        policy,
    );

    let mutated = c0 || c1 || c2 || c3 || c4 || c5 || c6 || c7 || c8 || c9;
    if !mutated {
        return Ok(false);
    }

    let rarity_id = resolve_optional_named(tx, RARITY_SELECT, RARITY_INSERT, &rarity)?;
    let artist_id = resolve_optional_named(tx, ARTIST_SELECT, ARTIST_INSERT, &artist)?;
    tx.prepare_cached(
        "UPDATE cards SET name = ?1, hp = ?2, primary_class = ?3, secondary_class = ?4,
                          rarity_id = ?5, artist_id = ?6, rule_text = ?7, footer_text = ?8,
                          language = ?9, published = ?10, updated_at = datetime('now')
         WHERE id = ?11",
    )?
    .execute(params![
        name,
        hp,
        primary_class,
        secondary_class,
        rarity_id,
        artist_id,
        rule_text,
        footer_text,
        language,
        published,
        existing.id,
    ])?;
    Ok(true)
}

/// Pick the stored value for one scalar field and record the change if
/// the choice differs from what storage has.
fn merge_field<T>(
    changes: &mut ChangeSet,
    field: impl Into<String>,
    existing: &Option<T>,
    incoming: &Option<T>,
    policy: ConflictPolicy,
) -> (Option<T>, bool)
where
    T: Clone + PartialEq + fmt::Display,
{
    let chosen = match (existing, incoming) {
        // The source does not report the field: storage stands.
        (_, None) => existing.clone(),
        (None, Some(value)) => Some(value.clone()),
        (Some(_), Some(_)) if policy == ConflictPolicy::PreferExisting => existing.clone(),
        (Some(_), Some(value)) => Some(value.clone()),
    };
    let changed = chosen != *existing;
    if changed {
        changes.record(field, display_opt(existing), display_opt(&chosen));
    }
    (chosen, changed)
}

fn display_opt<T: fmt::Display>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

// ----- child collections -----

fn sync_abilities(
    tx: &Transaction<'_>,
    card_id: i64,
    incoming: &[AbilityRecord],
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let existing: Vec<(i64, AbilityRecord)> = tx
        .prepare_cached("SELECT id, name, kind, text FROM abilities WHERE card_id = ?1")?
        .query_map(params![card_id], |row| {
            Ok((
                row.get(0)?,
                AbilityRecord {
                    name: row.get(1)?,
                    kind: row.get(2)?,
                    text: row.get(3)?,
                },
            ))
        })?
        .collect::<DbResult<_>>()?;

    let mut mutated = false;
    for entry in incoming {
        match existing.iter().find(|(_, have)| have.name == entry.name) {
            None => {
                tx.prepare_cached(
                    "INSERT INTO abilities (card_id, name, kind, text) VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![card_id, entry.name, entry.kind, entry.text])?;
                changes.record(
                    format!("abilities[{}]", entry.name),
                    None,
                    Some("added".to_string()),
                );
                mutated = true;
            }
            Some((id, have)) => {
                let (kind, kind_changed) = merge_field(
                    changes,
                    format!("abilities[{}].kind", entry.name),
                    &have.kind,
                    &entry.kind,
                    policy,
                );
                let (text, text_changed) = merge_field(
                    changes,
                    format!("abilities[{}].text", entry.name),
                    &have.text,
                    &entry.text,
                    policy,
                );
                if kind_changed || text_changed {
                    tx.prepare_cached("UPDATE abilities SET kind = ?1, text = ?2 WHERE id = ?3")?
                        .execute(params![kind, text, id])?;
                    mutated = true;
                }
            }
        }
    }

    if policy == ConflictPolicy::PreferIncoming {
        for (id, have) in &existing {
            if !incoming.iter().any(|entry| entry.name == have.name) {
                tx.prepare_cached("DELETE FROM abilities WHERE id = ?1")?
                    .execute(params![id])?;
                changes.record(
                    format!("abilities[{}]", have.name),
                    Some("present".to_string()),
                    None,
                );
                mutated = true;
            }
        }
    }

    Ok(mutated)
}

struct ExistingAttack {
    id: i64,
    position: i64,
    record: AttackRecord,
}

fn load_attacks(tx: &Transaction<'_>, card_id: i64) -> DbResult<Vec<ExistingAttack>> {
    let mut attacks: Vec<ExistingAttack> = tx
        .prepare_cached(
            "SELECT id, name, position, damage, text FROM attacks
             WHERE card_id = ?1 ORDER BY position",
        )?
        .query_map(params![card_id], |row| {
            Ok(ExistingAttack {
                id: row.get(0)?,
                position: row.get(2)?,
                record: AttackRecord {
                    name: row.get(1)?,
                    cost: Vec::new(),
                    damage: row.get(3)?,
                    text: row.get(4)?,
                },
            })
        })?
        .collect::<DbResult<_>>()?;

    for attack in &mut attacks {
        attack.record.cost = tx
            .prepare_cached(
                "SELECT e.name, ac.amount FROM attack_costs ac
                 JOIN energy_types e ON e.id = ac.energy_type_id
                 WHERE ac.attack_id = ?1 ORDER BY ac.position",
            )?
            .query_map(params![attack.id], |row| {
                Ok(CostEntry {
                    energy: row.get(0)?,
                    amount: row.get(1)?,
                })
            })?
            .collect::<DbResult<_>>()?;
    }
    Ok(attacks)
}

fn sync_attacks(
    tx: &Transaction<'_>,
    card_id: i64,
    incoming: &[AttackRecord],
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let existing = load_attacks(tx, card_id)?;

    let mut mutated = false;

    // Attacks repeat by name at different positions, so rows pair up on
    // (name, position). Deletions run first: a repositioned attack frees
    // its unique slot before the insert pass claims it.
    if policy == ConflictPolicy::PreferIncoming {
        for have in &existing {
            let kept = incoming.iter().enumerate().any(|(index, entry)| {
                entry.name == have.record.name && index as i64 == have.position
            });
            if !kept {
                tx.prepare_cached("DELETE FROM attacks WHERE id = ?1")?
                    .execute(params![have.id])?;
                changes.record(
                    format!("attacks[{}]", have.record.name),
                    Some("present".to_string()),
                    None,
                );
                mutated = true;
            }
        }
    }

    for (index, entry) in incoming.iter().enumerate() {
        let position = index as i64;
        match existing
            .iter()
            .find(|have| have.record.name == entry.name && have.position == position)
        {
            None => {
                tx.prepare_cached(
                    "INSERT INTO attacks (card_id, name, position, damage, text)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![card_id, entry.name, position, entry.damage, entry.text])?;
                let attack_id = tx.last_insert_rowid();
                replace_attack_costs(tx, attack_id, &entry.cost)?;
                changes.record(
                    format!("attacks[{}]", entry.name),
                    None,
                    Some("added".to_string()),
                );
                mutated = true;
            }
            Some(have) => {
                let (damage, damage_changed) = merge_field(
                    changes,
                    format!("attacks[{}].damage", entry.name),
                    &have.record.damage,
                    &entry.damage,
                    policy,
                );
                let (text, text_changed) = merge_field(
                    changes,
                    format!("attacks[{}].text", entry.name),
                    &have.record.text,
                    &entry.text,
                    policy,
                );

                let cost_changed = have.record.cost != entry.cost
                    && policy == ConflictPolicy::PreferIncoming;
                if cost_changed {
                    changes.record(
                        format!("attacks[{}].cost", entry.name),
                        Some(format_cost(&have.record.cost)),
                        Some(format_cost(&entry.cost)),
                    );
                }

                if damage_changed || text_changed || cost_changed {
                    tx.prepare_cached(
                        "UPDATE attacks SET damage = ?1, text = ?2 WHERE id = ?3",
                    )?
                    .execute(params![damage, text, have.id])?;
                    if cost_changed {
                        replace_attack_costs(tx, have.id, &entry.cost)?;
                    }
                    mutated = true;
                }
            }
        }
    }

    Ok(mutated)
}

fn replace_attack_costs(tx: &Transaction<'_>, attack_id: i64, cost: &[CostEntry]) -> DbResult<()> {
    tx.prepare_cached("DELETE FROM attack_costs WHERE attack_id = ?1")?
        .execute(params![attack_id])?;
    let mut insert = tx.prepare_cached(
        "INSERT INTO attack_costs (attack_id, energy_type_id, amount, position)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, entry) in cost.iter().enumerate() {
        let energy_id = resolve_named(tx, ENERGY_SELECT, ENERGY_INSERT, &entry.energy)?;
        insert.execute(params![attack_id, energy_id, entry.amount, position as i64])?;
    }
    Ok(())
}

fn format_cost(cost: &[CostEntry]) -> String {
    if cost.is_empty() {
        return "free".to_string();
    }
    cost.iter()
        .map(|entry| format!("{} x{}", entry.energy, entry.amount))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Weaknesses and resistances share one table shape; the SQL for each
/// is fixed here so everything stays parameterized.
struct TypedGroup {
    label: &'static str,
    select: &'static str,
    insert: &'static str,
    update: &'static str,
    delete: &'static str,
}

const WEAKNESSES: TypedGroup = TypedGroup {
    label: "weaknesses",
    select: "SELECT w.id, e.name, w.modifier FROM weaknesses w
             JOIN energy_types e ON e.id = w.energy_type_id
             WHERE w.card_id = ?1",
    insert: "INSERT INTO weaknesses (card_id, energy_type_id, modifier) VALUES (?1, ?2, ?3)",
    update: "UPDATE weaknesses SET modifier = ?1 WHERE id = ?2",
    delete: "DELETE FROM weaknesses WHERE id = ?1",
};

const RESISTANCES: TypedGroup = TypedGroup {
    label: "resistances",
    select: "SELECT r.id, e.name, r.modifier FROM resistances r
             JOIN energy_types e ON e.id = r.energy_type_id
             WHERE r.card_id = ?1",
    insert: "INSERT INTO resistances (card_id, energy_type_id, modifier) VALUES (?1, ?2, ?3)",
    update: "UPDATE resistances SET modifier = ?1 WHERE id = ?2",
    delete: "DELETE FROM resistances WHERE id = ?1",
};

fn sync_typed(
    tx: &Transaction<'_>,
    card_id: i64,
    group: &TypedGroup,
    incoming: &[TypedModifier],
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let existing: Vec<(i64, TypedModifier)> = tx
        .prepare_cached(group.select)?
        .query_map(params![card_id], |row| {
            Ok((
                row.get(0)?,
                TypedModifier {
                    energy: row.get(1)?,
                    modifier: row.get(2)?,
                },
            ))
        })?
        .collect::<DbResult<_>>()?;

    let mut mutated = false;
    for entry in incoming {
        match existing.iter().find(|(_, have)| have.energy == entry.energy) {
            None => {
                let energy_id = resolve_named(tx, ENERGY_SELECT, ENERGY_INSERT, &entry.energy)?;
                tx.prepare_cached(group.insert)?
                    .execute(params![card_id, energy_id, entry.modifier])?;
                changes.record(
                    format!("{}[{}]", group.label, entry.energy),
                    None,
                    Some("added".to_string()),
                );
                mutated = true;
            }
            Some((id, have)) => {
                let (modifier, modifier_changed) = merge_field(
                    changes,
                    format!("{}[{}]", group.label, entry.energy),
                    &have.modifier,
                    &entry.modifier,
                    policy,
                );
                if modifier_changed {
                    tx.prepare_cached(group.update)?
                        .execute(params![modifier, id])?;
                    mutated = true;
                }
            }
        }
    }

    if policy == ConflictPolicy::PreferIncoming {
        for (id, have) in &existing {
            if !incoming.iter().any(|entry| entry.energy == have.energy) {
                tx.prepare_cached(group.delete)?.execute(params![id])?;
                changes.record(
                    format!("{}[{}]", group.label, have.energy),
                    Some("present".to_string()),
                    None,
                );
                mutated = true;
            }
        }
    }

    Ok(mutated)
}

fn sync_legalities(
    tx: &Transaction<'_>,
    card_id: i64,
    incoming: &[LegalityRecord],
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let existing: Vec<(i64, LegalityRecord)> = tx
        .prepare_cached(
            "SELECT l.id, f.name, l.status FROM legalities l
             JOIN formats f ON f.id = l.format_id
             WHERE l.card_id = ?1",
        )?
        .query_map(params![card_id], |row| {
            Ok((
                row.get(0)?,
                LegalityRecord {
                    format: row.get(1)?,
                    status: row.get(2)?,
                },
            ))
        })?
        .collect::<DbResult<_>>()?;

    let mut mutated = false;
    for entry in incoming {
        match existing.iter().find(|(_, have)| have.format == entry.format) {
            None => {
                let format_id = resolve_named(tx, FORMAT_SELECT, FORMAT_INSERT, &entry.format)?;
                tx.prepare_cached(
                    "INSERT INTO legalities (card_id, format_id, status) VALUES (?1, ?2, ?3)",
                )?
                .execute(params![card_id, format_id, entry.status])?;
                changes.record(
                    format!("legalities[{}]", entry.format),
                    None,
                    Some(entry.status.clone()),
                );
                mutated = true;
            }
            Some((id, have)) => {
                if have.status != entry.status && policy == ConflictPolicy::PreferIncoming {
                    tx.prepare_cached("UPDATE legalities SET status = ?1 WHERE id = ?2")?
                        .execute(params![entry.status, id])?;
                    changes.record(
                        format!("legalities[{}]", entry.format),
                        Some(have.status.clone()),
                        Some(entry.status.clone()),
                    );
                    mutated = true;
                }
            }
        }
    }

    if policy == ConflictPolicy::PreferIncoming {
        for (id, have) in &existing {
            if !incoming.iter().any(|entry| entry.format == have.format) {
                tx.prepare_cached("DELETE FROM legalities WHERE id = ?1")?
                    .execute(params![id])?;
                changes.record(
                    format!("legalities[{}]", have.format),
                    Some(have.status.clone()),
                    None,
                );
                mutated = true;
            }
        }
    }

    Ok(mutated)
}

fn sync_variants(
    tx: &Transaction<'_>,
    card_id: i64,
    incoming: &[VariantRecord],
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let existing: Vec<(i64, String)> = tx
        .prepare_cached("SELECT id, kind FROM variants WHERE card_id = ?1")?
        .query_map(params![card_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<DbResult<_>>()?;

    let mut mutated = false;
    for entry in incoming {
        if !existing.iter().any(|(_, kind)| *kind == entry.kind) {
            tx.prepare_cached("INSERT INTO variants (card_id, kind) VALUES (?1, ?2)")?
                .execute(params![card_id, entry.kind])?;
            changes.record(
                format!("variants[{}]", entry.kind),
                None,
                Some("added".to_string()),
            );
            mutated = true;
        }
    }

    if policy == ConflictPolicy::PreferIncoming {
        for (id, kind) in &existing {
            if !incoming.iter().any(|entry| entry.kind == *kind) {
                tx.prepare_cached("DELETE FROM variants WHERE id = ?1")?
                    .execute(params![id])?;
                changes.record(
                    format!("variants[{kind}]"),
                    Some("present".to_string()),
                    None,
                );
                mutated = true;
            }
        }
    }

    Ok(mutated)
}

fn sync_images(
    tx: &Transaction<'_>,
    card_id: i64,
    incoming: &[ImageRecord],
    policy: ConflictPolicy,
    changes: &mut ChangeSet,
) -> DbResult<bool> {
    let existing: Vec<(i64, ImageRecord)> = tx
        .prepare_cached(
            "SELECT id, kind, variant, small_url, large_url FROM images WHERE card_id = ?1",
        )?
        .query_map(params![card_id], |row| {
            Ok((
                row.get(0)?,
                ImageRecord {
                    kind: row.get(1)?,
                    variant: row.get(2)?,
                    small_url: row.get(3)?,
                    large_url: row.get(4)?,
                },
            ))
        })?
        .collect::<DbResult<_>>()?;

    let image_key = |image: &ImageRecord| (image.kind.clone(), image.variant.clone());

    let mut mutated = false;
    for entry in incoming {
        match existing
            .iter()
            .find(|(_, have)| image_key(have) == image_key(entry))
        {
            None => {
                tx.prepare_cached(
                    "INSERT INTO images (card_id, kind, variant, small_url, large_url)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![
                    card_id,
                    entry.kind,
                    entry.variant,
                    entry.small_url,
                    entry.large_url
                ])?;
                changes.record(
                    format!("images[{}]", entry.kind),
                    None,
                    Some("added".to_string()),
                );
                mutated = true;
            }
            Some((id, have)) => {
                let (small_url, small_changed) = merge_field(
                    changes,
                    format!("images[{}].small_url", entry.kind),
                    &have.small_url,
                    &entry.small_url,
                    policy,
                );
                let (large_url, large_changed) = merge_field(
                    changes,
                    format!("images[{}].large_url", entry.kind),
                    &have.large_url,
                    &entry.large_url,
                    policy,
                );
                if small_changed || large_changed {
                    tx.prepare_cached(
                        "UPDATE images SET small_url = ?1, large_url = ?2 WHERE id = ?3",
                    )?
                    .execute(params![small_url, large_url, id])?;
                    mutated = true;
                }
            }
        }
    }

    if policy == ConflictPolicy::PreferIncoming {
        for (id, have) in &existing {
            if !incoming
                .iter()
                .any(|entry| image_key(entry) == image_key(have))
            {
                tx.prepare_cached("DELETE FROM images WHERE id = ?1")?
                    .execute(params![id])?;
                changes.record(
                    format!("images[{}]", have.kind),
                    Some("present".to_string()),
                    None,
                );
                mutated = true;
            }
        }
    }

    Ok(mutated)
}

// ----- prices -----

fn append_prices(tx: &Transaction<'_>, card_id: i64, prices: &[PricePoint]) -> DbResult<usize> {
    let mut insert = tx.prepare_cached(
        "INSERT OR IGNORE INTO price_points (card_id, source, collected_on, amount, currency)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut appended = 0;
    for price in prices {
        appended += insert.execute(params![
            card_id,
            price.source,
            price.collected_on.to_string(),
            price.amount,
            price.currency,
        ])?;
    }
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_store;
    use chrono::NaiveDate;

    fn test_db() -> Connection {
        open_memory_store().unwrap()
    }

    fn charizard() -> CanonicalRecord {
        CanonicalRecord {
            hp: Some(120),
            primary_class: Some("Fire".to_string()),
            rarity: Some("Rare Holo".to_string()),
            artist: Some("Mitsuhiro Arita".to_string()),
            set: SetRef {
                series: Some(SeriesRef {
                    name: "Base".to_string(),
                    ..Default::default()
                }),
                code: "base1".to_string(),
                name: Some("Base".to_string()),
                release_date: NaiveDate::from_ymd_opt(1999, 1, 9),
                total_cards: Some(102),
                ..Default::default()
            },
            attacks: Some(vec![AttackRecord {
                name: "Fire Spin".to_string(),
                cost: vec![CostEntry {
                    energy: "Fire".to_string(),
                    amount: 4,
                }],
                damage: Some("100".to_string()),
                text: Some("Discard 2 Energy.".to_string()),
            }]),
            weaknesses: Some(vec![TypedModifier {
                energy: "Water".to_string(),
                modifier: Some("x2".to_string()),
            }]),
            ..CanonicalRecord::new("Charizard", "4", "base1")
        }
    }

    fn bite(damage: &str, amount: i64) -> AttackRecord {
        AttackRecord {
            name: "Bite".to_string(),
            cost: vec![CostEntry {
                energy: "Colorless".to_string(),
                amount,
            }],
            damage: Some(damage.to_string()),
            text: None,
        }
    }

    fn count(conn: &Connection, table_query: &str) -> i64 {
        conn.query_row(table_query, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn inserting_a_new_card_reports_created() {
        let mut conn = test_db();
        let outcome = upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert!(outcome.card_id > 0);
        assert!(!outcome.changes.is_empty());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM cards"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attack_costs"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM weaknesses"), 1);
    }

    #[test]
    fn resyncing_an_identical_record_is_unchanged() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();
        let outcome = upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Unchanged);
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.prices_appended, 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM cards"), 1);
    }

    #[test]
    fn same_named_attacks_resync_unchanged() {
        let mut conn = test_db();
        // Attacks sharing a name at different positions, as on cards
        // that print one attack twice with different costs.
        let mut record = charizard();
        record.attacks = Some(vec![bite("10", 1), bite("20", 2)]);

        let first = upsert_card(&mut conn, &record, UpsertOptions::default()).unwrap();
        assert_eq!(first.action, UpsertAction::Created);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 2);

        let second = upsert_card(&mut conn, &record, UpsertOptions::default()).unwrap();
        assert_eq!(second.action, UpsertAction::Unchanged);
        assert!(second.changes.is_empty());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 2);
    }

    #[test]
    fn shrinking_same_named_attacks_drops_the_extra_row() {
        let mut conn = test_db();
        let mut twins = charizard();
        twins.attacks = Some(vec![bite("10", 1), bite("20", 2)]);
        upsert_card(&mut conn, &twins, UpsertOptions::default()).unwrap();

        let mut single = charizard();
        single.attacks = Some(vec![bite("10", 1)]);
        let outcome = upsert_card(&mut conn, &single, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 1);
        let damage: String = conn
            .query_row("SELECT damage FROM attacks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(damage, "10");
    }

    #[test]
    fn differing_scalar_prefers_incoming_by_default() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        let mut newer = charizard();
        newer.hp = Some(130);
        let outcome = upsert_card(&mut conn, &newer, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        assert!(outcome.changes.touches("hp"));
        let hp: i64 = conn
            .query_row("SELECT hp FROM cards", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hp, 130);
    }

    #[test]
    fn prefer_existing_keeps_conflicts_but_fills_gaps() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        let mut incoming = charizard();
        incoming.hp = Some(130);
        incoming.rule_text = Some("Stage 2 rules.".to_string());
        let options = UpsertOptions {
            policy: ConflictPolicy::PreferExisting,
            dry_run: false,
        };
        let outcome = upsert_card(&mut conn, &incoming, options).unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        let (hp, rule_text): (i64, Option<String>) = conn
            .query_row("SELECT hp, rule_text FROM cards", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(hp, 120);
        assert_eq!(rule_text.as_deref(), Some("Stage 2 rules."));
    }

    #[test]
    fn unknown_child_group_is_left_untouched() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        // A source that does not report attacks at all.
        let mut partial = CanonicalRecord::new("Charizard", "4", "base1");
        partial.hp = Some(120);
        let outcome = upsert_card(&mut conn, &partial, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Unchanged);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM weaknesses"), 1);
    }

    #[test]
    fn known_empty_child_group_clears_rows() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        let mut cleared = charizard();
        cleared.attacks = Some(Vec::new());
        let outcome = upsert_card(&mut conn, &cleared, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        assert!(outcome.changes.touches("attacks[Fire Spin]"));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attack_costs"), 0);
        // The untouched groups survive.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM weaknesses"), 1);
    }

    #[test]
    fn prefer_existing_never_deletes_child_rows() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        let mut cleared = charizard();
        cleared.attacks = Some(Vec::new());
        let options = UpsertOptions {
            policy: ConflictPolicy::PreferExisting,
            dry_run: false,
        };
        let outcome = upsert_card(&mut conn, &cleared, options).unwrap();

        assert_eq!(outcome.action, UpsertAction::Unchanged);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attacks"), 1);
    }

    #[test]
    fn price_appends_never_flip_the_action() {
        let mut conn = test_db();
        let mut with_price = charizard();
        with_price.prices = vec![PricePoint {
            source: "tcgplayer".to_string(),
            collected_on: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: 350.0,
            currency: "USD".to_string(),
        }];
        upsert_card(&mut conn, &with_price, UpsertOptions::default()).unwrap();

        // Next day: identical card, new observation.
        let mut next_day = with_price.clone();
        next_day.prices[0].collected_on = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        next_day.prices[0].amount = 360.0;
        let outcome = upsert_card(&mut conn, &next_day, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Unchanged);
        assert_eq!(outcome.prices_appended, 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM price_points"), 2);

        // Same day again with a different amount: first write stands.
        let mut same_day = with_price.clone();
        same_day.prices[0].amount = 999.0;
        let outcome = upsert_card(&mut conn, &same_day, UpsertOptions::default()).unwrap();
        assert_eq!(outcome.prices_appended, 0);
        let first: f64 = conn
            .query_row(
                "SELECT amount FROM price_points WHERE collected_on = '2024-05-01'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!((first - 350.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dry_run_reports_the_outcome_without_writing() {
        let mut conn = test_db();
        let options = UpsertOptions {
            policy: ConflictPolicy::PreferIncoming,
            dry_run: true,
        };
        let outcome = upsert_card(&mut conn, &charizard(), options).unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert!(!outcome.changes.is_empty());
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM cards"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM series"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM price_points"), 0);
    }

    #[test]
    fn attack_cost_change_replaces_the_cost_rows() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        let mut rebalanced = charizard();
        rebalanced.attacks = Some(vec![AttackRecord {
            name: "Fire Spin".to_string(),
            cost: vec![
                CostEntry {
                    energy: "Fire".to_string(),
                    amount: 2,
                },
                CostEntry {
                    energy: "Colorless".to_string(),
                    amount: 2,
                },
            ],
            damage: Some("100".to_string()),
            text: Some("Discard 2 Energy.".to_string()),
        }]);
        let outcome = upsert_card(&mut conn, &rebalanced, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Updated);
        assert!(outcome.changes.touches("attacks[Fire Spin].cost"));

        let cost: Vec<(String, i64)> = conn
            .prepare(
                "SELECT e.name, ac.amount FROM attack_costs ac
                 JOIN energy_types e ON e.id = ac.energy_type_id
                 ORDER BY ac.position",
            )
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(
            cost,
            vec![
                ("Fire".to_string(), 2),
                ("Colorless".to_string(), 2),
            ]
        );
    }

    #[test]
    fn reference_entities_are_shared_by_name() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        let mut second = charizard();
        second.name = "Blastoise".to_string();
        second.number = "2".to_string();
        upsert_card(&mut conn, &second, UpsertOptions::default()).unwrap();

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM cards"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM artists"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM rarities"), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM sets"), 1);
    }

    #[test]
    fn set_metadata_fills_in_on_later_runs() {
        let mut conn = test_db();
        let mut sparse = charizard();
        sparse.set.total_cards = None;
        sparse.set.name = None;
        upsert_card(&mut conn, &sparse, UpsertOptions::default()).unwrap();

        let outcome = upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();
        assert_eq!(outcome.action, UpsertAction::Updated);
        assert!(outcome.changes.touches("set.total_cards"));

        let (name, total): (Option<String>, Option<i64>) = conn
            .query_row("SELECT name, total_cards FROM sets", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name.as_deref(), Some("Base"));
        assert_eq!(total, Some(102));
    }

    #[test]
    fn unmapped_sets_file_under_unclassified_until_a_series_shows_up() {
        let mut conn = test_db();
        let mut scraped = CanonicalRecord::new("Charizard", "4", "lp-706");
        scraped.set.series = None;
        upsert_card(&mut conn, &scraped, UpsertOptions::default()).unwrap();

        let series: String = conn
            .query_row(
                "SELECT se.name FROM sets s JOIN series se ON se.id = s.series_id",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(series, UNCLASSIFIED_SERIES);

        // A later record for the same set that knows the series
        // re-points it.
        let mut classified = CanonicalRecord::new("Charizard", "4", "lp-706");
        classified.set.series = Some(SeriesRef {
            name: "Base".to_string(),
            ..Default::default()
        });
        let outcome = upsert_card(&mut conn, &classified, UpsertOptions::default()).unwrap();
        assert_eq!(outcome.action, UpsertAction::Updated);
        assert!(outcome.changes.touches("set.series"));

        let series: String = conn
            .query_row(
                "SELECT se.name FROM sets s JOIN series se ON se.id = s.series_id",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(series, "Base");
    }

    #[test]
    fn card_numbers_are_identity_not_equal_strings() {
        let mut conn = test_db();
        upsert_card(&mut conn, &charizard(), UpsertOptions::default()).unwrap();

        // "4/102" is a different printed number than "4".
        let other_number = CanonicalRecord::new("Charizard", "4/102", "base1");
        let outcome = upsert_card(&mut conn, &other_number, UpsertOptions::default()).unwrap();

        assert_eq!(outcome.action, UpsertAction::Created);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM cards"), 2);
    }
}
