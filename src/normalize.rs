//! Raw payload -> canonical record mapping, one routine per source.
//!
//! The normalizer is the only component that knows source shapes. It
//! emits exactly what each source reports: a child collection key that
//! is absent from the payload becomes `None` (unknown), a present key
//! becomes `Some` even when empty. Energy costs, weaknesses and
//! resistances are recomputed fully from the payload on every call.
//!
//! Identifying fields (name, number, set reference) are required and
//! fail normalization when absent; everything else degrades to `None`.

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::NormalizationError;
use crate::record::{
    AbilityRecord, AttackRecord, CanonicalRecord, CostEntry, ImageRecord, LegalityRecord,
    PricePoint, SeriesRef, SetRef, TypedModifier, VariantRecord,
};
use crate::sources::{RawRecord, SourceKind};

/// Series a set is filed under when no source reports one and no
/// mapping entry matches its code.
pub const UNCLASSIFIED_SERIES: &str = "Unclassified";

/// Set-code prefixes for the sources that report no series grouping.
const DEFAULT_SERIES_PREFIXES: &[(&str, &str)] = &[
    ("base", "Base"),
    ("gym", "Gym"),
    ("neo", "Neo"),
    ("ecard", "E-Card"),
    ("ex", "EX"),
    ("dp", "Diamond & Pearl"),
    ("pl", "Platinum"),
    ("hgss", "HeartGold & SoulSilver"),
    ("col", "Call of Legends"),
    ("bw", "Black & White"),
    ("xy", "XY"),
    ("sm", "Sun & Moon"),
    ("swsh", "Sword & Shield"),
    ("sv", "Scarlet & Violet"),
    ("pop", "POP"),
];

/// Maps set codes to series names by longest matching prefix. Codes
/// with no matching entry resolve to nothing; the store files those
/// under the unclassified series at insert time without ever
/// overwriting a series a source actually reported.
#[derive(Debug, Clone)]
pub struct SeriesMapping {
    entries: Vec<(String, String)>,
}

impl Default for SeriesMapping {
    fn default() -> Self {
        Self {
            entries: DEFAULT_SERIES_PREFIXES
                .iter()
                .map(|(prefix, series)| (prefix.to_string(), series.to_string()))
                .collect(),
        }
    }
}

impl SeriesMapping {
    pub fn with_entries(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    pub fn resolve(&self, set_code: &str) -> Option<String> {
        let slug = slugify(set_code);
        let mut best: Option<&(String, String)> = None;
        for entry in &self.entries {
            if slug.starts_with(entry.0.as_str()) {
                match best {
                    Some(current) if current.0.len() >= entry.0.len() => {}
                    _ => best = Some(entry),
                }
            }
        }
        best.map(|(_, series)| series.clone())
    }
}

/// Stateless apart from run-level context: the collection date used for
/// price points without a source-reported date, the series mapping, and
/// the preferred language for localized name objects.
pub struct Normalizer {
    today: NaiveDate,
    series: SeriesMapping,
    lang: String,
}

impl Normalizer {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            series: SeriesMapping::default(),
            lang: "en".to_string(),
        }
    }

    pub fn with_series_mapping(mut self, series: SeriesMapping) -> Self {
        self.series = series;
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn normalize(&self, raw: &RawRecord) -> Result<CanonicalRecord, NormalizationError> {
        let mut record = match raw.kind {
            SourceKind::Api => self.normalize_api(&raw.payload)?,
            SourceKind::Dump => self.normalize_dump(&raw.payload)?,
            SourceKind::Scraper => self.normalize_scraper(&raw.payload)?,
        };
        if record.set.series.is_none() {
            record.set.series = self.series.resolve(&record.set.code).map(|name| SeriesRef {
                name,
                ..Default::default()
            });
        }
        Ok(record)
    }

    // ----- remote API payloads -----

    fn normalize_api(&self, payload: &Value) -> Result<CanonicalRecord, NormalizationError> {
        let name = required_str(payload, "name", "name")?;
        let number = required_str(payload, "number", "number")?;
        let set = api_set(payload)?;

        let types = string_list(payload.get("types"));
        let rules = string_list(payload.get("rules"));

        Ok(CanonicalRecord {
            name,
            number,
            set,
            hp: str_field(payload, "hp").and_then(first_number),
            primary_class: types.first().cloned(),
            secondary_class: types.get(1).cloned(),
            rarity: str_field(payload, "rarity").map(str::to_string),
            artist: str_field(payload, "artist").map(str::to_string),
            rule_text: if rules.is_empty() {
                None
            } else {
                Some(rules.join("\n"))
            },
            footer_text: str_field(payload, "flavorText").map(str::to_string),
            language: None,
            published: None,
            abilities: api_abilities(payload),
            attacks: api_attacks(payload),
            weaknesses: typed_list(payload, "weaknesses"),
            resistances: typed_list(payload, "resistances"),
            legalities: api_legalities(payload),
            variants: None,
            images: api_images(payload),
            prices: self.api_prices(payload),
            modified_on: None,
        })
    }

    fn api_prices(&self, payload: &Value) -> Vec<PricePoint> {
        let mut prices = Vec::new();
        if let Some(tcgplayer) = payload.get("tcgplayer") {
            if let Some(amount) = representative_price(tcgplayer.get("prices")) {
                prices.push(PricePoint {
                    source: "tcgplayer".to_string(),
                    collected_on: price_date(tcgplayer, self.today),
                    amount,
                    currency: "USD".to_string(),
                });
            }
        }
        if let Some(cardmarket) = payload.get("cardmarket") {
            let amount = cardmarket
                .get("prices")
                .and_then(|p| {
                    p.get("averageSellPrice")
                        .and_then(Value::as_f64)
                        .or_else(|| p.get("trendPrice").and_then(Value::as_f64))
                })
                .filter(|amount| *amount >= 0.0);
            if let Some(amount) = amount {
                prices.push(PricePoint {
                    source: "cardmarket".to_string(),
                    collected_on: price_date(cardmarket, self.today),
                    amount,
                    currency: "EUR".to_string(),
                });
            }
        }
        prices
    }

    // ----- offline dataset payloads -----

    fn normalize_dump(&self, payload: &Value) -> Result<CanonicalRecord, NormalizationError> {
        let lang = str_field(payload, "language").unwrap_or(self.lang.as_str());

        let name = payload
            .get("name")
            .and_then(|value| localized(value, lang))
            .ok_or_else(|| NormalizationError::new("name", "missing card name"))?;
        let number = payload
            .get("localId")
            .and_then(scalar_string)
            .ok_or_else(|| NormalizationError::new("number", "missing localId"))?;
        let set = dump_set(payload, lang)?;

        let types = string_list(payload.get("types"));

        Ok(CanonicalRecord {
            name,
            number,
            set,
            hp: payload.get("hp").and_then(lenient_number),
            primary_class: types.first().cloned(),
            secondary_class: types.get(1).cloned(),
            rarity: payload.get("rarity").and_then(|v| localized(v, lang)),
            artist: str_field(payload, "illustrator").map(str::to_string),
            rule_text: payload.get("effect").and_then(|v| localized(v, lang)),
            footer_text: payload.get("description").and_then(|v| localized(v, lang)),
            language: Some(lang.to_string()),
            published: None,
            abilities: dump_abilities(payload, lang),
            attacks: dump_attacks(payload, lang),
            weaknesses: typed_list(payload, "weaknesses"),
            resistances: typed_list(payload, "resistances"),
            legalities: dump_legalities(payload),
            variants: dump_variants(payload),
            images: None,
            prices: Vec::new(),
            modified_on: str_field(payload, "modifiedOn").and_then(parse_date_flex),
        })
    }

    // ----- scraped payloads -----

    fn normalize_scraper(&self, payload: &Value) -> Result<CanonicalRecord, NormalizationError> {
        let name = first_key(payload, &["name", "nome"])
            .ok_or_else(|| NormalizationError::new("name", "missing card name"))?
            .to_string();
        let number = first_key(payload, &["numero", "n_mero", "number"])
            .ok_or_else(|| NormalizationError::new("number", "missing card number"))?
            .to_string();

        let set_name = first_key(
            payload,
            &["expansao", "expans_o", "edicao", "edi_o", "set", "edition", "set_name"],
        )
        .map(str::to_string);
        let code = match (str_field(payload, "edid"), &set_name) {
            (Some(edid), _) => format!("lp-{edid}"),
            (None, Some(set_name)) => slugify(set_name),
            (None, None) => {
                return Err(NormalizationError::new("set", "no edition id or set name"))
            }
        };

        let weaknesses = first_key(payload, &["fraqueza", "weakness"])
            .map(|value| parse_typed_modifier(value).into_iter().collect());
        let resistances = first_key(payload, &["resistencia", "resist_ncia", "resistance"])
            .map(|value| parse_typed_modifier(value).into_iter().collect());

        let variants = first_key(payload, &["holo"]).and_then(|value| {
            let affirmative = matches!(
                value.to_lowercase().as_str(),
                "sim" | "yes" | "true" | "1" | "holo"
            );
            affirmative.then(|| {
                vec![VariantRecord {
                    kind: "holo".to_string(),
                }]
            })
        });

        let images = first_key(payload, &["imagem", "image", "image_url"]).map(|url| {
            vec![ImageRecord {
                kind: "default".to_string(),
                variant: None,
                small_url: None,
                large_url: Some(url.to_string()),
            }]
        });

        let prices = first_key(payload, &["preco", "pre_o", "price"])
            .and_then(parse_money)
            .map(|amount| {
                vec![PricePoint {
                    source: "scraper".to_string(),
                    collected_on: self.today,
                    amount,
                    currency: "BRL".to_string(),
                }]
            })
            .unwrap_or_default();

        Ok(CanonicalRecord {
            name,
            number,
            set: SetRef {
                series: None,
                code,
                name: set_name,
                release_date: None,
                total_cards: None,
                symbol_url: None,
                logo_url: None,
            },
            hp: first_key(payload, &["hp"]).and_then(first_number),
            primary_class: first_key(payload, &["tipo", "type"]).map(str::to_string),
            secondary_class: None,
            rarity: first_key(payload, &["raridade", "rarity"]).map(str::to_string),
            artist: first_key(payload, &["ilustrador", "illustrator", "artista", "artist"])
                .map(str::to_string),
            rule_text: None,
            footer_text: first_key(payload, &["descricao", "descri_o", "description"])
                .map(str::to_string),
            language: first_key(payload, &["idioma", "language"]).map(str::to_string),
            published: None,
            abilities: None,
            attacks: None,
            weaknesses,
            resistances,
            legalities: None,
            variants,
            images,
            prices,
            modified_on: None,
        })
    }
}

// ----- shared field helpers -----

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str(value: &Value, key: &str, field: &'static str) -> Result<String, NormalizationError> {
    str_field(value, key)
        .map(str::to_string)
        .ok_or_else(|| NormalizationError::new(field, format!("missing {key}")))
}

fn first_key<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| str_field(payload, key))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// String or number -> trimmed string; anything else is absent.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Localized name objects ({"en": ..., "pt": ...}) or plain strings.
fn localized(value: &Value, lang: &str) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Object(map) => map
            .get(lang)
            .or_else(|| map.get("en"))
            .or_else(|| map.values().next())
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// First run of digits anywhere in the text ("110 HP" -> 110).
fn first_number(text: &str) -> Option<i64> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

/// JSON number or numeric string -> i64.
fn lenient_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => first_number(s),
        _ => None,
    }
}

/// Accepts both date orders the sources print ("1999-01-09", "1999/01/09").
pub fn parse_date_flex(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text.trim(), "%Y/%m/%d"))
        .ok()
}

/// Canonical energy name for a cost symbol. Single letters decode via
/// the printed cost codes; full names pass through unchanged.
pub fn energy_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let decoded = match trimmed.to_uppercase().as_str() {
        "G" => "Grass",
        "R" => "Fire",
        "W" => "Water",
        "L" => "Lightning",
        "P" => "Psychic",
        "F" => "Fighting",
        "D" => "Darkness",
        "M" => "Metal",
        "Y" => "Fairy",
        "N" => "Dragon",
        "C" => "Colorless",
        _ => return trimmed.to_string(),
    };
    decoded.to_string()
}

/// Folds an ordered cost symbol list into (energy, amount) entries,
/// preserving first-appearance order.
fn fold_costs(symbols: &[String]) -> Vec<CostEntry> {
    let mut entries: Vec<CostEntry> = Vec::new();
    for symbol in symbols {
        let energy = energy_name(symbol);
        if let Some(entry) = entries.iter_mut().find(|e| e.energy == energy) {
            entry.amount += 1;
        } else {
            entries.push(CostEntry { energy, amount: 1 });
        }
    }
    entries
}

/// Lowercase, non-alphanumeric runs collapsed to single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// "W x2" -> Water with modifier "x2"; bare energy tokens keep no
/// modifier.
fn parse_typed_modifier(raw: &str) -> Option<TypedModifier> {
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let energy_token = parts.next()?.trim();
    if energy_token.is_empty() {
        return None;
    }
    let modifier = parts
        .next()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());
    Some(TypedModifier {
        energy: energy_name(energy_token),
        modifier,
    })
}

/// Price text with either decimal convention ("R$ 1.234,56", "$3.99").
fn parse_money(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', ".")
    };
    normalized.parse().ok()
}

// ----- API shapes -----

fn api_set(payload: &Value) -> Result<SetRef, NormalizationError> {
    let set = payload
        .get("set")
        .ok_or_else(|| NormalizationError::new("set", "missing set object"))?;
    let code = str_field(set, "id")
        .ok_or_else(|| NormalizationError::new("set", "missing set id"))?
        .to_string();
    let images = set.get("images");
    Ok(SetRef {
        series: str_field(set, "series").map(|name| SeriesRef {
            name: name.to_string(),
            ..Default::default()
        }),
        code,
        name: str_field(set, "name").map(str::to_string),
        release_date: str_field(set, "releaseDate").and_then(parse_date_flex),
        total_cards: set
            .get("printedTotal")
            .and_then(Value::as_i64)
            .or_else(|| set.get("total").and_then(Value::as_i64)),
        symbol_url: images
            .and_then(|i| str_field(i, "symbol"))
            .map(str::to_string),
        logo_url: images
            .and_then(|i| str_field(i, "logo"))
            .map(str::to_string),
    })
}

fn api_abilities(payload: &Value) -> Option<Vec<AbilityRecord>> {
    let list = payload.get("abilities")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|entry| {
                Some(AbilityRecord {
                    name: str_field(entry, "name")?.to_string(),
                    kind: str_field(entry, "type").map(str::to_string),
                    text: str_field(entry, "text").map(str::to_string),
                })
            })
            .collect(),
    )
}

fn api_attacks(payload: &Value) -> Option<Vec<AttackRecord>> {
    let list = payload.get("attacks")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|entry| {
                Some(AttackRecord {
                    name: str_field(entry, "name")?.to_string(),
                    cost: fold_costs(&string_list(entry.get("cost"))),
                    damage: entry.get("damage").and_then(scalar_string),
                    text: str_field(entry, "text").map(str::to_string),
                })
            })
            .collect(),
    )
}

/// Weakness/resistance arrays of {type, value}; shared by the API and
/// dump shapes.
fn typed_list(payload: &Value, key: &str) -> Option<Vec<TypedModifier>> {
    let list = payload.get(key)?.as_array()?;
    Some(
        list.iter()
            .filter_map(|entry| {
                Some(TypedModifier {
                    energy: energy_name(str_field(entry, "type")?),
                    modifier: entry.get("value").and_then(scalar_string),
                })
            })
            .collect(),
    )
}

fn api_legalities(payload: &Value) -> Option<Vec<LegalityRecord>> {
    let map = payload.get("legalities")?.as_object()?;
    Some(
        map.iter()
            .filter_map(|(format, status)| {
                Some(LegalityRecord {
                    format: format.clone(),
                    status: status.as_str()?.to_lowercase(),
                })
            })
            .collect(),
    )
}

fn api_images(payload: &Value) -> Option<Vec<ImageRecord>> {
    let images = payload.get("images")?;
    let small_url = str_field(images, "small").map(str::to_string);
    let large_url = str_field(images, "large").map(str::to_string);
    if small_url.is_none() && large_url.is_none() {
        return Some(Vec::new());
    }
    Some(vec![ImageRecord {
        kind: "default".to_string(),
        variant: None,
        small_url,
        large_url,
    }])
}

fn price_date(block: &Value, fallback: NaiveDate) -> NaiveDate {
    str_field(block, "updatedAt")
        .and_then(parse_date_flex)
        .unwrap_or(fallback)
}

fn representative_price(prices: Option<&Value>) -> Option<f64> {
    let map = prices?.as_object()?;
    for key in [
        "normal",
        "holofoil",
        "reverseHolofoil",
        "1stEditionNormal",
        "1stEditionHolofoil",
    ] {
        if let Some(amount) = map.get(key).and_then(variant_market) {
            return Some(amount);
        }
    }
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys.into_iter().find_map(|key| map.get(key).and_then(variant_market))
}

fn variant_market(entry: &Value) -> Option<f64> {
    ["market", "mid", "low"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_f64))
        .filter(|amount| *amount >= 0.0)
}

// ----- dump shapes -----

fn dump_set(payload: &Value, lang: &str) -> Result<SetRef, NormalizationError> {
    let set = payload
        .get("set")
        .ok_or_else(|| NormalizationError::new("set", "missing set object"))?;
    let code = str_field(set, "id")
        .ok_or_else(|| NormalizationError::new("set", "missing set id"))?
        .to_string();

    // The walker injects the serie as an object; older dataset layouts
    // carry just the serie id string.
    let series = set.get("serie").and_then(|serie| match serie {
        Value::Object(_) => serie.get("name").and_then(|n| localized(n, lang)).map(|name| {
            SeriesRef {
                name,
                code: str_field(serie, "id").map(str::to_string),
                release_date: None,
            }
        }),
        Value::String(id) if !id.trim().is_empty() => Some(SeriesRef {
            name: id.trim().to_string(),
            code: Some(id.trim().to_string()),
            release_date: None,
        }),
        _ => None,
    });

    let card_count = set.get("cardCount");
    Ok(SetRef {
        series,
        code,
        name: set.get("name").and_then(|n| localized(n, lang)),
        release_date: str_field(set, "releaseDate").and_then(parse_date_flex),
        total_cards: card_count
            .and_then(|c| c.get("official"))
            .and_then(Value::as_i64)
            .or_else(|| card_count.and_then(|c| c.get("total")).and_then(Value::as_i64)),
        symbol_url: None,
        logo_url: None,
    })
}

fn dump_abilities(payload: &Value, lang: &str) -> Option<Vec<AbilityRecord>> {
    let list = payload.get("abilities")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|entry| {
                Some(AbilityRecord {
                    name: entry.get("name").and_then(|n| localized(n, lang))?,
                    kind: str_field(entry, "type").map(str::to_string),
                    text: entry.get("effect").and_then(|e| localized(e, lang)),
                })
            })
            .collect(),
    )
}

fn dump_attacks(payload: &Value, lang: &str) -> Option<Vec<AttackRecord>> {
    let list = payload.get("attacks")?.as_array()?;
    Some(
        list.iter()
            .filter_map(|entry| {
                Some(AttackRecord {
                    name: entry.get("name").and_then(|n| localized(n, lang))?,
                    cost: fold_costs(&string_list(entry.get("cost"))),
                    damage: entry.get("damage").and_then(scalar_string),
                    text: entry.get("effect").and_then(|e| localized(e, lang)),
                })
            })
            .collect(),
    )
}

fn dump_legalities(payload: &Value) -> Option<Vec<LegalityRecord>> {
    let map = payload.get("legal")?.as_object()?;
    Some(
        map.iter()
            .filter_map(|(format, status)| {
                let status = match status {
                    Value::Bool(true) => "legal".to_string(),
                    Value::Bool(false) => "not-legal".to_string(),
                    Value::String(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
                    _ => return None,
                };
                Some(LegalityRecord {
                    format: format.clone(),
                    status,
                })
            })
            .collect(),
    )
}

fn dump_variants(payload: &Value) -> Option<Vec<VariantRecord>> {
    let map = payload.get("variants")?.as_object()?;
    Some(
        map.iter()
            .filter(|(_, enabled)| enabled.as_bool() == Some(true))
            .map(|(kind, _)| VariantRecord { kind: kebab(kind) })
            .collect(),
    )
}

/// camelCase variant keys -> kebab-case kinds ("firstEdition" ->
/// "first-edition").
fn kebab(text: &str) -> String {
    let mut out = String::new();
    for ch in text.chars() {
        if ch.is_uppercase() {
            if !out.is_empty() {
                out.push('-');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> Normalizer {
        Normalizer::new(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    fn api_record(payload: Value) -> RawRecord {
        RawRecord::new(SourceKind::Api, payload)
    }

    fn dump_record(payload: Value) -> RawRecord {
        RawRecord::new(SourceKind::Dump, payload)
    }

    fn scraper_record(payload: Value) -> RawRecord {
        RawRecord::new(SourceKind::Scraper, payload)
    }

    #[test]
    fn test_api_full_payload_maps_every_field_group() {
        let payload = json!({
            "name": "Charizard",
            "number": "4",
            "hp": "120",
            "types": ["Fire"],
            "rarity": "Rare Holo",
            "artist": "Mitsuhiro Arita",
            "flavorText": "Spits fire that is hot enough to melt boulders.",
            "abilities": [
                {"name": "Energy Burn", "text": "All Energy becomes Fire.", "type": "Pokemon Power"}
            ],
            "attacks": [
                {"name": "Fire Spin", "cost": ["Fire", "Fire", "Fire", "Fire"], "damage": "100", "text": "Discard 2 Energy."}
            ],
            "weaknesses": [{"type": "Water", "value": "x2"}],
            "resistances": [{"type": "Fighting", "value": "-30"}],
            "legalities": {"unlimited": "Legal"},
            "images": {"small": "https://img.example/s.png", "large": "https://img.example/l.png"},
            "set": {
                "id": "base1",
                "name": "Base",
                "series": "Base",
                "printedTotal": 102,
                "total": 102,
                "releaseDate": "1999/01/09",
                "images": {"symbol": "https://img.example/sym.png", "logo": "https://img.example/logo.png"}
            },
            "tcgplayer": {
                "updatedAt": "2024/04/30",
                "prices": {"holofoil": {"market": 350.0, "low": 300.0}}
            },
            "cardmarket": {
                "updatedAt": "2024/04/29",
                "prices": {"averageSellPrice": 280.5}
            }
        });

        let record = normalizer().normalize(&api_record(payload)).unwrap();

        assert_eq!(record.name, "Charizard");
        assert_eq!(record.number, "4");
        assert_eq!(record.hp, Some(120));
        assert_eq!(record.primary_class.as_deref(), Some("Fire"));
        assert_eq!(record.set.code, "base1");
        assert_eq!(record.set.series.as_ref().unwrap().name, "Base");
        assert_eq!(record.set.total_cards, Some(102));
        assert_eq!(
            record.set.release_date,
            NaiveDate::from_ymd_opt(1999, 1, 9)
        );
        assert!(record.set.symbol_url.is_some());

        let attacks = record.attacks.as_ref().unwrap();
        assert_eq!(attacks.len(), 1);
        assert_eq!(attacks[0].cost, vec![CostEntry { energy: "Fire".to_string(), amount: 4 }]);

        let legalities = record.legalities.as_ref().unwrap();
        assert_eq!(legalities[0].format, "unlimited");
        assert_eq!(legalities[0].status, "legal");

        assert_eq!(record.prices.len(), 2);
        assert_eq!(record.prices[0].source, "tcgplayer");
        assert_eq!(record.prices[0].amount, 350.0);
        assert_eq!(
            record.prices[0].collected_on,
            NaiveDate::from_ymd_opt(2024, 4, 30).unwrap()
        );
        assert_eq!(record.prices[1].source, "cardmarket");
        assert_eq!(record.prices[1].currency, "EUR");

        // The API never reports variants, so they stay unknown.
        assert!(record.variants.is_none());
        assert!(record.modified_on.is_none());
    }

    #[test]
    fn test_api_missing_name_fails_normalization() {
        let err = normalizer()
            .normalize(&api_record(json!({"number": "4", "set": {"id": "base1"}})))
            .unwrap_err();
        assert_eq!(err.field, "name");
    }

    #[test]
    fn test_api_missing_set_fails_normalization() {
        let err = normalizer()
            .normalize(&api_record(json!({"name": "Charizard", "number": "4"})))
            .unwrap_err();
        assert_eq!(err.field, "set");
    }

    #[test]
    fn test_api_absent_children_stay_unknown_present_empty_is_known() {
        let absent = normalizer()
            .normalize(&api_record(json!({
                "name": "Pikachu", "number": "58", "set": {"id": "base1"}
            })))
            .unwrap();
        assert!(absent.abilities.is_none());
        assert!(absent.attacks.is_none());

        let empty = normalizer()
            .normalize(&api_record(json!({
                "name": "Pikachu", "number": "58", "set": {"id": "base1"},
                "attacks": []
            })))
            .unwrap();
        assert_eq!(empty.attacks, Some(Vec::new()));
    }

    #[test]
    fn test_api_unparseable_hp_becomes_none() {
        let record = normalizer()
            .normalize(&api_record(json!({
                "name": "Switch", "number": "95", "set": {"id": "base1"}, "hp": "None"
            })))
            .unwrap();
        assert_eq!(record.hp, None);
    }

    #[test]
    fn test_dump_resolves_localized_names_with_fallback() {
        let payload = json!({
            "name": {"en": "Charizard", "pt": "Charizard PT"},
            "localId": "4",
            "language": "pt",
            "set": {
                "id": "base1",
                "name": {"en": "Base Set"},
                "cardCount": {"official": 102, "total": 105},
                "serie": {"id": "base", "name": {"en": "Base"}}
            },
            "hp": 120,
            "rarity": "Rare",
            "attacks": [
                {"name": {"en": "Fire Spin"}, "cost": ["Fire", "Fire"], "damage": 100,
                 "effect": {"en": "Discard 2 Energy."}}
            ],
            "variants": {"normal": true, "holo": true, "reverse": false, "firstEdition": true},
            "legal": {"standard": false, "expanded": true},
            "modifiedOn": "2024-04-20"
        });

        let record = normalizer().normalize(&dump_record(payload)).unwrap();

        assert_eq!(record.name, "Charizard PT");
        assert_eq!(record.number, "4");
        assert_eq!(record.language.as_deref(), Some("pt"));
        // "pt" missing on the set name falls back to "en"
        assert_eq!(record.set.name.as_deref(), Some("Base Set"));
        assert_eq!(record.set.total_cards, Some(102));
        assert_eq!(record.set.series.as_ref().unwrap().name, "Base");
        assert_eq!(record.hp, Some(120));

        let attacks = record.attacks.as_ref().unwrap();
        assert_eq!(attacks[0].damage.as_deref(), Some("100"));
        assert_eq!(attacks[0].text.as_deref(), Some("Discard 2 Energy."));

        let mut variant_kinds: Vec<&str> = record
            .variants
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.kind.as_str())
            .collect();
        variant_kinds.sort();
        assert_eq!(variant_kinds, vec!["first-edition", "holo", "normal"]);

        let legalities = record.legalities.as_ref().unwrap();
        let standard = legalities.iter().find(|l| l.format == "standard").unwrap();
        assert_eq!(standard.status, "not-legal");

        assert_eq!(
            record.modified_on,
            NaiveDate::from_ymd_opt(2024, 4, 20)
        );
    }

    #[test]
    fn test_dump_serie_as_plain_string_still_resolves() {
        let payload = json!({
            "name": {"en": "Pikachu"},
            "localId": "58",
            "set": {"id": "base1", "serie": "base"}
        });
        let record = normalizer().normalize(&dump_record(payload)).unwrap();
        assert_eq!(record.set.series.as_ref().unwrap().name, "base");
    }

    #[test]
    fn test_dump_missing_local_id_fails() {
        let err = normalizer()
            .normalize(&dump_record(json!({
                "name": {"en": "Pikachu"}, "set": {"id": "base1"}
            })))
            .unwrap_err();
        assert_eq!(err.field, "number");
    }

    #[test]
    fn test_scraper_payload_maps_and_synthesizes_set() {
        let payload = json!({
            "name": "Charizard",
            "n_mero": "4/102",
            "raridade": "Holo Rare",
            "tipo": "Fire",
            "hp": "120",
            "expans_o": "Base Set",
            "edid": "706",
            "fraqueza": "W x2",
            "holo": "Sim",
            "pre_o": "R$ 1.234,56",
            "idioma": "pt"
        });

        let record = normalizer().normalize(&scraper_record(payload)).unwrap();

        assert_eq!(record.number, "4/102");
        assert_eq!(record.set.code, "lp-706");
        assert_eq!(record.set.name.as_deref(), Some("Base Set"));
        // No series grouping from the scraper and no mapping entry for
        // the synthesized code: the series stays unknown.
        assert!(record.set.series.is_none());

        let weaknesses = record.weaknesses.as_ref().unwrap();
        assert_eq!(weaknesses.len(), 1);
        assert_eq!(weaknesses[0].energy, "Water");
        assert_eq!(weaknesses[0].modifier.as_deref(), Some("x2"));

        assert_eq!(record.variants.as_ref().unwrap()[0].kind, "holo");
        assert!(record.attacks.is_none());
        assert!(record.abilities.is_none());

        assert_eq!(record.prices.len(), 1);
        assert_eq!(record.prices[0].amount, 1234.56);
        assert_eq!(record.prices[0].currency, "BRL");
        assert_eq!(
            record.prices[0].collected_on,
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn test_scraper_without_set_reference_fails() {
        let err = normalizer()
            .normalize(&scraper_record(json!({"name": "Charizard", "numero": "4"})))
            .unwrap_err();
        assert_eq!(err.field, "set");
    }

    #[test]
    fn test_scraper_negative_holo_stays_unknown() {
        let record = normalizer()
            .normalize(&scraper_record(json!({
                "name": "Pikachu", "numero": "58", "edid": "706", "holo": "Não"
            })))
            .unwrap();
        assert!(record.variants.is_none());
    }

    #[test]
    fn test_energy_letters_decode_and_names_pass_through() {
        assert_eq!(energy_name("R"), "Fire");
        assert_eq!(energy_name("c"), "Colorless");
        assert_eq!(energy_name("Water"), "Water");
        assert_eq!(energy_name(" Psychic "), "Psychic");
    }

    #[test]
    fn test_fold_costs_preserves_first_appearance_order() {
        let symbols = vec![
            "Colorless".to_string(),
            "Fire".to_string(),
            "Colorless".to_string(),
        ];
        assert_eq!(
            fold_costs(&symbols),
            vec![
                CostEntry { energy: "Colorless".to_string(), amount: 2 },
                CostEntry { energy: "Fire".to_string(), amount: 1 },
            ]
        );
    }

    #[test]
    fn test_series_mapping_prefers_longest_prefix() {
        let mapping = SeriesMapping::default();
        assert_eq!(mapping.resolve("swsh45").as_deref(), Some("Sword & Shield"));
        assert_eq!(mapping.resolve("ecard1").as_deref(), Some("E-Card"));
        assert_eq!(mapping.resolve("ex7").as_deref(), Some("EX"));
        assert_eq!(mapping.resolve("lp-706"), None);
    }

    #[test]
    fn test_series_mapping_accepts_custom_entries() {
        let mapping =
            SeriesMapping::with_entries(vec![("lp".to_string(), "Liga".to_string())]);
        assert_eq!(mapping.resolve("lp-706").as_deref(), Some("Liga"));
    }

    #[test]
    fn test_scraper_set_name_with_mapped_prefix_gets_a_series() {
        let record = normalizer()
            .normalize(&scraper_record(json!({
                "name": "Pikachu", "numero": "58", "set": "Base Set"
            })))
            .unwrap();
        // Without an edition id the code is slugified from the set
        // name, which the default prefix table can classify.
        assert_eq!(record.set.code, "base-set");
        assert_eq!(record.set.series.as_ref().unwrap().name, "Base");
    }

    #[test]
    fn test_slugify_flattens_case_and_punctuation() {
        assert_eq!(slugify("Base Set"), "base-set");
        assert_eq!(slugify("  Sword & Shield  "), "sword-shield");
        assert_eq!(slugify("base1"), "base1");
    }

    #[test]
    fn test_parse_money_handles_both_decimal_conventions() {
        assert_eq!(parse_money("R$ 1.234,56"), Some(1234.56));
        assert_eq!(parse_money("12,34"), Some(12.34));
        assert_eq!(parse_money("$3.99"), Some(3.99));
        assert_eq!(parse_money("n/a"), None);
    }

    #[test]
    fn test_parse_date_flex_accepts_both_orders() {
        let expected = NaiveDate::from_ymd_opt(1999, 1, 9);
        assert_eq!(parse_date_flex("1999-01-09"), expected);
        assert_eq!(parse_date_flex("1999/01/09"), expected);
        assert_eq!(parse_date_flex("09.01.1999"), None);
    }
}
