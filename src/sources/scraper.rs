//! HTML listing-site adapter.
//!
//! Scrapes one or more editions from a card listing site: the edition
//! search page yields links to per-card detail pages, and each detail
//! page is a heading plus key-value table rows. Parsing is kept in pure
//! functions over the HTML text so it can be tested offline; the site
//! reports no modification dates, so records from this source are always
//! included by a since-date sync.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking::Client;
use serde_json::Value;

use super::{RawRecord, SourceAdapter, SourceKind};
use crate::error::SourceError;

const USER_AGENT: &str = "catalog_sync/1.0";

lazy_static! {
    static ref CARD_LINK_RE: Regex =
        Regex::new(r#"<a[^>]+href="([^"]*view=cards/card[^"]*)""#).unwrap();
    static ref HEADING_RE: Regex = Regex::new(r"(?is)<h[1-3][^>]*>(.*?)</h[1-3]>").unwrap();
    static ref ROW_RE: Regex = Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap();
    static ref CELL_RE: Regex = Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]>").unwrap();
    static ref TAG_RE: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref SPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    static ref KEY_RE: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Settings for [`ScrapeSource`].
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub base_url: String,
    /// Edition ids to scrape, one listing page each.
    pub edids: Vec<String>,
    /// Pause between detail-page requests.
    pub delay_ms: u64,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            base_url: "https://www.ligapokemon.com.br".to_string(),
            edids: Vec::new(),
            delay_ms: 800,
        }
    }
}

/// Scraped-website source.
pub struct ScrapeSource {
    options: ScrapeOptions,
    client: Client,
}

impl ScrapeSource {
    pub fn new(options: ScrapeOptions) -> Self {
        Self {
            options,
            client: Client::new(),
        }
    }

    fn fetch_html(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status()));
        }
        Ok(response.text()?)
    }
}

impl SourceAdapter for ScrapeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Scraper
    }

    fn list_records(&mut self, _since: Option<NaiveDate>) -> Result<Vec<RawRecord>, SourceError> {
        if self.options.edids.is_empty() {
            return Err(SourceError::Malformed(
                "no edition ids configured for the scraper".to_string(),
            ));
        }

        let base = self.options.base_url.trim_end_matches('/');
        let mut records = Vec::new();

        for edid in &self.options.edids {
            let listing_url = format!(
                "{}/?view=cards/search&edid={}",
                base,
                urlencoding::encode(edid)
            );
            // A listing that cannot be fetched means the source is
            // unreachable, which is fatal; a single bad detail page is not.
            let listing_html = self.fetch_html(&listing_url)?;
            let links = parse_listing(&listing_html, &listing_url);
            log::info!("edition {}: {} card pages", edid, links.len());

            for link in links {
                let mut payload = match self.fetch_html(&link) {
                    Ok(detail_html) => parse_detail(&detail_html, &link),
                    Err(err) => {
                        log::warn!("card page {} failed: {}", link, err);
                        serde_json::json!({ "link": link })
                    }
                };
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("edid".to_string(), Value::String(edid.clone()));
                }
                records.push(RawRecord::new(SourceKind::Scraper, payload));

                if self.options.delay_ms > 0 {
                    thread::sleep(Duration::from_millis(self.options.delay_ms));
                }
            }
        }

        Ok(records)
    }
}

/// Extracts card detail links from a listing page, deduplicated in
/// document order and resolved against the listing URL.
pub fn parse_listing(html: &str, base_url: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for caps in CARD_LINK_RE.captures_iter(html) {
        let url = join_url(base_url, &caps[1]);
        if seen.insert(url.clone()) {
            links.push(url);
        }
    }
    links
}

/// Parses a detail page into a flat JSON object: the first heading
/// becomes `name`, and every table row with at least two cells becomes
/// a `snake_case_label -> value` pair.
pub fn parse_detail(html: &str, url: &str) -> Value {
    let mut fields = serde_json::Map::new();
    fields.insert("link".to_string(), Value::String(url.to_string()));

    if let Some(caps) = HEADING_RE.captures(html) {
        let name = clean_text(&caps[1]);
        if !name.is_empty() {
            fields.insert("name".to_string(), Value::String(name));
        }
    }

    for row in ROW_RE.captures_iter(html) {
        let row_html = row.get(1).map(|m| m.as_str()).unwrap_or("");
        let cells: Vec<&str> = CELL_RE
            .captures_iter(row_html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        if cells.len() < 2 {
            continue;
        }
        let key = norm_key(cells[0]);
        let value = clean_text(cells[1]);
        if !key.is_empty() && !value.is_empty() {
            fields.insert(key, Value::String(value));
        }
    }

    Value::Object(fields)
}

/// Tag-stripped, entity-decoded, whitespace-collapsed text.
fn clean_text(html: &str) -> String {
    let no_tags = TAG_RE.replace_all(html, " ");
    let decoded = no_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    SPACE_RE.replace_all(&decoded, " ").trim().to_string()
}

/// Table label -> lookup key ("Raridade" -> "raridade", "HP " -> "hp").
fn norm_key(label: &str) -> String {
    let cleaned = clean_text(label).to_lowercase();
    KEY_RE.replace_all(&cleaned, "_").trim_matches('_').to_string()
}

fn join_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(query) = href.strip_prefix('?') {
        let path = base.split('?').next().unwrap_or(base);
        return format!("{path}?{query}");
    }
    let without_query = base.split('?').next().unwrap_or(base);
    let path_start = without_query.find("://").map(|i| i + 3).unwrap_or(0);
    if href.starts_with('/') {
        let host_end = without_query[path_start..]
            .find('/')
            .map(|i| path_start + i)
            .unwrap_or(without_query.len());
        return format!("{}{}", &without_query[..host_end], href);
    }
    // Relative href replaces the last path segment.
    match without_query.rfind('/') {
        Some(idx) if idx >= path_start => format!("{}/{}", &without_query[..idx], href),
        _ => format!("{}/{}", without_query.trim_end_matches('/'), href),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING_HTML: &str = r#"
        <div class="grid">
          <a href="?view=cards/card&card=Charizard+(4/102)"><img src="a.png"></a>
          <a href="?view=cards/card&card=Charizard+(4/102)">Charizard</a>
          <a href="?view=cards/card&card=Blastoise+(2/102)">Blastoise</a>
          <a href="?view=decks/deck&id=9">not a card</a>
        </div>
    "#;

    const DETAIL_HTML: &str = r#"
        <html><body>
        <h1>Charizard <span>(4/102)</span></h1>
        <table>
          <tr><th>Número</th><td>4/102</td></tr>
          <tr><th>Raridade</th><td>Holo Rare</td></tr>
          <tr><th>Tipo</th><td>Fire</td></tr>
          <tr><th>HP</th><td>120</td></tr>
          <tr><th>Expansão</th><td>Base Set</td></tr>
          <tr><td colspan="2">decorative row</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_parse_listing_dedupes_and_resolves_links() {
        let base = "https://cards.example/?view=cards/search&edid=706";
        let links = parse_listing(LISTING_HTML, base);
        assert_eq!(
            links,
            vec![
                "https://cards.example/?view=cards/card&card=Charizard+(4/102)".to_string(),
                "https://cards.example/?view=cards/card&card=Blastoise+(2/102)".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_detail_extracts_heading_and_rows() {
        let payload = parse_detail(DETAIL_HTML, "https://cards.example/?view=cards/card&card=x");
        assert_eq!(payload["name"], "Charizard (4/102)");
        assert_eq!(payload["n_mero"], "4/102");
        assert_eq!(payload["raridade"], "Holo Rare");
        assert_eq!(payload["tipo"], "Fire");
        assert_eq!(payload["hp"], "120");
        assert_eq!(payload["expans_o"], "Base Set");
        assert_eq!(
            payload["link"],
            "https://cards.example/?view=cards/card&card=x"
        );
    }

    #[test]
    fn test_parse_detail_skips_single_cell_rows() {
        let payload = parse_detail(DETAIL_HTML, "https://x.example/");
        assert!(payload.get("decorative_row").is_none());
    }

    #[test]
    fn test_clean_text_strips_tags_and_entities() {
        assert_eq!(
            clean_text("  <b>Fire&nbsp;&amp;\n Water</b> "),
            "Fire & Water"
        );
    }

    #[test]
    fn test_join_url_variants() {
        assert_eq!(
            join_url("https://a.example/?x=1", "?view=cards/card&id=2"),
            "https://a.example/?view=cards/card&id=2"
        );
        assert_eq!(
            join_url("https://a.example/list?x=1", "/img/card.png"),
            "https://a.example/img/card.png"
        );
        assert_eq!(
            join_url("https://a.example/list", "detail.html"),
            "https://a.example/detail.html"
        );
        assert_eq!(join_url("https://a.example", "https://b.example/p"), "https://b.example/p");
    }
}
