//! Remote card API adapter (paginated JSON over HTTP).
//!
//! Pulls card payloads page by page from a Pokemon TCG API v2 compatible
//! endpoint. Rate limiting is handled here: a configurable pause between
//! pages plus bounded retries with exponential backoff on 429 and 5xx.
//! The API reports no per-card modification date, so records from this
//! source carry no `modifiedOn` and a since-date sync includes all of
//! them.

use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::{RawRecord, SourceAdapter, SourceKind};
use crate::error::SourceError;

/// Public v2 endpoint; override with `ApiOptions::base_url` for mirrors.
pub const DEFAULT_API_BASE: &str = "https://api.pokemontcg.io/v2";

const USER_AGENT: &str = "catalog_sync/1.0";
const RETRY_BASE_MS: u64 = 500;

/// Connection settings for [`ApiSource`].
#[derive(Debug, Clone)]
pub struct ApiOptions {
    pub base_url: String,
    /// Sent as `X-Api-Key` when present; the public API works without
    /// one at a lower rate limit.
    pub api_key: Option<String>,
    pub page_size: u32,
    /// Pause between page requests.
    pub delay_ms: u64,
    pub retries: u32,
    /// Set codes to restrict the server-side query to. The orchestrator
    /// filters again after normalization, so this only trims traffic.
    pub sets: Option<Vec<String>>,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            page_size: 250,
            delay_ms: 100,
            retries: 3,
            sets: None,
        }
    }
}

/// One page of the API's card envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct CardPage {
    data: Vec<Value>,
    #[serde(default)]
    count: u32,
    #[serde(default)]
    total_count: u32,
}

/// Paginated API source.
pub struct ApiSource {
    options: ApiOptions,
    client: Client,
}

impl ApiSource {
    pub fn new(options: ApiOptions) -> Self {
        Self {
            options,
            client: Client::new(),
        }
    }

    /// GET with bounded retries; 429 and 5xx back off and retry, any
    /// other non-success status fails immediately.
    fn get_with_retries(&self, url: &str) -> Result<Response, SourceError> {
        let max_attempts = self.options.retries.saturating_add(1).max(1);

        for attempt in 1..=max_attempts {
            let mut request = self.client.get(url).header("User-Agent", USER_AGENT);
            if let Some(key) = &self.options.api_key {
                request = request.header("X-Api-Key", key);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if !retryable || attempt >= max_attempts {
                        return Err(SourceError::HttpStatus(status));
                    }
                    log::warn!(
                        "HTTP {} from {} (attempt {}/{}), backing off",
                        status,
                        url,
                        attempt,
                        max_attempts
                    );
                }
                Err(err) => {
                    if attempt >= max_attempts {
                        return Err(SourceError::Network(err));
                    }
                    log::warn!(
                        "request to {} failed (attempt {}/{}): {}",
                        url,
                        attempt,
                        max_attempts,
                        err
                    );
                }
            }

            let exp = (attempt - 1).min(6);
            thread::sleep(Duration::from_millis(
                RETRY_BASE_MS * 2u64.saturating_pow(exp),
            ));
        }

        unreachable!("retry loop always returns");
    }

    fn fetch_page(&self, page: u32) -> Result<CardPage, SourceError> {
        let url = cards_url(
            &self.options.base_url,
            page,
            self.options.page_size,
            self.options.sets.as_deref(),
        );
        log::debug!("Fetching {}", url);
        let response = self.get_with_retries(&url)?;
        Ok(response.json::<CardPage>()?)
    }
}

/// Builds the `/cards` URL for one page, with the optional set filter
/// encoded as a Lucene `q` clause.
fn cards_url(base_url: &str, page: u32, page_size: u32, sets: Option<&[String]>) -> String {
    let base = base_url.trim_end_matches('/');
    let mut url = format!("{base}/cards?page={page}&pageSize={page_size}");
    if let Some(sets) = sets {
        if !sets.is_empty() {
            let clauses: Vec<String> = sets
                .iter()
                .map(|code| format!("set.id:\"{code}\""))
                .collect();
            let query = clauses.join(" OR ");
            url.push_str("&q=");
            url.push_str(&urlencoding::encode(&query));
        }
    }
    url
}

impl SourceAdapter for ApiSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    fn list_records(&mut self, _since: Option<NaiveDate>) -> Result<Vec<RawRecord>, SourceError> {
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let card_page = self.fetch_page(page)?;
            let fetched = card_page.data.len();
            log::info!(
                "API page {}: {} cards ({} of {} so far)",
                page,
                fetched,
                records.len() + fetched,
                card_page.total_count
            );

            for payload in card_page.data {
                records.push(RawRecord::new(SourceKind::Api, payload));
            }

            if fetched == 0 || fetched < self.options.page_size as usize {
                break;
            }
            if card_page.total_count > 0 && records.len() as u32 >= card_page.total_count {
                break;
            }

            if self.options.delay_ms > 0 {
                thread::sleep(Duration::from_millis(self.options.delay_ms));
            }
            page += 1;
        }

        Ok(records)
    }
}
