// src/ingest/providers/serpapi.rs
//! Search-engine-backed provider (Google Events through SerpApi).
//!
//! - Runs a fixed budget of `max_pages` requests; only an empty page ends it early.
//! - Results carry no ids, so repeats inside the result set are keyed by `title-link`.
//! - Dates come back as "Jun 15" without a year; the year is resolved against the query window.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::get_json;
use crate::ingest::config::SerpApiConfig;
use crate::ingest::types::{
    json_at, str_at, FetchError, Page, PageToken, RawRecord, SourceAdapter,
};
use crate::model::{CanonicalEvent, Query};

pub const NAME: &str = "serpapi";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    events_results: Vec<Value>,
    error: Option<String>,
}

pub struct SerpApiAdapter {
    cfg: SerpApiConfig,
    client: reqwest::Client,
}

impl SerpApiAdapter {
    pub fn new(cfg: SerpApiConfig, client: reqwest::Client) -> Self {
        Self { cfg, client }
    }

    /// "events [keyword] in <city>"; a keyword of plain "event" adds nothing.
    pub fn search_text(&self, query: &Query) -> String {
        let keyword = query
            .keyword()
            .or(self.cfg.default_keyword.as_deref())
            .map(str::trim)
            .filter(|k| !k.is_empty() && !k.eq_ignore_ascii_case("event"));
        let mut parts = vec!["events"];
        if let Some(k) = keyword {
            parts.push(k);
        }
        parts.push("in");
        parts.push(query.city());
        parts.join(" ")
    }
}

/// Resolve a month/day-only date ("Jun 15") to the first of `start.year`, `start.year + 1`
/// that falls inside the query window. Midnight UTC.
pub fn resolve_partial_date(raw: &str, query: &Query) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let year = query.start_time().year();
    [year, year + 1].into_iter().find_map(|y| {
        let candidate = NaiveDate::parse_from_str(&format!("{raw} {y}"), "%b %d %Y")
            .ok()?
            .and_hms_opt(0, 0, 0)?
            .and_utc();
        query.contains(candidate).then_some(candidate)
    })
}

/// Google puts "street, city, country" style lines in `address`; the second line holds city and country.
fn city_country(raw: &RawRecord) -> (Option<String>, Option<String>) {
    let Some(line) = str_at(raw, &["address", "1"]) else {
        return (None, None);
    };
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let city = parts.first().filter(|s| !s.is_empty()).map(|s| s.to_string());
    let country = parts.last().filter(|s| !s.is_empty()).map(|s| s.to_string());
    (city, country)
}

#[async_trait]
impl SourceAdapter for SerpApiAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initial_token(&self, _query: &Query) -> PageToken {
        PageToken::Page(0)
    }

    async fn fetch_page(&self, query: &Query, token: &PageToken) -> Result<Page, FetchError> {
        let PageToken::Page(page) = *token else {
            return Err(FetchError::Token(token.clone()));
        };
        let params = [
            ("engine", "google_events".to_string()),
            ("q", self.search_text(query)),
            ("api_key", self.cfg.api_key.clone()),
            ("hl", self.cfg.hl.clone()),
            ("gl", self.cfg.gl.clone()),
            ("start", (page * self.cfg.page_size).to_string()),
        ];
        let env: Envelope = get_json(self.client.get(&self.cfg.base_url).query(&params)).await?;
        if let Some(msg) = env.error.as_deref().filter(|_| env.events_results.is_empty()) {
            tracing::debug!(source = NAME, page, error = msg, "search engine returned no results");
        }

        let next = if env.events_results.is_empty() || page + 1 >= self.cfg.max_pages {
            None
        } else {
            Some(PageToken::Page(page + 1))
        };
        Ok(Page::new(env.events_results, next))
    }

    fn map_record(&self, query: &Query, raw: &RawRecord) -> CanonicalEvent {
        let start_time = str_at(raw, &["date", "start_date"]).and_then(|d| {
            let resolved = resolve_partial_date(&d, query);
            if resolved.is_none() {
                tracing::debug!(source = NAME, date = %d, "date outside query window or unreadable");
            }
            resolved
        });
        let (city, country) = city_country(raw);
        let image_urls: Vec<String> = [str_at(raw, &["thumbnail"]), str_at(raw, &["image"])]
            .into_iter()
            .flatten()
            .collect();
        let ticket_urls: Vec<String> = json_at(raw, &["ticket_info"])
            .and_then(Value::as_array)
            .map(|tickets| tickets.iter().filter_map(|t| str_at(t, &["link"])).collect())
            .unwrap_or_default();
        let norm = &self.cfg.normalization;

        CanonicalEvent {
            source: NAME.to_string(),
            source_id: None,
            title: str_at(raw, &["title"]),
            url: str_at(raw, &["link"]),
            start_time,
            timezone: norm.timezone.clone(),
            city,
            country,
            venue: str_at(raw, &["venue", "name"]),
            segment: norm.segment.clone(),
            genre: norm.genre.clone(),
            category: norm.category.clone(),
            labels: norm.labels.iter().cloned().collect(),
            description: str_at(raw, &["description"]),
            image_urls,
            ticket_urls,
            ..Default::default()
        }
    }

    fn record_key(&self, raw: &RawRecord) -> Option<String> {
        Some(format!(
            "{}-{}",
            str_at(raw, &["title"]).unwrap_or_default(),
            str_at(raw, &["link"]).unwrap_or_default()
        ))
    }
}
