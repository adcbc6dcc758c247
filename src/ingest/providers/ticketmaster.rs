// src/ingest/providers/ticketmaster.rs
//! Catalog/ticketing provider (Ticketmaster Discovery API).
//!
//! The API only accepts limited date ranges and refuses deep paging, so a query
//! is cut into `window_days` sub-windows and each window is paged by index up to
//! `totalPages`, with `page_size * pages` kept under the provider's hard cap.
//! A 404 on a page means that window has no more pages; any other failure abandons
//! that window and carries on with the next one.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{api_time, get_json};
use crate::ingest::config::TicketmasterConfig;
use crate::ingest::types::{
    f64_at, json_at, str_at, utc_at, FetchError, Page, PageToken, RawRecord, SourceAdapter,
};
use crate::model::{CanonicalEvent, Query};

pub const NAME: &str = "ticketmaster";

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(rename = "_embedded", default)]
    embedded: Embedded,
    #[serde(default)]
    page: PageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct Embedded {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    total_pages: u32,
}

/// Split `[start, end]` into consecutive windows of at most `span`.
/// Adjacent windows share their boundary instant.
pub fn split_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    span: ChronoDuration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut out = Vec::new();
    let mut cur = start;
    loop {
        let w_end = (cur + span).min(end);
        out.push((cur, w_end));
        if w_end >= end {
            break;
        }
        cur = w_end;
    }
    out
}

pub struct TicketmasterAdapter {
    cfg: TicketmasterConfig,
    client: reqwest::Client,
    /// Pages per window after clamping to the hard cap.
    pages_per_window: u32,
}

impl TicketmasterAdapter {
    pub fn new(cfg: TicketmasterConfig, client: reqwest::Client) -> Self {
        let allowed = (cfg.hard_cap / cfg.page_size.max(1)).max(1);
        let pages_per_window = cfg.max_pages.min(allowed).max(1);
        if pages_per_window < cfg.max_pages {
            tracing::info!(
                source = NAME,
                requested = cfg.max_pages,
                clamped = pages_per_window,
                hard_cap = cfg.hard_cap,
                "max_pages clamped to provider cap"
            );
        }
        Self {
            cfg,
            client,
            pages_per_window,
        }
    }

    pub fn pages_per_window(&self) -> u32 {
        self.pages_per_window
    }

    fn span(&self) -> ChronoDuration {
        ChronoDuration::days(self.cfg.window_days.max(1))
    }

    fn window_starting(&self, start: DateTime<Utc>, query: &Query) -> PageToken {
        PageToken::Window {
            start,
            end: (start + self.span()).min(query.end_time()),
            page: 0,
        }
    }

    /// First page of the window after `end`, if the query reaches past it.
    fn next_window(&self, end: DateTime<Utc>, query: &Query) -> Option<PageToken> {
        (end < query.end_time()).then(|| self.window_starting(end, query))
    }

    fn params(
        &self,
        query: &Query,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
    ) -> Vec<(&'static str, String)> {
        let mut p = vec![
            ("apikey", self.cfg.api_key.clone()),
            ("locale", self.cfg.locale.clone()),
            ("city", query.city().to_string()),
            ("startDateTime", api_time(start)),
            ("endDateTime", api_time(end)),
            ("size", self.cfg.page_size.to_string()),
            ("page", page.to_string()),
            ("sort", "date,asc".to_string()),
        ];
        if let Some(kw) = query.keyword().or(self.cfg.default_keyword.as_deref()) {
            p.push(("keyword", kw.to_string()));
        }
        p
    }
}

#[async_trait]
impl SourceAdapter for TicketmasterAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initial_token(&self, query: &Query) -> PageToken {
        self.window_starting(query.start_time(), query)
    }

    async fn fetch_page(&self, query: &Query, token: &PageToken) -> Result<Page, FetchError> {
        let PageToken::Window { start, end, page } = *token else {
            return Err(FetchError::Token(token.clone()));
        };
        let req = self
            .client
            .get(&self.cfg.base_url)
            .query(&self.params(query, start, end, page));

        let env: Envelope = match get_json(req).await {
            Ok(env) => env,
            Err(FetchError::Http { status: 404 }) => {
                tracing::debug!(source = NAME, page, window_start = %start, "404 ends window");
                return Ok(Page::new(Vec::new(), self.next_window(end, query)));
            }
            Err(e) => {
                // Give up on this window only; later windows are still fetched.
                tracing::warn!(
                    source = NAME,
                    page,
                    window_start = %start,
                    window_end = %end,
                    error = %e,
                    "window fetch failed; moving to next window"
                );
                return Ok(Page::skip(e, self.next_window(end, query)));
            }
        };

        let more_in_window = page + 1 < env.page.total_pages && page + 1 < self.pages_per_window;
        let next = if more_in_window {
            Some(PageToken::Window {
                start,
                end,
                page: page + 1,
            })
        } else {
            self.next_window(end, query)
        };
        Ok(Page::new(env.embedded.events, next))
    }

    fn map_record(&self, _query: &Query, raw: &RawRecord) -> CanonicalEvent {
        // Only the first venue/classification is used; a missing entry leaves its fields empty.
        let venue = json_at(raw, &["_embedded", "venues", "0"]);
        let class = json_at(raw, &["classifications", "0"]);
        let from_venue = |path: &[&str]| venue.and_then(|v| str_at(v, path));
        let from_class = |path: &[&str]| class.and_then(|c| str_at(c, path));

        let image_urls: Vec<String> = json_at(raw, &["images"])
            .and_then(Value::as_array)
            .map(|imgs| imgs.iter().filter_map(|i| str_at(i, &["url"])).collect())
            .unwrap_or_default();
        let url = str_at(raw, &["url"]);

        CanonicalEvent {
            source: NAME.to_string(),
            source_id: str_at(raw, &["id"]),
            title: str_at(raw, &["name"]),
            ticket_urls: url.iter().cloned().collect(),
            url,
            start_time: utc_at(raw, &["dates", "start", "dateTime"], NAME),
            sales_start: utc_at(raw, &["sales", "public", "startDateTime"], NAME),
            sales_end: utc_at(raw, &["sales", "public", "endDateTime"], NAME),
            timezone: str_at(raw, &["dates", "timezone"]),
            city: from_venue(&["city", "name"]),
            country: from_venue(&["country", "name"]),
            venue: from_venue(&["name"]),
            latitude: venue.and_then(|v| f64_at(v, &["location", "latitude"])),
            longitude: venue.and_then(|v| f64_at(v, &["location", "longitude"])),
            segment: from_class(&["segment", "name"]),
            genre: from_class(&["genre", "name"]),
            subgenre: from_class(&["subGenre", "name"]),
            promoter: str_at(raw, &["promoter", "name"]),
            price: f64_at(raw, &["priceRanges", "0", "min"]).filter(|p| *p >= 0.0),
            description: str_at(raw, &["info"]).or_else(|| str_at(raw, &["description"])),
            image_urls,
            ..Default::default()
        }
    }

    fn record_key(&self, raw: &RawRecord) -> Option<String> {
        str_at(raw, &["id"])
    }
}
