// src/ingest/providers/predicthq.rs
//! Radius-based provider: queries a fixed origin + radius instead of a city name,
//! pages by record offset and stops on an empty page or `overflow == false`.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;

use super::{api_time, get_json};
use crate::ingest::config::PredictHqConfig;
use crate::ingest::types::{
    f64_at, json_at, str_at, strings_at, u64_at, utc_at, FetchError, Page, PageToken, RawRecord,
    SourceAdapter,
};
use crate::model::{CanonicalEvent, Query};

pub const NAME: &str = "predicthq";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    results: Vec<Value>,
    /// True while more results exist beyond this page.
    #[serde(default)]
    overflow: bool,
}

pub struct PredictHqAdapter {
    cfg: PredictHqConfig,
    client: reqwest::Client,
}

impl PredictHqAdapter {
    pub fn new(mut cfg: PredictHqConfig, client: reqwest::Client) -> Self {
        // Offsets are divided by the page size.
        cfg.page_size = cfg.page_size.max(1);
        cfg.max_pages = cfg.max_pages.max(1);
        Self { cfg, client }
    }

    fn params(&self, query: &Query, offset: u32) -> Vec<(&'static str, String)> {
        let mut p = vec![
            ("location_around.origin", self.cfg.origin.clone()),
            ("location_around.offset", format!("{}km", self.cfg.radius_km)),
            ("start.gte", api_time(query.start_time())),
            ("start.lte", api_time(query.end_time())),
            ("limit", self.cfg.page_size.to_string()),
            ("offset", offset.to_string()),
            ("sort", "start".to_string()),
        ];
        if let Some(cc) = self.cfg.country_code.as_deref().filter(|c| !c.is_empty()) {
            p.push(("country", cc.to_string()));
        }
        if let Some(kw) = query.keyword() {
            p.push(("q", kw.to_string()));
        }
        p
    }

    /// Pinned label when configured, else whatever the provider reports.
    fn country(&self, raw: &RawRecord) -> Option<String> {
        match self.cfg.country_label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => Some(label.to_string()),
            _ => str_at(raw, &["geo", "address", "country_code"])
                .or_else(|| str_at(raw, &["country"])),
        }
    }
}

fn venue_name(raw: &RawRecord) -> Option<String> {
    let entities = json_at(raw, &["entities"])?.as_array()?;
    entities
        .iter()
        .find(|e| str_at(e, &["type"]).as_deref() == Some("venue"))
        .or_else(|| entities.first())
        .and_then(|e| str_at(e, &["name"]))
}

#[async_trait]
impl SourceAdapter for PredictHqAdapter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initial_token(&self, _query: &Query) -> PageToken {
        PageToken::Offset(0)
    }

    async fn fetch_page(&self, query: &Query, token: &PageToken) -> Result<Page, FetchError> {
        let PageToken::Offset(offset) = *token else {
            return Err(FetchError::Token(token.clone()));
        };
        let req = self
            .client
            .get(&self.cfg.base_url)
            .bearer_auth(&self.cfg.api_key)
            .header(ACCEPT, "application/json")
            .query(&self.params(query, offset));
        let env: Envelope = get_json(req).await?;

        let page_no = offset / self.cfg.page_size + 1;
        let next = if env.results.is_empty() || !env.overflow || page_no >= self.cfg.max_pages {
            None
        } else {
            Some(PageToken::Offset(offset + self.cfg.page_size))
        };
        Ok(Page::new(env.results, next))
    }

    fn map_record(&self, _query: &Query, raw: &RawRecord) -> CanonicalEvent {
        CanonicalEvent {
            source: NAME.to_string(),
            source_id: str_at(raw, &["id"]),
            title: str_at(raw, &["title"]),
            url: None,
            start_time: utc_at(raw, &["start"], NAME),
            duration_seconds: u64_at(raw, &["duration"]),
            timezone: str_at(raw, &["timezone"]),
            city: str_at(raw, &["geo", "address", "locality"]),
            country: self.country(raw),
            venue: venue_name(raw),
            // GeoJSON order: [lon, lat]
            latitude: f64_at(raw, &["location", "1"]),
            longitude: f64_at(raw, &["location", "0"]),
            category: str_at(raw, &["category"]),
            labels: strings_at(raw, &["labels"]).into_iter().collect(),
            attendance: u64_at(raw, &["phq_attendance"]),
            predicted_spend: f64_at(raw, &["predicted_event_spend"]).filter(|v| *v >= 0.0),
            description: str_at(raw, &["description"]),
            ..Default::default()
        }
    }

    fn record_key(&self, raw: &RawRecord) -> Option<String> {
        str_at(raw, &["id"])
    }
}
