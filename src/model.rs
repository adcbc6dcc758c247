//! # Canonical Event Model
//! One normalized shape for event listings coming from any provider, plus the
//! derived identity used for cross-source duplicate detection.
//!
//! Timestamps are `DateTime<Utc>` so a start time is always UTC; the provider's
//! local IANA zone (if any) travels separately in `timezone`.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Normalized representation of one event occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    /// Adapter name that produced the event, e.g. "ticketmaster".
    pub source: String,
    /// Provider-local identifier (absent for search-engine results).
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub sales_start: Option<DateTime<Utc>>,
    pub sales_end: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
    /// IANA zone name as reported by the provider.
    pub timezone: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub venue: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    // Taxonomy is provider vocabulary, not normalized across sources.
    pub segment: Option<String>,
    pub genre: Option<String>,
    pub subgenre: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub promoter: Option<String>,
    pub attendance: Option<u64>,
    pub predicted_spend: Option<f64>,
    pub price: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub ticket_urls: Vec<String>,
}

/// Heuristic identity: `(title, venue, start_time)` with text lowercased and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub title: String,
    pub venue: String,
    pub start_time: Option<DateTime<Utc>>,
}

impl CanonicalEvent {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            title: fold(self.title.as_deref()),
            venue: fold(self.venue.as_deref()),
            start_time: self.start_time,
        }
    }

    /// Exact identity `(source, source_id)` when the provider supplied an id.
    pub fn source_identity(&self) -> Option<(&str, &str)> {
        self.source_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| (self.source.as_str(), id))
    }

    /// Whether two copies of the "same" event disagree on content worth flagging.
    /// Links and ids are provider-specific and never count.
    pub fn differs_materially(&self, other: &CanonicalEvent) -> bool {
        self.description != other.description
            || self.city != other.city
            || self.price != other.price
    }
}

fn fold(s: Option<&str>) -> String {
    s.unwrap_or_default().trim().to_lowercase()
}

/// Input contract for one ingestion run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    city: String,
    keyword: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl Query {
    /// Rejects inverted ranges; a blank keyword is treated as absent.
    pub fn new(
        city: impl Into<String>,
        keyword: Option<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self> {
        if start_time > end_time {
            bail!("query start {start_time} is after end {end_time}");
        }
        let keyword = keyword
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        Ok(Self {
            city: city.into().trim().to_string(),
            keyword,
            start_time,
            end_time,
        })
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Both bounds inclusive.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start_time <= ts && ts <= self.end_time
    }
}
