// src/ingest/types.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::model::{CanonicalEvent, Query};

/// One provider record exactly as returned by the API.
pub type RawRecord = Value;

/// Provider-specific cursor. The driver only hands it back to the adapter that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Record offset (radius provider).
    Offset(u32),
    /// Zero-based page index under a fixed request budget (search engine).
    Page(u32),
    /// Page index inside one date sub-window (catalog provider).
    Window {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
    },
}

/// One fetched page. `next == None` means the provider has nothing beyond this page.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    pub next: Option<PageToken>,
    /// Set when the adapter gave up on part of its range (one date window, say) and
    /// moved on. The source keeps paging but is reported as failed.
    pub skipped: Option<FetchError>,
}

impl Page {
    pub fn last(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    pub fn new(records: Vec<RawRecord>, next: Option<PageToken>) -> Self {
        Self {
            records,
            next,
            skipped: None,
        }
    }

    /// Nothing from this token; carry on at `next`.
    pub fn skip(error: FetchError, next: Option<PageToken>) -> Self {
        Self {
            records: Vec::new(),
            next,
            skipped: Some(error),
        }
    }

    pub fn has_more(&self) -> bool {
        self.next.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("provider answered HTTP {status}")]
    Http { status: u16 },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("adapter received a foreign page token: {0:?}")]
    Token(PageToken),
}

/// A single event provider. Implementations must be cheap to share across tasks.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cursor for the first request of a run.
    fn initial_token(&self, query: &Query) -> PageToken;

    async fn fetch_page(&self, query: &Query, token: &PageToken) -> Result<Page, FetchError>;

    /// Field extraction. Missing or malformed fields become `None`/empty, never an error.
    fn map_record(&self, query: &Query, raw: &RawRecord) -> CanonicalEvent;

    /// Key used to drop repeats inside this source's own result set.
    fn record_key(&self, _raw: &RawRecord) -> Option<String> {
        None
    }
}

/// Walk a JSON value by object keys; numeric segments index into arrays.
pub fn json_at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |cur, seg| match cur {
        Value::Object(map) => map.get(*seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Non-blank string at `path`. Numbers are rendered so numeric ids still come through.
pub fn str_at(v: &Value, path: &[&str]) -> Option<String> {
    match json_at(v, path)? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Float at `path`; accepts numeric strings (some providers quote coordinates).
pub fn f64_at(v: &Value, path: &[&str]) -> Option<f64> {
    match json_at(v, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f64| f.is_finite())
}

/// Non-negative integer at `path`. Floats are truncated, negatives rejected.
pub fn u64_at(v: &Value, path: &[&str]) -> Option<u64> {
    match json_at(v, path)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn strings_at(v: &Value, path: &[&str]) -> Vec<String> {
    json_at(v, path)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a provider timestamp into UTC.
/// Accepts RFC 3339 (`2025-06-15T19:00:00Z`, offsets) and naive `YYYY-MM-DDTHH:MM:SS` taken as UTC.
pub fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|n| n.and_utc())
}

/// `parse_utc` on the string at `path`, logging values that are present but unreadable.
pub fn utc_at(v: &Value, path: &[&str], source: &'static str) -> Option<DateTime<Utc>> {
    let raw = str_at(v, path)?;
    let parsed = parse_utc(&raw);
    if parsed.is_none() {
        tracing::debug!(source, field = path.join("."), value = %raw, "unparseable timestamp");
    }
    parsed
}
