//! # Intake
//! Turns a free-form request ("jazz concerts in Milan this weekend") into a `Query`.
//!
//! The conversational front end lives elsewhere; this module holds the seam
//! (`IntakeService`) plus two small resolvers:
//! - `KeywordIntake`: rule-based keyword/date-phrase/city matching.
//! - `query_from_reply`: pulls the structured JSON block out of an assistant reply.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::ingest::types::parse_utc;
use crate::model::Query;

#[async_trait::async_trait]
pub trait IntakeService: Send + Sync {
    async fn resolve(&self, utterance: &str) -> Result<Query>;
}

static RE_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(concert|music|show|exhibition|festival|event|sports|play|musical|opera)s?\b")
        .expect("static keyword regex")
});

/// Rule-based resolver. `now` anchors relative phrases so results are reproducible.
#[derive(Debug, Clone)]
pub struct KeywordIntake {
    pub default_city: String,
    pub known_cities: Vec<String>,
    pub default_days: i64,
    pub now: DateTime<Utc>,
}

impl KeywordIntake {
    pub fn new(default_city: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            default_city: default_city.into(),
            known_cities: ["London", "Miami", "Dubai", "Milan"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_days: 30,
            now,
        }
    }

    pub fn with_default_days(mut self, days: i64) -> Self {
        self.default_days = days.max(1);
        self
    }

    fn range(&self, text: &str) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = self.now;
        if text.contains("weekend") {
            let to_saturday = (5 - now.weekday().num_days_from_monday() as i64).rem_euclid(7);
            let start = now + Duration::days(to_saturday);
            return (start, start + Duration::days(2));
        }
        let days = if text.contains("two weeks") || text.contains("2 weeks") {
            14
        } else if text.contains("three months") || text.contains("3 months") {
            90
        } else if text.contains("month") {
            30
        } else {
            self.default_days
        };
        (now, now + Duration::days(days))
    }

    fn city(&self, text: &str) -> String {
        self.known_cities
            .iter()
            .find(|c| text.contains(&c.to_lowercase()))
            .cloned()
            .unwrap_or_else(|| self.default_city.clone())
    }

    pub fn interpret(&self, utterance: &str) -> Result<Query> {
        let text = utterance.to_lowercase();
        let keyword = RE_KEYWORD
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let (start, end) = self.range(&text);
        Query::new(self.city(&text), keyword, start, end)
    }
}

#[async_trait::async_trait]
impl IntakeService for KeywordIntake {
    async fn resolve(&self, utterance: &str) -> Result<Query> {
        let q = self.interpret(utterance)?;
        tracing::debug!(city = q.city(), keyword = ?q.keyword(), start = %q.start_time(), end = %q.end_time(), "utterance resolved");
        Ok(q)
    }
}

#[derive(Debug, Deserialize)]
struct ReplyQuery {
    city: String,
    #[serde(default)]
    keyword: Option<String>,
    start_datetime: String,
    end_datetime: String,
}

/// Extract the `{city, keyword, start_datetime, end_datetime}` object embedded in a reply.
pub fn query_from_reply(reply: &str) -> Result<Query> {
    let (Some(open), Some(close)) = (reply.find('{'), reply.rfind('}')) else {
        return Err(anyhow!("reply carries no JSON object"));
    };
    if close < open {
        return Err(anyhow!("reply carries no JSON object"));
    }
    let parsed: ReplyQuery =
        serde_json::from_str(&reply[open..=close]).context("parsing query JSON from reply")?;
    let start = parse_utc(&parsed.start_datetime)
        .ok_or_else(|| anyhow!("bad start_datetime {:?}", parsed.start_datetime))?;
    let end = parse_utc(&parsed.end_datetime)
        .ok_or_else(|| anyhow!("bad end_datetime {:?}", parsed.end_datetime))?;
    Query::new(parsed.city, parsed.keyword, start, end)
}
