// src/ingest/providers/mod.rs
pub mod predicthq;
pub mod serpapi;
pub mod ticketmaster;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::ingest::config::IngestConfig;
use crate::ingest::types::{FetchError, SourceAdapter};
use crate::ingest::SourceEntry;

use self::predicthq::PredictHqAdapter;
use self::serpapi::SerpApiAdapter;
use self::ticketmaster::TicketmasterAdapter;

/// Timestamp format every provider here accepts in query parameters.
pub(crate) fn api_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("event-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building provider http client")
}

/// Send, require 2xx, decode JSON. Non-2xx surfaces as `FetchError::Http` so callers can special-case it.
pub(crate) async fn get_json<T: DeserializeOwned>(
    req: reqwest::RequestBuilder,
) -> Result<T, FetchError> {
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Http {
            status: status.as_u16(),
        });
    }
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
}

/// Build the enabled adapters, ordered by configured priority.
pub fn build_sources(cfg: &IngestConfig) -> Result<Vec<SourceEntry>> {
    let client = http_client(Duration::from_secs(cfg.run.request_timeout_secs))?;
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if cfg.ticketmaster.enabled {
        adapters.push(Arc::new(TicketmasterAdapter::new(
            cfg.ticketmaster.clone(),
            client.clone(),
        )));
    }
    if cfg.predicthq.enabled {
        adapters.push(Arc::new(PredictHqAdapter::new(
            cfg.predicthq.clone(),
            client.clone(),
        )));
    }
    if cfg.serpapi.enabled {
        adapters.push(Arc::new(SerpApiAdapter::new(cfg.serpapi.clone(), client)));
    }

    let mut entries: Vec<SourceEntry> = adapters
        .into_iter()
        .map(|adapter| SourceEntry {
            priority: cfg.priority_of(adapter.name()),
            adapter,
        })
        .collect();
    entries.sort_by_key(|e| e.priority);

    tracing::info!(
        sources = ?entries.iter().map(|e| e.adapter.name()).collect::<Vec<_>>(),
        "sources registered"
    );
    Ok(entries)
}
