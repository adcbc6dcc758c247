// src/ingest/driver.rs
//! Drives one adapter through its paging protocol until the provider runs dry,
//! the request ceiling is hit, an error occurs, the per-source deadline passes
//! or the run is cancelled. Whatever was collected up to that point is returned.
//! Failures an adapter recovers from itself (a skipped window) are collected in
//! `skipped` and do not stop paging.

use std::collections::HashSet;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ingest::types::{FetchError, SourceAdapter};
use crate::model::{CanonicalEvent, Query};

#[derive(Debug, Clone, Copy)]
pub struct DriverLimits {
    /// Hard ceiling on requests per source, independent of the provider's own signals.
    pub max_requests: u32,
    pub request_timeout: Duration,
    /// Wall-clock budget for the whole source.
    pub source_deadline: Duration,
}

impl Default for DriverLimits {
    fn default() -> Self {
        Self {
            max_requests: 50,
            request_timeout: Duration::from_secs(20),
            source_deadline: Duration::from_secs(120),
        }
    }
}

/// Why the driver stopped.
#[derive(Debug)]
pub enum Termination {
    /// Adapter reported no further pages.
    Exhausted,
    PageCeiling,
    Failed(FetchError),
    DeadlineExceeded,
    Cancelled,
}

impl Termination {
    /// Normal ends (`Exhausted`, `PageCeiling`) are not errors.
    pub fn is_error(&self) -> bool {
        !matches!(self, Termination::Exhausted | Termination::PageCeiling)
    }
}

#[derive(Debug)]
pub struct DriverOutput {
    /// Events in provider return order.
    pub events: Vec<CanonicalEvent>,
    pub requests: u32,
    /// Records dropped because the source repeated a `record_key`.
    pub repeats: usize,
    /// Parts of the range the adapter abandoned while paging went on.
    pub skipped: Vec<FetchError>,
    pub termination: Termination,
}

impl DriverOutput {
    /// True when the source stopped on an error or abandoned part of its range.
    pub fn is_error(&self) -> bool {
        self.termination.is_error() || !self.skipped.is_empty()
    }
}

pub async fn drive(
    adapter: &dyn SourceAdapter,
    query: &Query,
    limits: &DriverLimits,
    cancel: &CancellationToken,
) -> DriverOutput {
    let source = adapter.name();
    let deadline = Instant::now() + limits.source_deadline;
    let mut token = adapter.initial_token(query);
    let mut seen: HashSet<String> = HashSet::new();
    let mut events = Vec::new();
    let mut requests = 0u32;
    let mut repeats = 0usize;
    let mut skipped = Vec::new();

    let termination = loop {
        if requests >= limits.max_requests {
            tracing::info!(source, requests, "request ceiling reached");
            break Termination::PageCeiling;
        }
        if cancel.is_cancelled() {
            break Termination::Cancelled;
        }
        if Instant::now() >= deadline {
            break Termination::DeadlineExceeded;
        }

        let t0 = std::time::Instant::now();
        // Set once the fetch arm is first polled, i.e. a request actually went out.
        let mut sent = false;
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Termination::Cancelled),
            _ = tokio::time::sleep_until(deadline) => Err(Termination::DeadlineExceeded),
            r = async {
                sent = true;
                tokio::time::timeout(limits.request_timeout, adapter.fetch_page(query, &token)).await
            } => r
                .unwrap_or(Err(FetchError::Timeout(limits.request_timeout)))
                .map_err(Termination::Failed),
        };
        if sent {
            requests += 1;
            counter!("ingest_requests_total", "source" => source).increment(1);
            histogram!("ingest_fetch_ms", "source" => source).record(t0.elapsed().as_secs_f64() * 1_000.0);
        }

        let mut page = match fetched {
            Ok(page) => page,
            Err(t) => {
                if let Termination::Failed(e) = &t {
                    tracing::warn!(source, error = %e, token = ?token, "page fetch failed; stopping source");
                }
                break t;
            }
        };

        if let Some(e) = page.skipped.take() {
            tracing::debug!(source, error = %e, token = ?token, "part of the range skipped");
            skipped.push(e);
        }
        tracing::debug!(source, token = ?token, records = page.records.len(), more = page.has_more(), "page fetched");
        for raw in &page.records {
            if let Some(key) = adapter.record_key(raw) {
                if !seen.insert(key) {
                    repeats += 1;
                    continue;
                }
            }
            events.push(adapter.map_record(query, raw));
        }

        match page.next {
            Some(next) => token = next,
            None => break Termination::Exhausted,
        }
    };

    counter!("ingest_events_total", "source" => source).increment(events.len() as u64);
    tracing::info!(
        source,
        events = events.len(),
        requests,
        repeats,
        skipped = skipped.len(),
        termination = ?termination,
        "source pagination finished"
    );

    DriverOutput {
        events,
        requests,
        repeats,
        skipped,
        termination,
    }
}
