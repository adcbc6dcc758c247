// src/ingest/mod.rs
pub mod config;
pub mod driver;
pub mod providers;
pub mod sink;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::ingest::config::IngestConfig;
use crate::ingest::driver::{drive, DriverLimits, DriverOutput};
use crate::ingest::sink::{persist_all, EventStore, SinkReport};
use crate::ingest::types::SourceAdapter;
use crate::model::{CanonicalEvent, IdentityKey, Query};

/// One-time metrics registration (so series show up once a recorder is installed).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Events mapped from provider pages.");
        describe_counter!("ingest_requests_total", "Page requests issued per source.");
        describe_counter!(
            "ingest_source_errors_total",
            "Sources that ended on an error, timeout or cancellation."
        );
        describe_counter!(
            "ingest_dedup_total",
            "Events dropped as cross-source duplicates."
        );
        describe_counter!("ingest_saved_total", "Events persisted to the sink.");
        describe_counter!("ingest_save_errors_total", "Events the sink refused.");
        describe_histogram!("ingest_fetch_ms", "Page fetch time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the aggregation last ran."
        );
    });
}

/// A registered adapter and its dedup rank (lower wins).
#[derive(Clone)]
pub struct SourceEntry {
    pub adapter: Arc<dyn SourceAdapter>,
    pub priority: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Ok,
    Error { cause: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub priority: usize,
    /// Events this source yielded (partial when `outcome` is an error).
    pub events: usize,
    pub requests: u32,
    pub outcome: SourceOutcome,
}

impl SourceReport {
    fn from_output(entry: &SourceEntry, out: &DriverOutput) -> Self {
        let outcome = match (&out.termination, out.skipped.first()) {
            (driver::Termination::Failed(e), _) => SourceOutcome::Error {
                cause: e.to_string(),
            },
            (driver::Termination::DeadlineExceeded, _) => SourceOutcome::Error {
                cause: "source deadline exceeded".to_string(),
            },
            (driver::Termination::Cancelled, _) => SourceOutcome::Error {
                cause: "cancelled".to_string(),
            },
            (_, Some(first)) => SourceOutcome::Error {
                cause: format!("{} part(s) of the range skipped: {first}", out.skipped.len()),
            },
            (driver::Termination::Exhausted | driver::Termination::PageCeiling, None) => {
                SourceOutcome::Ok
            }
        };
        Self {
            source: entry.adapter.name().to_string(),
            priority: entry.priority,
            events: out.events.len(),
            requests: out.requests,
            outcome,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, SourceOutcome::Error { .. })
    }
}

/// Merged, deduplicated events plus how each source fared.
#[derive(Debug)]
pub struct Aggregation {
    pub events: Vec<CanonicalEvent>,
    pub sources: Vec<SourceReport>,
    pub duplicates: usize,
}

impl Aggregation {
    /// True when there were sources and every one of them errored.
    pub fn all_sources_failed(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(SourceReport::is_error)
    }
}

/// Keep the first occurrence per identity, in input order.
///
/// An event is a duplicate when its `(source, source_id)` was already kept, or when its
/// `IdentityKey` was (only for titled events). Returns (kept, dropped).
pub fn dedup(events: Vec<CanonicalEvent>) -> (Vec<CanonicalEvent>, usize) {
    let mut seen_ids: HashSet<(String, String)> = HashSet::new();
    let mut seen_keys: HashMap<IdentityKey, usize> = HashMap::new();
    let mut kept: Vec<CanonicalEvent> = Vec::with_capacity(events.len());
    let mut dropped = 0usize;

    for ev in events {
        let sid = ev
            .source_identity()
            .map(|(s, id)| (s.to_string(), id.to_string()));
        if sid.as_ref().is_some_and(|sid| seen_ids.contains(sid)) {
            tracing::debug!(source = %ev.source, source_id = ?ev.source_id, "duplicate source id dropped");
            dropped += 1;
            continue;
        }

        let titled = ev.title.as_deref().is_some_and(|t| !t.trim().is_empty());
        let key = titled.then(|| ev.identity_key());
        if let Some(&idx) = key.as_ref().and_then(|k| seen_keys.get(k)) {
            let first = &kept[idx];
            if first.differs_materially(&ev) {
                tracing::info!(
                    kept_source = %first.source,
                    dropped_source = %ev.source,
                    title = ?ev.title,
                    venue = ?ev.venue,
                    start = ?ev.start_time,
                    "identity ambiguity: same key, different details; keeping first"
                );
            } else {
                tracing::debug!(source = %ev.source, title = ?ev.title, "duplicate identity dropped");
            }
            dropped += 1;
            continue;
        }

        if let Some(sid) = sid {
            seen_ids.insert(sid);
        }
        if let Some(k) = key {
            seen_keys.insert(k, kept.len());
        }
        kept.push(ev);
    }

    (kept, dropped)
}

/// Fans one driver per source out, joins them, then merges in priority order.
pub struct Aggregator {
    sources: Vec<SourceEntry>,
    limits: DriverLimits,
}

impl Aggregator {
    pub fn new(mut sources: Vec<SourceEntry>, limits: DriverLimits) -> Self {
        sources.sort_by_key(|s| s.priority);
        Self { sources, limits }
    }

    pub fn from_config(cfg: &IngestConfig) -> Result<Self> {
        Ok(Self::new(providers::build_sources(cfg)?, cfg.run.limits()))
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.adapter.name()).collect()
    }

    pub async fn run(&self, query: &Query, cancel: &CancellationToken) -> Aggregation {
        ensure_metrics_described();
        let shared = Arc::new(query.clone());
        // Dropping this future (instead of cancelling `cancel`) still stops every source.
        let run_cancel = cancel.child_token();
        let _stop_on_drop = run_cancel.clone().drop_guard();

        // Each task owns its accumulation until joined; nothing is shared while fetching.
        let handles: Vec<_> = self
            .sources
            .iter()
            .map(|entry| {
                let adapter = Arc::clone(&entry.adapter);
                let query = Arc::clone(&shared);
                let limits = self.limits;
                let cancel = run_cancel.child_token();
                tokio::spawn(async move { drive(adapter.as_ref(), &query, &limits, &cancel).await })
            })
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        let mut merged = Vec::new();
        for (entry, handle) in self.sources.iter().zip(handles) {
            let name = entry.adapter.name();
            match handle.await {
                Ok(out) => {
                    let report = SourceReport::from_output(entry, &out);
                    if report.is_error() {
                        counter!("ingest_source_errors_total", "source" => name).increment(1);
                    }
                    reports.push(report);
                    merged.extend(out.events);
                }
                Err(e) => {
                    tracing::error!(source = name, error = %e, "source task failed");
                    counter!("ingest_source_errors_total", "source" => name).increment(1);
                    reports.push(SourceReport {
                        source: name.to_string(),
                        priority: entry.priority,
                        events: 0,
                        requests: 0,
                        outcome: SourceOutcome::Error {
                            cause: format!("task failed: {e}"),
                        },
                    });
                }
            }
        }

        let (events, duplicates) = dedup(merged);
        counter!("ingest_dedup_total").increment(duplicates as u64);
        gauge!("ingest_pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        Aggregation {
            events,
            sources: reports,
            duplicates,
        }
    }
}

/// Outcome of one full run: aggregation then persistence.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub sources: Vec<SourceReport>,
    pub duplicates: usize,
    /// Events left after dedup (handed to the sink).
    pub unique: usize,
    pub sink: SinkReport,
}

impl RunSummary {
    pub fn all_sources_failed(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(SourceReport::is_error)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sources:")?;
        for s in &self.sources {
            match &s.outcome {
                SourceOutcome::Ok => {
                    writeln!(f, "  {:<14} ok     {:>5} events, {} requests", s.source, s.events, s.requests)?
                }
                SourceOutcome::Error { cause } => writeln!(
                    f,
                    "  {:<14} error  {:>5} events before failure: {cause}",
                    s.source, s.events
                )?,
            }
        }
        if self.sources.is_empty() {
            writeln!(f, "  (no sources enabled)")?;
        } else if self.all_sources_failed() {
            writeln!(f, "  all sources failed; the empty result is not a real 'no events'")?;
        }
        writeln!(
            f,
            "unique events: {} (duplicates dropped: {})",
            self.unique, self.duplicates
        )?;
        write!(
            f,
            "saved: {}, save errors: {}",
            self.sink.saved,
            self.sink.failed.len()
        )
    }
}

/// Aggregate for `query`, then hand every unique event to `store`.
pub async fn run_once<S: EventStore + ?Sized>(
    aggregator: &Aggregator,
    query: &Query,
    store: &S,
    cancel: &CancellationToken,
) -> RunSummary {
    let agg = aggregator.run(query, cancel).await;
    let unique = agg.events.len();
    let sink = persist_all(store, agg.events).await;
    let summary = RunSummary {
        sources: agg.sources,
        duplicates: agg.duplicates,
        unique,
        sink,
    };
    tracing::info!(
        target: "ingest",
        unique = summary.unique,
        duplicates = summary.duplicates,
        saved = summary.sink.saved,
        save_errors = summary.sink.failed.len(),
        failed_sources = summary.sources.iter().filter(|s| s.is_error()).count(),
        "ingest run finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ev(source: &str, id: Option<&str>, title: &str, venue: &str, day: u32) -> CanonicalEvent {
        CanonicalEvent {
            source: source.into(),
            source_id: id.map(str::to_string),
            title: Some(title.into()),
            venue: Some(venue.into()),
            start_time: Some(Utc.with_ymd_and_hms(2025, 6, day, 19, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn same_identity_key_keeps_first_seen() {
        let a = ev("ticketmaster", Some("tm1"), "Coldplay", "Wembley", 15);
        let mut b = ev("predicthq", Some("phq9"), "  COLDPLAY ", "wembley", 15);
        b.description = Some("different".into());
        let (kept, dropped) = dedup(vec![a.clone(), b]);
        assert_eq!(kept, vec![a]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn repeated_source_id_is_dropped_even_if_retitled() {
        let a = ev("ticketmaster", Some("tm1"), "Coldplay", "Wembley", 15);
        let b = ev("ticketmaster", Some("tm1"), "Coldplay (moved)", "Wembley", 16);
        let c = ev("predicthq", Some("tm1"), "Other act", "Wembley", 16);
        let (kept, dropped) = dedup(vec![a, b, c]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn untitled_events_only_dedup_by_id() {
        let mut a = ev("serpapi", None, "", "", 15);
        a.title = None;
        let b = a.clone();
        let (kept, dropped) = dedup(vec![a, b]);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = vec![
            ev("ticketmaster", Some("1"), "A", "V", 1),
            ev("ticketmaster", Some("1"), "A2", "V", 2),
            ev("predicthq", Some("x"), "a", "v", 1),
            ev("serpapi", None, "B", "W", 3),
            ev("serpapi", None, "b ", "w", 3),
            ev("serpapi", None, "C", "W", 3),
        ];
        let (once, _) = dedup(input);
        let (twice, dropped) = dedup(once.clone());
        assert_eq!(once, twice);
        assert_eq!(dropped, 0);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn summary_flags_all_failed() {
        let s = RunSummary {
            sources: vec![SourceReport {
                source: "serpapi".into(),
                priority: 0,
                events: 0,
                requests: 1,
                outcome: SourceOutcome::Error {
                    cause: "provider answered HTTP 500".into(),
                },
            }],
            duplicates: 0,
            unique: 0,
            sink: SinkReport::default(),
        };
        assert!(s.all_sources_failed());
        let text = s.to_string();
        assert!(text.contains("all sources failed"));
        assert!(text.contains("HTTP 500"));
    }
}
