// src/ingest/sink.rs
use anyhow::{Context, Result};
use metrics::counter;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

use crate::model::CanonicalEvent;

/// Persistence sink. Takes ownership of each event; the pipeline keeps no copy.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn save(&self, event: CanonicalEvent) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveFailure {
    pub title: Option<String>,
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SinkReport {
    pub saved: usize,
    pub failed: Vec<SaveFailure>,
}

/// Save every event; a failed save is recorded and the rest still go through.
pub async fn persist_all<S: EventStore + ?Sized>(store: &S, events: Vec<CanonicalEvent>) -> SinkReport {
    let mut report = SinkReport::default();
    for ev in events {
        let title = ev.title.clone();
        let source = ev.source.clone();
        match store.save(ev).await {
            Ok(()) => report.saved += 1,
            Err(e) => {
                let error = format!("{e:#}");
                tracing::warn!(error = %error, source = %source, title = ?title, "event save failed");
                report.failed.push(SaveFailure {
                    title,
                    source,
                    error,
                });
            }
        }
    }
    counter!("ingest_saved_total").increment(report.saved as u64);
    counter!("ingest_save_errors_total").increment(report.failed.len() as u64);
    report
}

/// Append-only JSON-lines file, one document per event.
pub struct JsonlStore {
    path: PathBuf,
    // Serializes appends from concurrent callers.
    lock: tokio::sync::Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl EventStore for JsonlStore {
    async fn save(&self, event: CanonicalEvent) -> Result<()> {
        let mut line = serde_json::to_string(&event).context("serializing event")?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

// --- Test helper ---
/// In-memory store; titles listed in `reject` fail to save.
#[derive(Default)]
pub struct MemoryStore {
    pub saved: Mutex<Vec<CanonicalEvent>>,
    pub reject: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(titles: &[&str]) -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            reject: titles.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait::async_trait]
impl EventStore for MemoryStore {
    async fn save(&self, event: CanonicalEvent) -> Result<()> {
        if let Some(t) = event.title.as_deref() {
            if self.reject.iter().any(|r| r == t) {
                anyhow::bail!("store rejected {t:?}");
            }
        }
        self.saved
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store mutex poisoned"))?
            .push(event);
        Ok(())
    }
}
