// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod ingest;
pub mod intake;
pub mod model;

// ---- Re-exports for stable public API ----
pub use crate::ingest::config::{load_config_default, load_config_from, IngestConfig};
pub use crate::ingest::sink::{EventStore, JsonlStore};
pub use crate::ingest::{run_once, Aggregation, Aggregator, RunSummary, SourceOutcome};
pub use crate::model::{CanonicalEvent, IdentityKey, Query};
