//! Event ingest binary entrypoint.
//! Loads config, resolves the request into a query, fans out to the enabled
//! providers, dedups, appends the result to the JSON-lines sink and prints a summary.
//!
//! Usage: `event-ingest [free-form request...]`, e.g. `event-ingest concerts in Milan this weekend`.

use anyhow::Context;
use event_ingest::intake::{IntakeService, KeywordIntake};
use event_ingest::{load_config_default, run_once, Aggregator, JsonlStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("event_ingest=info,ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev so the *_API_KEY variables are visible.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_config_default().context("loading ingest config")?;
    let utterance = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let intake = KeywordIntake::new(cfg.run.default_city.clone(), chrono::Utc::now())
        .with_default_days(cfg.run.default_days);
    let query = intake.resolve(&utterance).await?;

    let aggregator = Aggregator::from_config(&cfg)?;
    if aggregator.source_names().is_empty() {
        tracing::warn!("no sources enabled; check config/sources.toml");
    }
    tracing::info!(
        city = query.city(),
        keyword = ?query.keyword(),
        start = %query.start_time(),
        end = %query.end_time(),
        sources = ?aggregator.source_names(),
        "starting ingest"
    );

    // Ctrl-C cancels all in-flight sources; partial results are still merged and saved.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling sources");
            on_signal.cancel();
        }
    });

    let store = JsonlStore::new(cfg.run.output_path.clone());
    let summary = run_once(&aggregator, &query, &store, &cancel).await;

    println!("{summary}");
    println!("output: {}", store.path().display());
    if summary.all_sources_failed() {
        anyhow::bail!("every enabled source failed");
    }
    Ok(())
}
