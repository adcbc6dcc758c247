// tests/metrics_ingest.rs
use chrono::{TimeZone, Utc};
use event_ingest::ingest::config::PredictHqConfig;
use event_ingest::ingest::driver::DriverLimits;
use event_ingest::ingest::providers::predicthq::PredictHqAdapter;
use event_ingest::ingest::sink::MemoryStore;
use event_ingest::ingest::SourceEntry;
use event_ingest::{run_once, Aggregator, Query};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn metrics_exposed_after_ingest() {
    // Install a local recorder for the test
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "overflow": false,
            "results": [
                {"id": "1", "title": "Gig", "start": "2025-06-01T19:00:00Z", "entities": [{"name": "Koko"}]},
                {"id": "2", "title": "gig", "start": "2025-06-01T19:00:00Z", "entities": [{"name": "koko"}]}
            ]
        })))
        .mount(&server)
        .await;

    let adapter = PredictHqAdapter::new(
        PredictHqConfig {
            enabled: true,
            api_key: "k".into(),
            base_url: server.uri(),
            ..Default::default()
        },
        reqwest::Client::new(),
    );
    let agg = Aggregator::new(
        vec![SourceEntry {
            adapter: Arc::new(adapter),
            priority: 0,
        }],
        DriverLimits::default(),
    );
    let query = Query::new(
        "London",
        None,
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap(),
    )
    .unwrap();

    let summary = run_once(&agg, &query, &MemoryStore::new(), &CancellationToken::new()).await;
    assert_eq!(summary.unique, 1);
    assert_eq!(summary.duplicates, 1);

    // Scrape metrics text and check series presence by substring
    let out = handle.render();
    assert!(out.contains("ingest_requests_total"));
    assert!(out.contains("ingest_events_total"));
    assert!(out.contains("ingest_dedup_total"));
    assert!(out.contains("ingest_fetch_ms"));
    assert!(out.contains("ingest_saved_total"));
    assert!(out.contains("ingest_pipeline_last_run_ts"));
    assert!(out.contains(r#"source="predicthq""#));
}
