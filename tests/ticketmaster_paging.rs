// tests/ticketmaster_paging.rs
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use event_ingest::ingest::config::TicketmasterConfig;
use event_ingest::ingest::driver::{drive, DriverLimits, Termination};
use event_ingest::ingest::providers::ticketmaster::TicketmasterAdapter;
use event_ingest::ingest::SourceEntry;
use event_ingest::{Aggregator, Query, SourceOutcome};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVENTS_PATH: &str = "/discovery/v2/events.json";

fn adapter(server: &MockServer, page_size: u32, max_pages: u32) -> TicketmasterAdapter {
    TicketmasterAdapter::new(
        TicketmasterConfig {
            enabled: true,
            api_key: "tm-key".into(),
            base_url: format!("{}{EVENTS_PATH}", server.uri()),
            page_size,
            max_pages,
            ..Default::default()
        },
        reqwest::Client::new(),
    )
}

fn query(days: i64) -> Query {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Query::new("London", None, start, start + Duration::days(days)).unwrap()
}

fn page(ids: &[&str], number: u32, total_pages: u32) -> Value {
    let events: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "name": format!("Show {id}"),
                "dates": {"start": {"dateTime": "2025-01-10T20:00:00Z"}},
                "_embedded": {"venues": [{"name": "Roundhouse", "city": {"name": "London"}}]}
            })
        })
        .collect();
    json!({
        "_embedded": {"events": events},
        "page": {"size": ids.len(), "totalPages": total_pages, "number": number}
    })
}

async fn run(adapter: &TicketmasterAdapter, q: &Query) -> event_ingest::ingest::driver::DriverOutput {
    drive(adapter, q, &DriverLimits::default(), &CancellationToken::new()).await
}

#[tokio::test]
async fn pages_up_to_total_pages() {
    let server = MockServer::start().await;
    for (i, ids) in [["a1", "a2"], ["b1", "b2"], ["c1", "c2"]].iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(EVENTS_PATH))
            .and(query_param("page", i.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(ids, i as u32, 3)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let out = run(&adapter(&server, 2, 5), &query(30)).await;
    assert!(matches!(out.termination, Termination::Exhausted));
    assert_eq!(out.requests, 3);
    let ids: Vec<_> = out.events.iter().filter_map(|e| e.source_id.clone()).collect();
    assert_eq!(ids, vec!["a1", "a2", "b1", "b2", "c1", "c2"]);
}

#[tokio::test]
async fn not_found_page_ends_the_window_without_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["a1", "a2"], 0, 3)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let out = run(&adapter(&server, 2, 5), &query(30)).await;
    assert!(!out.termination.is_error());
    assert_eq!(out.requests, 2);
    assert_eq!(out.events.len(), 2);
}

#[tokio::test]
async fn long_range_is_split_into_sixty_day_windows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[], 0, 0)))
        .expect(3)
        .mount(&server)
        .await;

    let out = run(&adapter(&server, 100, 5), &query(150)).await;
    assert!(matches!(out.termination, Termination::Exhausted));
    assert_eq!(out.requests, 3);

    let received = server.received_requests().await.unwrap();
    let param = |name: &str| -> Vec<String> {
        received
            .iter()
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.into_owned())
            })
            .collect()
    };
    assert_eq!(
        param("startDateTime"),
        vec!["2025-01-01T00:00:00Z", "2025-03-02T00:00:00Z", "2025-05-01T00:00:00Z"]
    );
    assert_eq!(
        param("endDateTime"),
        vec!["2025-03-02T00:00:00Z", "2025-05-01T00:00:00Z", "2025-05-31T00:00:00Z"]
    );
    assert!(param("apikey").iter().all(|k| k == "tm-key"));
    assert!(param("city").iter().all(|c| c == "London"));
}

#[tokio::test]
async fn page_count_is_clamped_to_hard_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["p0"], 0, 10)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["p1"], 1, 10)))
        .mount(&server)
        .await;

    // 400 * 5 would exceed the 1000-record cap, so only 2 pages per window.
    let a = adapter(&server, 400, 5);
    assert_eq!(a.pages_per_window(), 2);
    let out = run(&a, &query(30)).await;
    assert_eq!(out.requests, 2);
    assert_eq!(out.events.len(), 2);
}

#[tokio::test]
async fn failed_window_is_skipped_and_later_windows_still_run() {
    let server = MockServer::start().await;
    // Each window is hit twice: once by the bare driver, once through the aggregator.
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("startDateTime", "2025-01-01T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["w1"], 0, 1)))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("startDateTime", "2025-03-02T00:00:00Z"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("startDateTime", "2025-05-01T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["w3"], 0, 1)))
        .expect(2)
        .mount(&server)
        .await;

    let out = run(&adapter(&server, 100, 5), &query(150)).await;
    assert!(matches!(out.termination, Termination::Exhausted));
    assert_eq!(out.requests, 3);
    assert_eq!(out.skipped.len(), 1);
    assert!(out.is_error());
    let ids: Vec<_> = out.events.iter().filter_map(|e| e.source_id.clone()).collect();
    assert_eq!(ids, vec!["w1", "w3"]);

    // The source report still says it failed, with both windows' events kept.
    let agg = Aggregator::new(
        vec![SourceEntry {
            adapter: Arc::new(adapter(&server, 100, 5)),
            priority: 0,
        }],
        DriverLimits::default(),
    );
    let result = agg.run(&query(150), &CancellationToken::new()).await;
    assert_eq!(result.events.len(), 2);
    assert!(result.all_sources_failed());
    assert!(matches!(
        &result.sources[0].outcome,
        SourceOutcome::Error { cause } if cause.contains("500")
    ));
}

#[tokio::test]
async fn every_window_failing_fails_the_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;

    let out = run(&adapter(&server, 100, 5), &query(150)).await;
    assert!(out.is_error());
    assert_eq!(out.requests, 3);
    assert_eq!(out.skipped.len(), 3);
    assert!(out.events.is_empty());
}

#[tokio::test]
async fn maps_fixture_page() {
    let body = std::fs::read_to_string("tests/fixtures/ticketmaster_page.json").expect("fixture");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(&server)
        .await;

    let out = run(&adapter(&server, 100, 5), &query(30)).await;
    assert_eq!(out.events.len(), 2);

    let am = &out.events[0];
    assert_eq!(am.title.as_deref(), Some("Arctic Monkeys"));
    assert_eq!(am.venue.as_deref(), Some("The O2"));
    assert_eq!(am.city.as_deref(), Some("London"));
    assert_eq!(am.country.as_deref(), Some("Great Britain"));
    assert_eq!(am.latitude, Some(51.50295));
    assert_eq!(am.genre.as_deref(), Some("Rock"));
    assert_eq!(am.subgenre.as_deref(), Some("Alternative Rock"));
    assert_eq!(am.price, Some(65.5));
    assert_eq!(am.description.as_deref(), Some("Doors open 6pm."));
    assert_eq!(am.image_urls.len(), 2);
    assert_eq!(
        am.sales_start,
        Some(Utc.with_ymd_and_hms(2025, 2, 14, 10, 0, 0).unwrap())
    );

    let lso = &out.events[1];
    assert_eq!(lso.description.as_deref(), Some("An evening of Mahler."));
    assert_eq!(lso.segment.as_deref(), Some("Arts & Theatre"));
    assert!(lso.latitude.is_none());
    assert!(lso.price.is_none());
}
