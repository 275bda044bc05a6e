//! reqwest transport and full runs against a wiremock server

use registry_harvester::collector::{Orchestrator, RunOutcome};
use registry_harvester::output::{ColumnConfig, ExportConfig};
use registry_harvester::registry::TargetConfig;
use registry_harvester::shutdown::ShutdownCoordinator;
use registry_harvester::transport::{HttpRequest, Method, ReqwestTransport, Transport, TransportError};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page(ids: std::ops::RangeInclusive<u64>, total: u64) -> serde_json::Value {
    let content: Vec<_> = ids
        .map(|id| json!({ "id": id, "name": format!("Company {id}"), "inn": format!("77{id:08}") }))
        .collect();
    json!({ "content": content, "totalElements": total })
}

#[tokio::test]
async fn test_transport_returns_status_body_and_lowercased_headers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("page", "3"))
        .and(header("x-client", "harvester"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::new(2, Duration::from_secs(5)).unwrap();
    let response = transport
        .send(
            HttpRequest::get(format!("{}/api/items", mock_server.uri()))
                .with_query("page", "3")
                .with_header("x-client", "harvester"),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 429);
    assert_eq!(response.header("retry-after"), Some("7"));
    assert_eq!(&response.body[..], b"slow down");
}

#[tokio::test]
async fn test_transport_times_out() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let transport = ReqwestTransport::new(1, Duration::from_millis(100)).unwrap();
    let result = transport.send(HttpRequest::get(mock_server.uri())).await;
    assert!(matches!(result, Err(TransportError::Timeout(_))));
}

#[tokio::test]
async fn test_post_target_sends_static_body() {
    let mock_server = MockServer::start().await;
    let filter = json!({ "status": "active", "region": 77 });
    Mock::given(method("POST"))
        .and(path("/api/search"))
        .and(body_json(&filter))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(1..=3, 3)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut target = TargetConfig::paged("search", mock_server.uri(), "/api/search", 10);
    target.method = Method::Post;
    target.body = Some(filter);

    let report = Orchestrator::from_target(&target, ShutdownCoordinator::shared())
        .unwrap()
        .with_state_dir(dir.path())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 3);
}

#[tokio::test]
async fn test_full_run_over_http_with_csv_export() {
    let mock_server = MockServer::start().await;
    for (index, ids) in [(0u64, 1..=10u64), (1, 11..=20), (2, 21..=25)] {
        Mock::given(method("GET"))
            .and(path("/api/companies"))
            .and(query_param("page", index.to_string()))
            .and(query_param("size", "10"))
            .and(query_param("status", "active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(ids, 25)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let csv_path = dir.path().join("companies.csv");
    let mut target = TargetConfig::paged("companies", mock_server.uri(), "/api/companies", 10);
    target.query.insert("status".to_string(), "active".to_string());
    target.settings.concurrency = 3;
    target.export = Some(ExportConfig::Csv {
        path: csv_path.clone(),
        delimiter: ';',
        columns: vec![
            ColumnConfig {
                name: "id".to_string(),
                pointer: None,
            },
            ColumnConfig::new("inn", "/inn"),
            ColumnConfig {
                name: "name".to_string(),
                pointer: None,
            },
        ],
        missing: String::new(),
        bom: false,
    });

    let report = Orchestrator::from_target(&target, ShutdownCoordinator::shared())
        .unwrap()
        .with_state_dir(dir.path())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 25);
    assert_eq!(report.stats.issued, 3);

    let contents = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("id;inn;name"));
    let rows: Vec<_> = lines.collect();
    assert_eq!(rows.len(), 25);
    assert!(rows.contains(&"7;7700000007;Company 7"));
}

#[tokio::test]
async fn test_server_errors_are_retried_over_http() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items/1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/items/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "name": "first" })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut target = TargetConfig::id_sweep("flaky-items", mock_server.uri(), "/api/items/{id}", 1);
    target.settings.empty_threshold = 2;
    target.settings.base_delay_ms = 10;
    target.settings.max_delay_ms = 50;

    let report = Orchestrator::from_target(&target, ShutdownCoordinator::shared())
        .unwrap()
        .with_state_dir(dir.path())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 1);
    assert_eq!(report.stats.retried_then_succeeded, 1);
    assert_eq!(report.stats.not_found, 2);
}
