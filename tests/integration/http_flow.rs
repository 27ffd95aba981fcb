//! Aggregation over real HTTP backend calls.

use std::time::Duration;

use cardhub::context;
use cardhub::response::respond;
use cardhub::{aggregate, BackendError, ConnectorConfig, HttpBackend, SuppressionPolicy};
use http::{HeaderValue, StatusCode};

use crate::common::{ctx, Routes, Ticket, TicketServer};

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn backend(server: &TicketServer) -> HttpBackend {
    HttpBackend::with_client(client(), server.base_url())
        .with_authorization(HeaderValue::from_static("Bearer s3cret"))
}

#[tokio::test]
async fn test_http_aggregate_suppresses_not_found() {
    let server = TicketServer::start(Routes::new().status("T2", 404)).await;
    let backend = backend(&server);

    let mut tickets = context::run_with(ctx("corr-http"), async {
        aggregate(
            ["T1", "T2", "T3"],
            |id| backend.get_json::<Ticket>(&format!("tickets/{id}")),
            &SuppressionPolicy::suppress_not_found(),
        )
        .await
    })
    .await
    .unwrap();
    tickets.sort_by(|a, b| a.id.cmp(&b.id));

    assert_eq!(tickets, vec![Ticket::new("T1"), Ticket::new("T3")]);

    let seen = server.seen();
    assert_eq!(seen.len(), 3);
    for request in seen {
        assert_eq!(request.correlation_id.as_deref(), Some("corr-http"));
        assert_eq!(request.authorization.as_deref(), Some("Bearer s3cret"));
    }
}

#[tokio::test]
async fn test_http_unauthorized_maps_to_bad_request() {
    let server = TicketServer::start(Routes::new().status("T2", 401)).await;
    let backend = backend(&server);

    let response = respond(
        aggregate(
            ["T1", "T2"],
            |id| backend.get_json::<Ticket>(&format!("tickets/{id}")),
            &SuppressionPolicy::suppress_not_found(),
        ),
        None,
    )
    .await
    .unwrap_err();

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.message, "invalid credentials");
    assert_eq!(response.backend_status, Some(401));
}

#[tokio::test]
async fn test_http_error_body_is_preserved() {
    let server = TicketServer::start(Routes::new().status("T1", 503)).await;
    let backend = backend(&server);

    let err = aggregate(
        ["T1"],
        |id| backend.get_json::<Ticket>(&format!("tickets/{id}")),
        &SuppressionPolicy::suppress_not_found(),
    )
    .await
    .unwrap_err();

    let source = err.backend_error().unwrap();
    assert_eq!(source.status_code(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(source.body(), Some(r#"{"error":"ticket T1 status 503"}"#));
}

#[tokio::test]
async fn test_configured_connector_deadline() {
    let server =
        TicketServer::start(Routes::new().delay("T1", Duration::from_secs(5)).status("T2", 404))
            .await;
    let backend = backend(&server);

    let connector = ConnectorConfig {
        suppress_not_found: true,
        request_timeout_ms: Some(100),
        ..Default::default()
    };
    let aggregator = connector.aggregator::<Ticket>().unwrap();

    let response = respond(
        aggregator.aggregate(["T1", "T2"], |id| {
            backend.get_json::<Ticket>(&format!("tickets/{id}"))
        }),
        connector.timeout(),
    )
    .await
    .unwrap_err();

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_failure() {
    let backend = HttpBackend::with_client(client(), "http://127.0.0.1:1");

    let err = aggregate(
        ["T1"],
        |id| backend.get_json::<Ticket>(&format!("tickets/{id}")),
        &SuppressionPolicy::suppress_if("everything", |_| true),
    )
    .await
    .unwrap_err();

    assert!(matches!(err.backend_error(), Some(BackendError::Transport(_))));
}
