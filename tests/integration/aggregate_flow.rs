//! End-to-end fan-out/collect over spawned backend calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardhub::backend;
use cardhub::context;
use cardhub::{aggregate, Aggregator, BackendError, Deferred, RequestContext, SuppressionPolicy};
use http::StatusCode;

use crate::common::{ctx, Ticket};

/// Backend that answers after `delay`, failing the ids listed in `failures`.
fn fetch(
    id: &str,
    delay: Duration,
    failures: &[(&str, StatusCode)],
) -> Deferred<Ticket, BackendError> {
    let id = id.to_string();
    let failure = failures
        .iter()
        .find(|(failing, _)| *failing == id)
        .map(|(_, status)| *status);

    backend::spawn(async move {
        tokio::time::sleep(delay).await;
        match failure {
            Some(status) => Err(BackendError::status(status)),
            None => Ok(Ticket::new(&id)),
        }
    })
}

fn sorted_ids(tickets: &[Ticket]) -> Vec<&str> {
    let mut ids: Vec<&str> = tickets.iter().map(|t| t.id.as_str()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_not_found_suppressed_returns_remaining_tickets() {
    let failures = [("T2", StatusCode::NOT_FOUND)];

    let tickets = aggregate(
        ["T1", "T2", "T3"],
        |id| fetch(id, Duration::from_millis(5), &failures),
        &SuppressionPolicy::suppress_not_found(),
    )
    .await
    .unwrap();

    assert_eq!(sorted_ids(&tickets), vec!["T1", "T3"]);
}

#[tokio::test]
async fn test_server_error_fails_whole_request() {
    let failures = [("T2", StatusCode::INTERNAL_SERVER_ERROR)];

    let err = aggregate(
        ["T1", "T2", "T3"],
        |id| fetch(id, Duration::from_millis(5), &failures),
        &SuppressionPolicy::suppress_not_found(),
    )
    .await
    .unwrap_err();

    assert_eq!(err.item(), Some("T2"));
    assert_eq!(
        err.backend_error().and_then(BackendError::status_code),
        Some(StatusCode::INTERNAL_SERVER_ERROR)
    );
}

#[tokio::test]
async fn test_empty_request_makes_no_calls() {
    let calls = AtomicUsize::new(0);

    let tickets = aggregate(
        Vec::<&str>::new(),
        |id| {
            calls.fetch_add(1, Ordering::SeqCst);
            fetch(id, Duration::ZERO, &[])
        },
        &SuppressionPolicy::propagate_all(),
    )
    .await
    .unwrap();

    assert!(tickets.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ordered_aggregate_under_context() {
    let aggregator = Aggregator::new(SuppressionPolicy::propagate_all())
        .ordered_by(|ticket: &Ticket| ticket.id.clone());

    let tickets = context::run_with(ctx("corr-ordered"), async {
        aggregator
            .aggregate(["T3", "T1", "T2"], |id| {
                let delay = match id {
                    "T1" => Duration::from_millis(30),
                    "T2" => Duration::from_millis(15),
                    _ => Duration::from_millis(1),
                };
                fetch(id, delay, &[])
            })
            .await
    })
    .await
    .unwrap();

    let ids: Vec<&str> = tickets.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["T1", "T2", "T3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribe_delivers_under_request_context() {
    let seen = Arc::new(Mutex::new(None));

    let subscription = context::run_with(ctx("corr-subscribe"), async {
        let deferred = aggregate(
            ["T1", "T2"],
            |id| fetch(id, Duration::from_millis(5), &[]),
            &SuppressionPolicy::propagate_all(),
        );

        let seen = Arc::clone(&seen);
        deferred.subscribe(
            move |tickets: Vec<Ticket>| {
                let correlation_id = RequestContext::current()
                    .and_then(|c| c.correlation_id().map(str::to_string));
                *seen.lock().unwrap() = Some((tickets.len(), correlation_id));
            },
            |error| panic!("aggregate failed: {error}"),
        )
    })
    .await;

    assert!(subscription.finished().await);
    let (count, correlation_id) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(count, 2);
    assert_eq!(correlation_id.as_deref(), Some("corr-subscribe"));
}
