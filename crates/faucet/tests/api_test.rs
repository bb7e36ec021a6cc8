//! End-to-end tests of the HTTP surface against an in-memory ledger

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use cosmos_faucet::memory::MemoryLedger;
use cosmos_faucet::{
    router, AppState, CoinSet, Confirmation, FaucetMetrics, FeeParams, Limits, QuotaStore, RequestValidator, RouterOptions,
    TransferOrchestrator, TransferResponse, Whitelist,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const FAUCET: &str = "archway1faucet";
const ALICE: &str = "archway1alice";

struct TestApp {
    app: Router,
    ledger: Arc<MemoryLedger>,
    orchestrator: Arc<TransferOrchestrator>,
}

fn build(ledger: MemoryLedger, whitelist: Option<Whitelist>) -> TestApp {
    let ledger = Arc::new(ledger);
    let limits = Arc::new(Limits::parse("1000000uarch", "10000000uarch,5ustake").unwrap());
    let validator = RequestValidator::new(limits, whitelist.map(Arc::new), QuotaStore::new(ledger.clone(), FAUCET));
    let orchestrator = Arc::new(
        TransferOrchestrator::new(
            validator,
            ledger.clone(),
            ledger.faucet_account(),
            FeeParams::default(),
            Arc::new(FaucetMetrics::new().unwrap()),
        )
        .with_confirmation(Confirmation {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(5),
        }),
    );
    let state = AppState {
        orchestrator: orchestrator.clone(),
        chain_id: "constantine-3".into(),
    };

    TestApp {
        app: router(state, RouterOptions::default()),
        ledger,
        orchestrator,
    }
}

fn app() -> TestApp {
    build(MemoryLedger::new(FAUCET), None)
}

fn transfer(body: impl Into<String>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

fn transfer_to(address: &str, coins: &[&str]) -> Request<Body> {
    transfer(serde_json::json!({ "address": address, "coins": coins }).to_string())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, TransferResponse) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_text(app: &Router, uri: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_fresh_account_receives_coins() {
    let t = app();
    let (status, body) = send(&t.app, transfer_to(ALICE, &["1000000uarch"])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, TransferResponse::default());
    let submissions = t.ledger.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].recipient, ALICE);
    assert_eq!(submissions[0].coins, CoinSet::parse("1000000uarch").unwrap());
}

#[tokio::test]
async fn test_success_body_is_empty_object() {
    let t = app();
    let response = t.app.clone().oneshot(transfer_to(ALICE, &["1uarch"])).await.unwrap();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"{}");
}

#[tokio::test]
async fn test_lifetime_limit_reached_is_rejected() {
    let t = app();
    t.ledger.record_transfer(ALICE, &CoinSet::parse("9500000uarch").unwrap());

    let (status, body) = send(&t.app, transfer_to(ALICE, &["600000uarch"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error = body.error.unwrap();
    assert!(error.contains("per-account limit"), "{error}");
    assert!(error.contains("9500000uarch"), "{error}");
    assert!(t.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_history_spread_over_pages_is_counted() {
    let t = build(MemoryLedger::new(FAUCET).with_page_size(3), None);
    for _ in 0..10 {
        t.ledger.record_transfer(ALICE, &CoinSet::parse("950000uarch").unwrap());
    }

    // 9.5M over four pages; another 600k would pass 10M.
    let (status, _) = send(&t.app, transfer_to(ALICE, &["600000uarch"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(t.ledger.query_count() >= 4);

    let (status, _) = send(&t.app, transfer_to(ALICE, &["500000uarch"])).await;
    assert_eq!(status, StatusCode::OK);
}

/// With `sync` broadcasts a transfer is acknowledged before it shows up in
/// history. Back-to-back requests must still see every earlier transfer.
#[tokio::test]
async fn test_acknowledged_transfers_count_before_next_request() {
    let t = build(
        MemoryLedger::new(FAUCET).with_visibility_delay(Duration::from_millis(20)),
        None,
    );

    let mut ok = 0;
    for _ in 0..15 {
        if send(&t.app, transfer_to(ALICE, &["1000000uarch"])).await.0 == StatusCode::OK {
            ok += 1;
        }
    }

    assert_eq!(ok, 10);
    assert_eq!(t.ledger.submissions().len(), 10);
    assert_eq!(t.ledger.delivered_to(ALICE), CoinSet::parse("10000000uarch").unwrap());
}

#[tokio::test]
async fn test_transfer_never_included_is_server_error() {
    let ledger = MemoryLedger::new(FAUCET);
    ledger.drop_submissions(true);
    let t = build(ledger, None);

    let (status, body) = send(&t.app, transfer_to(ALICE, &["1uarch"])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.error.unwrap().contains("not included"));
    assert_eq!(t.orchestrator.active_destinations(), 0);
}

#[tokio::test]
async fn test_address_spellings_share_one_quota() {
    let t = app();
    t.ledger.record_transfer(ALICE, &CoinSet::parse("10000000uarch").unwrap());

    for address in ["ARCHWAY1ALICE", "  archway1alice\n", " ARCHWAY1ALICE\t"] {
        let (status, body) = send(&t.app, transfer_to(address, &["1uarch"])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{address:?}");
        assert!(body.error.unwrap().contains("per-account limit"), "{address:?}");
    }
    assert!(t.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_uppercase_address_receives_at_canonical_address() {
    let t = app();
    let (status, _) = send(&t.app, transfer_to("ARCHWAY1ALICE", &["1uarch"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.ledger.submissions()[0].recipient, ALICE);
}

#[tokio::test]
async fn test_mixed_case_address_is_rejected() {
    let t = app();
    let (status, body) = send(&t.app, transfer_to("archway1Alice", &["1uarch"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().starts_with("invalid request"));
    assert_eq!(t.ledger.query_count(), 0);
}

#[tokio::test]
async fn test_overlong_amount_is_rejected() {
    let t = app();
    let amount = format!("{}uarch", "1".repeat(79));
    let (status, body) = send(&t.app, transfer_to(ALICE, &[amount.as_str()])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("digits"));
    assert_eq!(t.ledger.query_count(), 0);
}

#[tokio::test]
async fn test_per_request_limit() {
    let t = app();
    let (status, body) = send(&t.app, transfer_to(ALICE, &["1000001uarch"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("per-request limit"));
}

#[tokio::test]
async fn test_unsupported_denom() {
    let t = app();
    let (status, body) = send(&t.app, transfer_to(ALICE, &["1uarch", "1foo"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("foo"));
    assert!(t.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_several_denominations_in_one_transfer() {
    let t = app();
    let (status, _) = send(&t.app, transfer_to(ALICE, &["5ustake,10uarch", "10uarch"])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.ledger.submissions()[0].coins, CoinSet::parse("20uarch,5ustake").unwrap());
}

#[tokio::test]
async fn test_malformed_input_never_reaches_ledger() {
    let t = app();
    let cases = [
        transfer("{not json"),
        transfer(r#"{"address": 7, "coins": []}"#),
        transfer_to(ALICE, &["1.5uarch"]),
        transfer_to(ALICE, &["uarch"]),
        transfer_to(ALICE, &[]),
        transfer_to("", &["1uarch"]),
    ];

    for request in cases {
        let (status, body) = send(&t.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.is_some());
    }
    assert_eq!(t.ledger.query_count(), 0);
    assert!(t.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_content_type_is_bad_request() {
    let t = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(Body::from(r#"{"address": "archway1alice", "coins": ["1uarch"]}"#))
        .unwrap();
    let (status, body) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().starts_with("invalid request"));
}

#[tokio::test]
async fn test_whitelist_forbids_unknown_addresses() {
    let whitelist = Whitelist::parse("archway1bob,1\narchway1carol,0\n").unwrap();
    let t = build(MemoryLedger::new(FAUCET), Some(whitelist));

    let (status, _) = send(&t.app, transfer_to(ALICE, &["1uarch"])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&t.app, transfer_to("archway1carol", &["1uarch"])).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&t.app, transfer_to("archway1bob", &["1uarch"])).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_history_unavailable_is_bad_gateway() {
    let t = app();
    t.ledger.fail_queries(true);

    let (status, body) = send(&t.app, transfer_to(ALICE, &["1uarch"])).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.error.unwrap().contains("ledger query failed"));
    assert!(t.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_submit_failure_is_server_error() {
    let t = app();
    t.ledger.fail_submits(true);

    let (status, body) = send(&t.app, transfer_to(ALICE, &["1uarch"])).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.error.unwrap().contains("submission failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_lifetime_limit() {
    let t = build(MemoryLedger::new(FAUCET).with_submit_delay(Duration::from_millis(5)), None);

    let handles: Vec<_> = (0..15)
        .map(|_| {
            let app = t.app.clone();
            tokio::spawn(async move { send(&app, transfer_to(ALICE, &["1000000uarch"])).await.0 })
        })
        .collect();

    let mut ok = 0;
    let mut rejected = 0;
    for status in futures::future::join_all(handles).await {
        match status.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::BAD_REQUEST => rejected += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 10);
    assert_eq!(rejected, 5);
    assert_eq!(t.ledger.submissions().len(), 10);
    assert_eq!(t.ledger.max_concurrent_submissions(), 1);
    assert_eq!(t.orchestrator.active_destinations(), 0);
}

#[tokio::test]
async fn test_dropped_request_still_completes_transfer() {
    let t = build(MemoryLedger::new(FAUCET).with_submit_delay(Duration::from_millis(50)), None);

    let app = t.app.clone();
    let request = tokio::spawn(async move { app.oneshot(transfer_to(ALICE, &["1uarch"])).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    request.abort();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(t.ledger.submissions().len(), 1);
    assert_eq!(t.orchestrator.active_destinations(), 0);
}

#[tokio::test]
async fn test_openapi_document_names_chain() {
    let t = app();
    let (status, text) = get_text(&t.app, "/openapi.yml").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("Faucet for constantine-3"));
    assert!(!text.contains("{{CHAIN_ID}}"));

    let (status, html) = get_text(&t.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("openapi.yml"));
}

#[tokio::test]
async fn test_health_and_metrics() {
    let t = app();
    let (status, text) = get_text(&t.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("ok"));

    send(&t.app, transfer_to(ALICE, &["1uarch"])).await;
    send(&t.app, transfer_to(ALICE, &["1foo"])).await;

    let (status, text) = get_text(&t.app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("faucet_requests_total{outcome=\"committed\"} 1"));
    assert!(text.contains("faucet_requests_total{outcome=\"rejected\"} 1"));
}

#[tokio::test]
async fn test_cors_preflight() {
    let t = app();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/")
        .header(header::ORIGIN, "https://example.org")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}
