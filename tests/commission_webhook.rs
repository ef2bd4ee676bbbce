mod common;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use mockall::mock;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

use common::{send, test_config, TestGateway, ADMIN_TOKEN, WEBHOOK_TOKEN};
use tradegate::commission::LedgerEntryCreator;
use tradegate::domain::{CommissionAttribution, PositionClosedEvent};

mock! {
    pub Ledger {}

    #[async_trait]
    impl LedgerEntryCreator for Ledger {
        async fn create_entries(
            &self,
            event: &PositionClosedEvent,
            attribution: &CommissionAttribution,
        ) -> tradegate::Result<usize>;
    }
}

const URI: &str = "/webhooks/position-closed";

fn body(login: u64) -> String {
    json!({
        "login_id": login,
        "position_id": 9001,
        "action": "buy",
        "entry_type": "out",
        "symbol": "XAUUSD",
        "commission": 7.5,
        "lot_size": "1.00",
        "profit": 120.0,
        "deal_ticket": 55
    })
    .to_string()
}

async fn gateway_with(ledger: MockLedger) -> TestGateway {
    TestGateway::start_with(&test_config(), Arc::new(ledger)).await
}

#[tokio::test]
async fn missing_or_wrong_token_is_401() {
    let gw = gateway_with(MockLedger::new()).await;

    let (status, _) = send(gw.router(), Method::POST, URI, None, Some(body(5001))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // the admin token is not a webhook token
    let (status, _) = send(gw.router(), Method::POST, URI, Some(ADMIN_TOKEN), Some(body(5001))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_or_incomplete_body_is_400() {
    let gw = gateway_with(MockLedger::new()).await;

    let (status, _) = send(
        gw.router(),
        Method::POST,
        URI,
        Some(WEBHOOK_TOKEN),
        Some("{not json".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, message) = send(
        gw.router(),
        Method::POST,
        URI,
        Some(WEBHOOK_TOKEN),
        Some(json!({ "login_id": 5001, "position_id": 1 }).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.as_str().unwrap().contains("commission"));
}

#[tokio::test]
async fn unknown_account_is_404() {
    let gw = gateway_with(MockLedger::new()).await;
    let (status, _) = send(gw.router(), Method::POST, URI, Some(WEBHOOK_TOKEN), Some(body(7777))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_without_upstream_broker_is_accepted_without_entries() {
    let mut ledger = MockLedger::new();
    ledger.expect_create_entries().never();
    let gw = gateway_with(ledger).await;
    gw.seed_local_account(5001, 42, dec!(0)).await;
    gw.store.set_referrer(42, None).await;

    let (status, receipt) = send(gw.router(), Method::POST, URI, Some(WEBHOOK_TOKEN), Some(body(5001))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["login"], 5001);
    assert_eq!(receipt["position_id"], 9001);
    assert_eq!(receipt["result"], "no_upstream_broker");
    assert!(receipt["processing_ms"].as_f64().is_some());
}

#[tokio::test]
async fn upstream_broker_is_attributed() {
    let mut ledger = MockLedger::new();
    ledger
        .expect_create_entries()
        .withf(|event, attribution| {
            event.login == 5001
                && event.commission == dec!(7.5)
                && event.deal_ticket == Some(55)
                && attribution.ib_user_id == 7
        })
        .times(1)
        .returning(|_, _| Ok(3));
    let gw = gateway_with(ledger).await;
    gw.seed_local_account(5001, 42, dec!(0)).await;
    gw.store.set_referrer(42, Some(7)).await;

    let (status, receipt) = send(gw.router(), Method::POST, URI, Some(WEBHOOK_TOKEN), Some(body(5001))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["result"], "recorded");
    assert_eq!(receipt["entries"], 3);
}
