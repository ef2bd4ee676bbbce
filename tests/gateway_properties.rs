mod common;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use common::TestGateway;
use tradegate::config::CacheConfig;
use tradegate::domain::{FundStatus, TradingGroup};
use tradegate::lookup_cache::{FailedLookupCache, LookupKey};
use tradegate::venue::{GroupDescriptor, VenueCode};
use tradegate::{GatewayError, RecordStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_invalidation_never_yields_two_live_sessions() {
    let gw = TestGateway::start().await;
    let manager = gw.components.connections.clone();

    let tasks = (0..8).map(|worker| {
        let manager = manager.clone();
        tokio::spawn(async move {
            for round in 0..10 {
                manager.get_connection().await.unwrap();
                if (worker + round) % 3 == 0 {
                    manager.invalidate_async().await.unwrap();
                }
            }
        })
    });
    for joined in futures::future::join_all(tasks).await {
        joined.unwrap();
    }
    assert!(gw.venue.max_live_sessions() <= 1);

    gw.rotate("venue-b.test:443").await;
    let conn = manager.get_connection().await.unwrap();
    assert_eq!(conn.settings().server_address, "venue-b.test:443");
    assert_eq!(gw.venue.live_sessions(), 1);
}

#[tokio::test]
async fn confirmed_miss_suppresses_the_next_vendor_call() {
    let gw = TestGateway::start().await;
    let gateway = &gw.components.gateway;

    assert_eq!(gateway.get_balance(424242).await.unwrap(), Decimal::ZERO);
    let calls = gw.venue.call_count();
    assert_eq!(gateway.get_balance(424242).await.unwrap(), Decimal::ZERO);
    assert_eq!(gw.venue.call_count(), calls);
}

#[test]
fn failed_lookup_expires_after_ttl() {
    let cache = FailedLookupCache::with_defaults();
    let key = LookupKey::new(7u64, "balance");
    let now = std::time::Instant::now();

    cache.record_failure_at(&key, Duration::from_secs(60), now);
    assert!(!cache.should_call_vendor_at(&key, now));
    assert!(cache.should_call_vendor_at(&key, now + Duration::from_secs(61)));
}

#[test]
fn log_limiter_caps_per_key() {
    let cache = FailedLookupCache::new(&CacheConfig {
        max_log_rate: 3,
        ..CacheConfig::default()
    });
    let key = LookupKey::new(7u64, "not_found");
    let allowed = (0..200).filter(|_| cache.should_log(&key)).count();
    assert_eq!(allowed, 3);
}

fn flags(groups: &[TradingGroup]) -> Vec<(String, bool, bool, bool)> {
    groups
        .iter()
        .map(|g| (g.name.clone(), g.active, g.is_default, g.is_demo_default))
        .collect()
}

#[tokio::test]
async fn repeated_sync_is_idempotent() {
    let gw = TestGateway::start().await;
    let groups = &gw.components.groups;

    groups.sync().await.unwrap();
    groups.set_default("real\\standard").await.unwrap();
    groups.set_demo_default("demo\\standard").await.unwrap();
    let first = groups.list_groups(false).await.unwrap();

    assert_eq!(groups.sync().await.unwrap(), 2);
    let second = groups.list_groups(false).await.unwrap();
    assert_eq!(flags(&first), flags(&second));
}

#[tokio::test]
async fn moving_the_default_leaves_exactly_one_holder() {
    let gw = TestGateway::start().await;
    gw.venue
        .add_group(GroupDescriptor::new().with_field("group", "real\\vip"));
    let groups = &gw.components.groups;
    groups.sync().await.unwrap();

    groups.set_default("real\\standard").await.unwrap();
    groups.set_default("real\\vip").await.unwrap();

    let all = groups.list_groups(false).await.unwrap();
    let holders: Vec<_> = all.iter().filter(|g| g.is_default).map(|g| g.name.as_str()).collect();
    assert_eq!(holders, vec!["real\\vip"]);
    assert!(all.iter().all(|g| !g.is_demo_default));
}

#[tokio::test]
async fn non_positive_amount_has_no_side_effects() {
    let gw = TestGateway::start().await;
    gw.seed_account(5001, 1, dec!(500)).await;

    for amount in [dec!(0), dec!(-5)] {
        let err = gw
            .components
            .funds
            .deposit(5001, amount, "bad", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }
    assert_eq!(gw.venue.balance_call_count(), 0);
    assert!(gw.store.fund_operations().await.is_empty());
}

#[tokio::test]
async fn confirmed_deposit_updates_the_mirror() {
    let gw = TestGateway::start().await;
    gw.seed_account(5001, 1, dec!(500)).await;

    let record = gw
        .components
        .funds
        .deposit(5001, dec!(100), "wire", "test")
        .await
        .unwrap();
    assert_eq!(record.status, FundStatus::Approved);
    assert_eq!(record.balance_after, Some(dec!(600)));
    assert!(!record.fallback);

    let local = gw.store.find_account_by_login(5001).await.unwrap().unwrap();
    assert_eq!(local.balance, dec!(600));
    assert_eq!(gw.store.fund_operations().await.len(), 1);
}

#[tokio::test]
async fn failed_deposit_leaves_no_record() {
    let gw = TestGateway::start().await;
    gw.seed_account(5001, 1, dec!(500)).await;
    gw.venue.fail_balance_call(VenueCode::ERROR, 0);

    let err = gw
        .components
        .funds
        .deposit(5001, dec!(100), "wire", "test")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RemoteFailed { .. }));

    assert!(gw.store.fund_operations().await.is_empty());
    let local = gw.store.find_account_by_login(5001).await.unwrap().unwrap();
    assert_eq!(local.balance, dec!(500));
    assert_eq!(gw.venue.balance_of(5001), Some(dec!(500)));
}

#[tokio::test]
async fn non_numeric_deal_query_never_reaches_the_venue() {
    let gw = TestGateway::start().await;
    let to = chrono::Utc::now();
    let from = to - chrono::Duration::days(7);

    let deals = gw
        .components
        .gateway
        .get_deals("not-a-login", from, to)
        .await
        .unwrap();
    assert!(deals.is_empty());
    assert_eq!(gw.venue.connect_count(), 0);
    assert_eq!(gw.venue.call_count(), 0);
}
