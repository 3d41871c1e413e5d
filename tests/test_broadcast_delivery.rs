//! Broadcast fan-out integration tests: per-subscriber classification,
//! rate-limit isolation, and offline hand-off


use riskfeed::protocol::{
    DeliveryOutcome, Reading, ServerPayload, Severity, Thresholds,
};
use riskfeed::server::{BroadcastEngine, SubscriberRegistry};
use riskfeed::testing::mocks::RecordingNotifier;
use riskfeed::tier::{StaticTierLimits, Tier, TierLimitSource};
use std::sync::Arc;
use test_helpers::{claims, eventually};

fn stack() -> (
    Arc<BroadcastEngine>,
    Arc<SubscriberRegistry>,
    Arc<RecordingNotifier>,
) {
    let limits: Arc<dyn TierLimitSource> = Arc::new(StaticTierLimits::default());
    let registry = Arc::new(SubscriberRegistry::new(
        Arc::clone(&limits),
        Thresholds::default(),
    ));
    let notifier = RecordingNotifier::new();
    let engine = Arc::new(BroadcastEngine::new(
        Arc::clone(&registry),
        limits,
        notifier.clone(),
    ));
    (engine, registry, notifier)
}

fn reading(score: f64) -> Reading {
    Reading::new(score, serde_json::Value::Null).unwrap()
}

#[tokio::test]
async fn test_score_at_high_cut_point_fans_out_as_alert() {
    let (engine, registry, _) = stack();
    let mut handle = registry
        .register(&claims("sub-1", Tier::Standard), None)
        .await
        .unwrap();
    // Thresholds {low: 0.3, medium: 0.6, high: 0.8}
    registry
        .update_thresholds("sub-1", Thresholds::new(0.3, 0.6, 0.8).unwrap())
        .await;

    engine.publish_reading(reading(0.8)).await;

    let frame = handle.outbound.recv().await.unwrap();
    match frame.payload {
        ServerPayload::Alert(body) => {
            assert_eq!(body.band, Severity::High);
            assert!(body.alert_triggered);
        }
        other => panic!("expected alert frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_score_below_high_cut_point_is_routine_update() {
    let (engine, registry, _) = stack();
    let mut handle = registry
        .register(&claims("sub-1", Tier::Standard), None)
        .await
        .unwrap();
    registry
        .update_thresholds("sub-1", Thresholds::new(0.3, 0.6, 0.8).unwrap())
        .await;

    engine.publish_reading(reading(0.79)).await;

    let frame = handle.outbound.recv().await.unwrap();
    match frame.payload {
        ServerPayload::Update(body) => {
            assert_eq!(body.band, Severity::Medium);
            assert!(!body.alert_triggered);
        }
        other => panic!("expected update frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_same_reading_classified_per_subscriber() {
    let (engine, registry, _) = stack();
    let mut cautious = registry
        .register(&claims("sub-cautious", Tier::Standard), None)
        .await
        .unwrap();
    let mut relaxed = registry
        .register(&claims("sub-relaxed", Tier::Standard), None)
        .await
        .unwrap();
    registry
        .update_thresholds("sub-cautious", Thresholds::new(0.1, 0.3, 0.5).unwrap())
        .await;
    registry
        .update_thresholds("sub-relaxed", Thresholds::new(0.5, 0.7, 0.9).unwrap())
        .await;

    engine.publish_reading(reading(0.6)).await;

    let frame = cautious.outbound.recv().await.unwrap();
    assert!(matches!(frame.payload, ServerPayload::Alert(_)));
    let frame = relaxed.outbound.recv().await.unwrap();
    match frame.payload {
        ServerPayload::Update(body) => assert_eq!(body.band, Severity::Low),
        other => panic!("expected update frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limited_subscriber_does_not_affect_others() {
    let (engine, registry, _) = stack();
    let mut capped = registry
        .register(&claims("sub-capped", Tier::Standard), None)
        .await
        .unwrap();
    let mut open = registry
        .register(&claims("sub-open", Tier::Premium), None)
        .await
        .unwrap();

    // Exhaust the standard tier's 10-per-minute budget
    for _ in 0..10 {
        engine.publish_reading(reading(0.2)).await;
    }
    while capped.outbound.try_recv().is_ok() {}
    while open.outbound.try_recv().is_ok() {}

    let summary = engine.publish_reading(reading(0.9)).await;
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(summary.delivered, 1);

    // The premium subscriber got the frame in the same cycle
    let frame = open.outbound.recv().await.unwrap();
    assert!(matches!(frame.payload, ServerPayload::Alert(_)));
    assert!(capped.outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_multiple_connections_per_subscriber_all_receive() {
    let (engine, registry, _) = stack();
    let c = claims("sub-multi", Tier::Premium);
    let mut first = registry.register(&c, None).await.unwrap();
    let mut second = registry.register(&c, None).await.unwrap();

    let summary = engine.publish_reading(reading(0.4)).await;
    assert_eq!(summary.delivered, 2);
    assert!(first.outbound.recv().await.is_some());
    assert!(second.outbound.recv().await.is_some());
}

#[tokio::test]
async fn test_dead_connection_isolated_from_healthy_ones() {
    let (engine, registry, _) = stack();
    let dead = registry
        .register(&claims("sub-a", Tier::Standard), None)
        .await
        .unwrap();
    let mut healthy = registry
        .register(&claims("sub-b", Tier::Standard), None)
        .await
        .unwrap();
    drop(dead.outbound);
    drop(dead.sender);

    let summary = engine.publish_reading(reading(0.9)).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.delivered, 1);
    assert!(healthy.outbound.recv().await.is_some());

    // The dead connection was unregistered, not retried
    assert!(registry.live_connections_for("sub-a").await.is_empty());
    assert_eq!(registry.stats().standard, 1);
}

#[tokio::test]
async fn test_offline_handoff_only_for_alerts_with_target() {
    let (engine, registry, notifier) = stack();

    // Offline subscriber with a webhook target
    let with_target = registry
        .register(
            &claims("sub-hooked", Tier::Standard),
            Some("https://hooks.example/alerts".into()),
        )
        .await
        .unwrap();
    registry.unregister(with_target.connection_id).await;

    // Offline subscriber without one
    let without_target = registry
        .register(&claims("sub-bare", Tier::Standard), None)
        .await
        .unwrap();
    registry.unregister(without_target.connection_id).await;

    // Routine reading: nobody is notified
    engine.publish_reading(reading(0.4)).await;
    tokio::task::yield_now().await;
    assert!(notifier.events().is_empty());

    // Alerting reading: only the subscriber with a target is handed off
    let summary = engine.publish_reading(reading(0.9)).await;
    assert_eq!(summary.queued_offline, 1);
    assert!(eventually(|| notifier.events().len() == 1).await);

    let events = notifier.events();
    assert_eq!(events[0].subscriber_id, "sub-hooked");
    assert_eq!(events[0].outcome, DeliveryOutcome::Queued);
    assert_eq!(events[0].band, Severity::High);
}

#[tokio::test]
async fn test_new_reading_supersedes_cached_one() {
    let (engine, _, _) = stack();
    engine.publish_reading(reading(0.2)).await;
    engine.publish_reading(reading(0.7)).await;
    assert_eq!(engine.last_reading().await.unwrap().score, 0.7);
}
