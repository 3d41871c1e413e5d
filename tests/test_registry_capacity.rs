//! Registry capacity and tier-cap integration tests


use riskfeed::error::FeedError;
use riskfeed::protocol::Thresholds;
use riskfeed::server::SubscriberRegistry;
use riskfeed::tier::{StaticTierLimits, Tier, TierLimits};
use std::sync::Arc;
use test_helpers::claims;

fn registry_with(standard: TierLimits, premium: TierLimits) -> Arc<SubscriberRegistry> {
    Arc::new(SubscriberRegistry::new(
        Arc::new(StaticTierLimits::new(standard, premium)),
        Thresholds::default(),
    ))
}

#[tokio::test]
async fn test_cap_n_accepts_exactly_n_under_concurrency() {
    // Property: registering N+1 connections for a cap-N tier rejects exactly one
    for cap in [1usize, 3, 8] {
        let registry = registry_with(
            TierLimits {
                max_connections: cap,
                max_messages_per_minute: 10,
            },
            TierLimits {
                max_connections: 10,
                max_messages_per_minute: 100,
            },
        );

        let mut tasks = Vec::new();
        for _ in 0..cap + 1 {
            let registry = Arc::clone(&registry);
            let c = claims("sub-1", Tier::Standard);
            tasks.push(tokio::spawn(async move {
                registry.register(&c, None).await.map(|h| h.connection_id)
            }));
        }

        let mut accepted = 0;
        let mut capacity_rejections = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(FeedError::CapacityExceeded { .. }) => capacity_rejections += 1,
                Err(other) => panic!("unexpected rejection: {other}"),
            }
        }
        assert_eq!(accepted, cap, "cap {cap}");
        assert_eq!(capacity_rejections, 1, "cap {cap}");
        assert_eq!(registry.stats().standard, cap);
    }
}

#[tokio::test]
async fn test_unregister_frees_capacity() {
    let registry = registry_with(
        TierLimits {
            max_connections: 1,
            max_messages_per_minute: 10,
        },
        TierLimits {
            max_connections: 10,
            max_messages_per_minute: 100,
        },
    );
    let c = claims("sub-1", Tier::Standard);

    let first = registry.register(&c, None).await.unwrap();
    assert!(matches!(
        registry.register(&c, None).await,
        Err(FeedError::CapacityExceeded { .. })
    ));

    registry.unregister(first.connection_id).await;
    assert!(registry.register(&c, None).await.is_ok());
}

#[tokio::test]
async fn test_free_tier_never_registers() {
    let registry = registry_with(
        TierLimits {
            max_connections: 5,
            max_messages_per_minute: 10,
        },
        TierLimits {
            max_connections: 10,
            max_messages_per_minute: 100,
        },
    );
    let result = registry.register(&claims("sub-free", Tier::Free), None).await;
    assert!(matches!(result, Err(FeedError::TierNotEligible { .. })));
}

#[tokio::test]
async fn test_stats_track_tiers_independently() {
    let registry = registry_with(
        TierLimits {
            max_connections: 5,
            max_messages_per_minute: 10,
        },
        TierLimits {
            max_connections: 10,
            max_messages_per_minute: 100,
        },
    );

    let s1 = registry
        .register(&claims("sub-s", Tier::Standard), None)
        .await
        .unwrap();
    let _s2 = registry
        .register(&claims("sub-s", Tier::Standard), None)
        .await
        .unwrap();
    let _p1 = registry
        .register(&claims("sub-p", Tier::Premium), None)
        .await
        .unwrap();

    let stats = registry.stats();
    assert_eq!(stats.standard, 2);
    assert_eq!(stats.premium, 1);
    assert_eq!(stats.total, 3);

    registry.unregister(s1.connection_id).await;
    let stats = registry.stats();
    assert_eq!(stats.standard, 1);
    assert_eq!(stats.total, 2);
}
