//! Capacity guard and cascade behavior: overlapping reservations,
//! deactivation, demand cancellation and the dead-letter path.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use capmarket::allocation::AllocationStatus;
use capmarket::catalog::ResourcePatch;
use capmarket::error::MarketError;
use capmarket::types::{BuilderId, Money, ProviderId};
use capmarket_testing::FailingDispatcher;
use capmarket_core::Clock;
use chrono::Duration;
use common::{demand_spec, harness, harness_with_dispatcher, resource_spec, selection, window};
use std::sync::Arc;

#[tokio::test]
async fn overlapping_windows_share_capacity() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 10))
        .await
        .unwrap();
    let demand_a = h.market.open_demand(demand_spec(BuilderId::new(), 6)).await.unwrap();
    let demand_b = h.market.open_demand(demand_spec(BuilderId::new(), 5)).await.unwrap();

    // Demand A takes 6 people June 1-10
    h.market
        .select(selection(resource.id, demand_a.id, 6, window("2025-06-01", "2025-06-10")))
        .await
        .unwrap();

    // Demand B wants 5 people June 5-15: 11 > 10 on the overlap days
    let err = h
        .market
        .select(selection(resource.id, demand_b.id, 5, window("2025-06-05", "2025-06-15")))
        .await
        .unwrap_err();
    match err {
        MarketError::CapacityExceeded {
            day,
            requested,
            committed,
            capacity,
            ..
        } => {
            assert_eq!(day, common::day("2025-06-05"));
            assert_eq!(requested, 5);
            assert_eq!(committed, 6);
            assert_eq!(capacity, 10);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // 4 people fit
    h.market
        .select(selection(resource.id, demand_b.id, 4, window("2025-06-05", "2025-06-15")))
        .await
        .unwrap();

    h.market.check_capacity_invariant().await.unwrap();

    // Days outside the overlap show both loads
    let committed = h
        .market
        .query_committed(resource.id, window("2025-06-01", "2025-06-15"))
        .await
        .unwrap();
    assert_eq!(committed[&common::day("2025-06-03")], 6);
    assert_eq!(committed[&common::day("2025-06-07")], 10);
    assert_eq!(committed[&common::day("2025-06-12")], 4);
}

#[tokio::test]
async fn failed_selection_writes_nothing() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 3))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 3)).await.unwrap();
    let w = window("2025-06-01", "2025-06-05");

    h.market.select(selection(resource.id, demand.id, 3, w)).await.unwrap();
    let before = h.market.query_committed(resource.id, w).await.unwrap();

    let err = h
        .market
        .select(selection(resource.id, demand.id, 1, window("2025-06-03", "2025-06-08")))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::CapacityExceeded { .. }));

    let after = h
        .market
        .query_committed(resource.id, window("2025-06-01", "2025-06-08"))
        .await
        .unwrap();
    // Untouched inside the reserved window and zero outside it
    for (day, count) in &before {
        assert_eq!(after[day], *count);
    }
    assert_eq!(after[&common::day("2025-06-07")], 0);
    // The losing selection left no allocation behind
    assert_eq!(h.market.demand(demand.id).await.unwrap().resources_selected, 1);
}

#[tokio::test]
async fn selection_window_must_fit_availability() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 5))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 5)).await.unwrap();

    // Listing covers June only
    let err = h
        .market
        .select(selection(resource.id, demand.id, 2, window("2025-06-25", "2025-07-05")))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation { .. }));
}

#[tokio::test]
async fn deactivation_cascades_over_open_allocations() {
    let h = harness();
    let provider = ProviderId::new();
    let resource = h.market.register_resource(resource_spec(provider, 10)).await.unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 10)).await.unwrap();

    // One allocation pending, one accepted
    let pending = h
        .market
        .select(selection(resource.id, demand.id, 3, window("2025-06-01", "2025-06-05")))
        .await
        .unwrap();
    let pending = h.market.invite(pending.id).await.unwrap();

    let accepted = h
        .market
        .select(selection(resource.id, demand.id, 4, window("2025-06-10", "2025-06-14")))
        .await
        .unwrap();
    let accepted = h.market.invite(accepted.id).await.unwrap();
    let deadline = h.clock.now() + Duration::days(2);
    let accepted = h.market.request_offer(accepted.id, deadline).await.unwrap();
    let accepted = h
        .market
        .submit_offer(accepted.id, Money::from_cents(7000))
        .await
        .unwrap();
    let accepted = h.market.accept(accepted.id).await.unwrap();
    assert_eq!(
        h.market.demand(demand.id).await.unwrap().status,
        capmarket::DemandStatus::PartiallyFilled
    );

    h.dispatcher.clear();
    let deactivated = h.market.deactivate_resource(resource.id).await.unwrap();
    assert_eq!(deactivated.status, capmarket::ResourceStatus::Cancelled);

    // Both allocations rejected, all capacity released
    assert_eq!(
        h.market.allocation(pending.id).await.unwrap().status(),
        AllocationStatus::Rejected
    );
    assert_eq!(
        h.market.allocation(accepted.id).await.unwrap().status(),
        AllocationStatus::Rejected
    );
    let committed = h
        .market
        .query_committed(resource.id, window("2025-06-01", "2025-06-30"))
        .await
        .unwrap();
    assert!(committed.values().all(|&c| c == 0));

    // Demand derives back to open, and both rejections were notified
    assert_eq!(
        h.market.demand(demand.id).await.unwrap().status,
        capmarket::DemandStatus::Open
    );
    let emitted = h.dispatcher.emitted();
    assert_eq!(emitted.len(), 2);
    assert!(emitted.iter().all(|n| n.event_type == "allocation_rejected"));

    // A cancelled resource accepts no further writes
    let err = h.market.deactivate_resource(resource.id).await.unwrap_err();
    assert!(matches!(err, MarketError::InvalidResourceState { .. }));
    let err = h
        .market
        .select(selection(resource.id, demand.id, 1, window("2025-06-01", "2025-06-02")))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidResourceState { .. }));
}

#[tokio::test]
async fn demand_cancellation_cascades_and_blocks_selection() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 10))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 6)).await.unwrap();

    let allocation = h
        .market
        .select(selection(resource.id, demand.id, 6, window("2025-06-01", "2025-06-10")))
        .await
        .unwrap();
    let allocation = h.market.invite(allocation.id).await.unwrap();

    let cancelled = h.market.cancel_demand(demand.id).await.unwrap();
    assert_eq!(cancelled.status, capmarket::DemandStatus::Cancelled);
    assert_eq!(
        h.market.allocation(allocation.id).await.unwrap().status(),
        AllocationStatus::Rejected
    );
    assert!(h
        .market
        .query_committed(resource.id, window("2025-06-01", "2025-06-10"))
        .await
        .unwrap()
        .values()
        .all(|&c| c == 0));

    // Cancelled demand takes no new selections and stays cancelled
    let err = h
        .market
        .select(selection(resource.id, demand.id, 1, window("2025-06-01", "2025-06-02")))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Conflict { .. }));
    let err = h.market.cancel_demand(demand.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict { .. }));
}

#[tokio::test]
async fn select_bulk_guards_each_selection_individually() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 5))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 10)).await.unwrap();
    let w = window("2025-06-01", "2025-06-05");

    let outcomes = h
        .market
        .select_bulk(vec![
            selection(resource.id, demand.id, 3, w),
            selection(resource.id, demand.id, 3, w), // 6 > 5, must fail
            selection(resource.id, demand.id, 2, w),
        ])
        .await;

    assert!(outcomes[0].is_ok());
    assert!(matches!(
        outcomes[1],
        Err(MarketError::CapacityExceeded { .. })
    ));
    assert!(outcomes[2].is_ok());
    h.market.check_capacity_invariant().await.unwrap();
}

#[tokio::test]
async fn patch_cannot_shrink_head_count_below_committed_capacity() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 5))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 4)).await.unwrap();
    h.market
        .select(selection(resource.id, demand.id, 4, window("2025-06-02", "2025-06-06")))
        .await
        .unwrap();

    let shrink = ResourcePatch {
        person_count: Some(2),
        ..ResourcePatch::default()
    };
    let err = h.market.update_resource(resource.id, shrink).await.unwrap_err();
    match err {
        MarketError::CapacityExceeded {
            day,
            committed,
            capacity,
            ..
        } => {
            assert_eq!(day, common::day("2025-06-02"));
            assert_eq!(committed, 4);
            assert_eq!(capacity, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The rejected patch changed nothing
    assert_eq!(h.market.resource(resource.id).await.unwrap().person_count, 5);

    // Shrinking down to the committed load still fits
    let fit = ResourcePatch {
        person_count: Some(4),
        ..ResourcePatch::default()
    };
    h.market.update_resource(resource.id, fit).await.unwrap();
    h.market.check_capacity_invariant().await.unwrap();
}

#[tokio::test]
async fn patch_window_must_keep_live_allocations_enclosed() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 5))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 2)).await.unwrap();
    let allocation = h
        .market
        .select(selection(resource.id, demand.id, 2, window("2025-06-20", "2025-06-25")))
        .await
        .unwrap();

    let cut = ResourcePatch {
        window: Some(window("2025-06-01", "2025-06-07")),
        ..ResourcePatch::default()
    };
    let err = h.market.update_resource(resource.id, cut).await.unwrap_err();
    assert!(matches!(err, MarketError::Conflict { .. }));
    assert_eq!(
        h.market.resource(resource.id).await.unwrap().window,
        window("2025-06-01", "2025-06-30")
    );

    // A tightened window that still covers the allocation goes through
    let tightened = ResourcePatch {
        window: Some(window("2025-06-15", "2025-06-30")),
        ..ResourcePatch::default()
    };
    let updated = h.market.update_resource(resource.id, tightened).await.unwrap();
    assert_eq!(updated.window, window("2025-06-15", "2025-06-30"));

    // Terminal allocations no longer pin the window
    h.market.reject(allocation.id, "builder withdrew").await.unwrap();
    let cut = ResourcePatch {
        window: Some(window("2025-06-15", "2025-06-18")),
        ..ResourcePatch::default()
    };
    h.market.update_resource(resource.id, cut).await.unwrap();
}

#[tokio::test]
async fn failed_dispatch_lands_in_dlq_without_rolling_back() {
    let h = harness_with_dispatcher(Arc::new(FailingDispatcher::new("broker offline")));
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 5))
        .await
        .unwrap();
    let demand = h.market.open_demand(demand_spec(BuilderId::new(), 5)).await.unwrap();

    let allocation = h
        .market
        .select(selection(resource.id, demand.id, 2, window("2025-06-01", "2025-06-03")))
        .await
        .unwrap();
    let allocation = h.market.invite(allocation.id).await.unwrap();

    // The transition committed even though the notification failed
    assert_eq!(allocation.status(), AllocationStatus::Invited);
    let dlq = h.market.dlq();
    assert_eq!(dlq.len(), 1);
    let letter = dlq.peek().unwrap();
    assert_eq!(letter.notification.event_type, "resource_invited");
    assert!(letter.error.contains("broker offline"));

    assert!(h.market.health().status.is_healthy());

    // Walk the allocation to completion: four more failed dispatches push
    // the queue to 5 of 8, past the degraded threshold
    let deadline = h.clock.now() + Duration::days(1);
    let allocation = h.market.request_offer(allocation.id, deadline).await.unwrap();
    let allocation = h
        .market
        .submit_offer(allocation.id, Money::from_cents(7000))
        .await
        .unwrap();
    let allocation = h.market.accept(allocation.id).await.unwrap();
    h.market.complete(allocation.id).await.unwrap();

    assert_eq!(dlq.len(), 5);
    assert!(h.market.health().status.is_degraded());
}
