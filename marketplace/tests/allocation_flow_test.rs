//! End-to-end allocation lifecycle: selection through completion, with
//! calendar and notification side effects checked at each step.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use capmarket::allocation::{AllocationPhase, AllocationStatus};
use capmarket::error::MarketError;
use capmarket::types::{BuilderId, Money, ProviderId};
use capmarket_core::Clock;
use chrono::Duration;
use common::{demand_spec, harness, resource_spec, selection, window};

#[tokio::test]
async fn full_lifecycle_reaches_completed() {
    let h = harness();
    let provider = ProviderId::new();
    let builder = BuilderId::new();

    let resource = h.market.register_resource(resource_spec(provider, 10)).await.unwrap();
    let demand = h.market.open_demand(demand_spec(builder, 6)).await.unwrap();
    let w = window("2025-06-02", "2025-06-06");

    // Selection reserves tentative capacity
    let allocation = h
        .market
        .select(selection(resource.id, demand.id, 6, w))
        .await
        .unwrap();
    assert_eq!(allocation.status(), AllocationStatus::PreSelected);
    let committed = h.market.query_committed(resource.id, w).await.unwrap();
    assert!(committed.values().all(|&c| c == 6));

    // Invite stamps the send time and notifies the provider
    let t_invite = h.clock.now();
    let allocation = h.market.invite(allocation.id).await.unwrap();
    match &allocation.phase {
        AllocationPhase::Invited {
            invitation_sent_at,
            invitation_viewed_at,
        } => {
            assert_eq!(*invitation_sent_at, t_invite);
            assert_eq!(*invitation_viewed_at, None);
        }
        other => panic!("unexpected phase: {other:?}"),
    }
    assert_eq!(h.dispatcher.emitted().last().unwrap().event_type, "resource_invited");
    assert_eq!(
        h.dispatcher.emitted().last().unwrap().recipient,
        *provider.as_uuid()
    );

    // Provider opens the invitation
    h.clock.advance(Duration::hours(2));
    let t_view = h.clock.now();
    let allocation = h.market.mark_invitation_viewed(allocation.id).await.unwrap();
    match &allocation.phase {
        AllocationPhase::Invited {
            invitation_viewed_at,
            ..
        } => assert_eq!(*invitation_viewed_at, Some(t_view)),
        other => panic!("unexpected phase: {other:?}"),
    }

    // Offer round trip
    let deadline = h.clock.now() + Duration::days(3);
    let allocation = h.market.request_offer(allocation.id, deadline).await.unwrap();
    assert_eq!(allocation.phase.deadline(), Some(deadline));

    h.clock.advance(Duration::days(1));
    let allocation = h
        .market
        .submit_offer(allocation.id, Money::from_cents(7200))
        .await
        .unwrap();
    assert_eq!(allocation.status(), AllocationStatus::OfferSubmitted);
    assert_eq!(allocation.phase.agreed_rate(), Some(Money::from_cents(7200)));
    // The submission notification goes to the builder
    assert_eq!(
        h.dispatcher.emitted().last().unwrap().recipient,
        *builder.as_uuid()
    );
    assert_eq!(h.market.demand(demand.id).await.unwrap().offers_received, 1);

    // Acceptance confirms the calendar and fills the demand
    let allocation = h.market.accept(allocation.id).await.unwrap();
    assert_eq!(allocation.status(), AllocationStatus::Accepted);
    let status = h.market.derived_resource_status(resource.id).await.unwrap();
    assert_eq!(status, capmarket::ResourceStatus::Allocated);
    assert_eq!(
        h.market.demand(demand.id).await.unwrap().status,
        capmarket::DemandStatus::Filled
    );

    // Completion frees capacity and keeps the entries for reporting
    let allocation = h.market.complete(allocation.id).await.unwrap();
    assert_eq!(allocation.status(), AllocationStatus::Completed);
    let committed = h.market.query_committed(resource.id, w).await.unwrap();
    assert!(committed.values().all(|&c| c == 0));

    let event_types: Vec<String> = h
        .dispatcher
        .emitted()
        .iter()
        .map(|n| n.event_type.clone())
        .collect();
    assert_eq!(
        event_types,
        vec![
            "resource_invited",
            "offer_requested",
            "offer_submitted",
            "allocation_accepted",
            "allocation_completed",
        ]
    );
}

#[tokio::test]
async fn calendar_stays_tentative_until_acceptance() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 5))
        .await
        .unwrap();
    let demand = h
        .market
        .open_demand(demand_spec(BuilderId::new(), 5))
        .await
        .unwrap();
    let w = window("2025-06-10", "2025-06-12");

    let allocation = h.market.select(selection(resource.id, demand.id, 3, w)).await.unwrap();
    assert_eq!(
        h.market.derived_resource_status(resource.id).await.unwrap(),
        capmarket::ResourceStatus::Reserved
    );

    let allocation = h.market.invite(allocation.id).await.unwrap();
    let deadline = h.clock.now() + Duration::days(2);
    let allocation = h.market.request_offer(allocation.id, deadline).await.unwrap();
    let allocation = h
        .market
        .submit_offer(allocation.id, Money::from_cents(8000))
        .await
        .unwrap();
    // Still only tentative entries
    assert_eq!(
        h.market.derived_resource_status(resource.id).await.unwrap(),
        capmarket::ResourceStatus::Reserved
    );

    h.market.accept(allocation.id).await.unwrap();
    assert_eq!(
        h.market.derived_resource_status(resource.id).await.unwrap(),
        capmarket::ResourceStatus::Allocated
    );
}

#[tokio::test]
async fn reject_releases_capacity_for_reuse() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 4))
        .await
        .unwrap();
    let demand = h
        .market
        .open_demand(demand_spec(BuilderId::new(), 4))
        .await
        .unwrap();
    let w = window("2025-06-02", "2025-06-04");

    let allocation = h.market.select(selection(resource.id, demand.id, 4, w)).await.unwrap();
    // Resource is fully booked now
    let err = h
        .market
        .select(selection(resource.id, demand.id, 1, w))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::CapacityExceeded { .. }));

    let rejected = h.market.reject(allocation.id, "provider declined").await.unwrap();
    assert_eq!(rejected.status(), AllocationStatus::Rejected);
    assert_eq!(h.dispatcher.emitted().last().unwrap().event_type, "allocation_rejected");

    // Capacity is free again
    h.market.select(selection(resource.id, demand.id, 4, w)).await.unwrap();
}

#[tokio::test]
async fn accepted_allocation_cannot_be_rejected_directly() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 4))
        .await
        .unwrap();
    let demand = h
        .market
        .open_demand(demand_spec(BuilderId::new(), 4))
        .await
        .unwrap();
    let w = window("2025-06-02", "2025-06-04");

    let allocation = h.market.select(selection(resource.id, demand.id, 2, w)).await.unwrap();
    let allocation = h.market.invite(allocation.id).await.unwrap();
    let deadline = h.clock.now() + Duration::days(1);
    let allocation = h.market.request_offer(allocation.id, deadline).await.unwrap();
    let allocation = h
        .market
        .submit_offer(allocation.id, Money::from_cents(7000))
        .await
        .unwrap();
    let allocation = h.market.accept(allocation.id).await.unwrap();

    let err = h.market.reject(allocation.id, "changed my mind").await.unwrap_err();
    assert_eq!(
        err,
        MarketError::InvalidTransition {
            from: AllocationStatus::Accepted,
            event: "reject",
        }
    );
    // Calendar untouched
    assert!(h
        .market
        .query_committed(resource.id, w)
        .await
        .unwrap()
        .values()
        .all(|&c| c == 2));
}

#[tokio::test]
async fn workflow_rejects_out_of_order_events() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 4))
        .await
        .unwrap();
    let demand = h
        .market
        .open_demand(demand_spec(BuilderId::new(), 4))
        .await
        .unwrap();

    let allocation = h
        .market
        .select(selection(resource.id, demand.id, 2, window("2025-06-02", "2025-06-04")))
        .await
        .unwrap();

    // Cannot accept before an offer exists
    let err = h.market.accept(allocation.id).await.unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));

    // Cannot submit an offer before one is requested
    let err = h
        .market
        .submit_offer(allocation.id, Money::from_cents(100))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));

    // No notification went out for the failed attempts
    assert_eq!(h.dispatcher.count(), 0);
}

#[tokio::test]
async fn pre_selection_emits_no_notification() {
    let h = harness();
    let resource = h
        .market
        .register_resource(resource_spec(ProviderId::new(), 4))
        .await
        .unwrap();
    let demand = h
        .market
        .open_demand(demand_spec(BuilderId::new(), 4))
        .await
        .unwrap();

    let allocation = h
        .market
        .select(selection(resource.id, demand.id, 2, window("2025-06-02", "2025-06-04")))
        .await
        .unwrap();
    assert_eq!(h.dispatcher.count(), 0);

    // Marking a view before the invite is illegal, not silently ignored
    let err = h.market.mark_invitation_viewed(allocation.id).await.unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { .. }));
}
