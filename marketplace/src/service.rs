//! The marketplace service.
//!
//! [`Marketplace`] is the imperative shell around the pure domain modules.
//! All state lives in one [`MarketState`] behind a single `tokio` RwLock;
//! every mutating entry point runs its whole guard-and-apply sequence under
//! the write guard, which serializes all calendar writes. Nothing is
//! awaited while the guard is held; notifications go out after release and
//! a failed dispatch lands in the dead-letter queue instead of rolling
//! anything back.

use crate::allocation::{
    Allocation, AllocationEvent, AllocationPhase, AllocationStatus, SelectionRequest, transition,
};
use crate::calendar::CalendarState;
use crate::catalog::{
    Candidate, CandidateQuery, CatalogState, ProviderStatistics, Resource, ResourcePatch,
    ResourceSpec, apply_patch, derived_status, matches_query, order_candidates,
    provider_statistics, validate_spec,
};
use crate::config::MarketplaceConfig;
use crate::demand::{DemandRequest, DemandSpec, derive_status};
use crate::error::{MarketError, Result};
use crate::events::DomainEvent;
use crate::geo::GeoProvider;
use crate::kpi::{ResourceKpis, compute};
use crate::types::{
    AllocationId, DateWindow, DemandId, DemandStatus, Money, Pricing, ProviderId, ResourceId,
    ResourceStatus,
};
use capmarket_core::dispatch::NotificationDispatcher;
use capmarket_core::dlq::DeadLetterQueue;
use capmarket_core::environment::Clock;
use capmarket_core::health::HealthCheck;
use chrono::{DateTime, NaiveDate, Utc};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-operation outbox buffer; cascades are the only producers of more
/// than a couple of events.
type Outbox = SmallVec<[(DomainEvent, Uuid); 2]>;

/// External collaborators of the marketplace.
#[derive(Clone)]
pub struct MarketplaceEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Outbound notification channel
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    /// Proximity index
    pub geo: Arc<dyn GeoProvider>,
}

impl MarketplaceEnvironment {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        geo: Arc<dyn GeoProvider>,
    ) -> Self {
        Self {
            clock,
            dispatcher,
            geo,
        }
    }
}

/// All marketplace state. One instance, one lock.
#[derive(Clone, Debug, Default)]
pub struct MarketState {
    /// Listed resources
    pub catalog: CatalogState,
    /// Per-day commitment ledger
    pub calendar: CalendarState,
    /// Allocation arena
    pub allocations: HashMap<AllocationId, Allocation>,
    /// Demand arena
    pub demands: HashMap<DemandId, DemandRequest>,
    /// Append-only KPI snapshot history
    pub kpi_history: Vec<ResourceKpis>,
}

/// The marketplace service facade.
#[derive(Clone)]
pub struct Marketplace {
    state: Arc<RwLock<MarketState>>,
    env: MarketplaceEnvironment,
    config: MarketplaceConfig,
    dlq: DeadLetterQueue,
}

impl Marketplace {
    /// Create a marketplace with empty state.
    #[must_use]
    pub fn new(env: MarketplaceEnvironment, config: MarketplaceConfig) -> Self {
        let dlq = DeadLetterQueue::new(config.dlq_max_size);
        Self {
            state: Arc::new(RwLock::new(MarketState::default())),
            env,
            config,
            dlq,
        }
    }

    /// Handle to the dead-letter queue, for monitoring and redelivery.
    #[must_use]
    pub fn dlq(&self) -> DeadLetterQueue {
        self.dlq.clone()
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    /// List a new capacity resource.
    ///
    /// # Errors
    ///
    /// [`MarketError::Validation`] for a zero head-count, non-positive
    /// daily hours or an empty category.
    #[tracing::instrument(skip(self, spec))]
    pub async fn register_resource(&self, spec: ResourceSpec) -> Result<Resource> {
        validate_spec(&spec)?;
        let now = self.env.clock.now();

        let resource = Resource {
            id: ResourceId::new(),
            provider_id: spec.provider_id,
            project_id: spec.project_id,
            title: spec.title,
            description: spec.description,
            window: spec.window,
            person_count: spec.person_count,
            daily_hours: spec.daily_hours.unwrap_or(self.config.default_daily_hours),
            category: spec.category,
            subcategory: spec.subcategory,
            location: spec.location,
            status: ResourceStatus::Available,
            visibility: spec.visibility,
            pricing: spec.pricing.unwrap_or_else(|| Pricing {
                currency: self.config.default_currency.clone(),
                ..Pricing::default()
            }),
            skills: spec.skills,
            equipment: spec.equipment,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        state.catalog.insert(resource.clone());
        drop(state);

        metrics::counter!("marketplace.resources.registered").increment(1);
        tracing::info!(resource_id = %resource.id, provider_id = %resource.provider_id, "resource registered");
        Ok(resource)
    }

    /// Update a listed resource.
    ///
    /// A patch may not invalidate work already on the calendar: the new
    /// head-count must cover every committed day, and the new window must
    /// enclose every non-terminal allocation of the resource.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id,
    /// [`MarketError::InvalidResourceState`] when the resource is completed
    /// or cancelled, [`MarketError::Validation`] for bad patch values,
    /// [`MarketError::CapacityExceeded`] when the patched head-count falls
    /// below a day's committed total, [`MarketError::Conflict`] when the
    /// patched window strands a live allocation.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update_resource(&self, id: ResourceId, patch: ResourcePatch) -> Result<Resource> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;

        let resource = state
            .catalog
            .get(id)
            .ok_or_else(|| MarketError::resource_not_found(id))?;
        if resource.status.is_terminal() {
            return Err(MarketError::InvalidResourceState {
                id,
                status: resource.status,
            });
        }

        if let Some(person_count) = patch.person_count {
            for (day, ledger) in state.calendar.ledger_days(id) {
                let committed = ledger.committed();
                if committed > person_count {
                    return Err(MarketError::CapacityExceeded {
                        resource_id: id,
                        day: *day,
                        requested: 0,
                        committed,
                        capacity: person_count,
                    });
                }
            }
        }
        if let Some(window) = &patch.window {
            if let Some(stranded) = state
                .allocations
                .values()
                .find(|a| a.resource_id == id && !a.is_terminal() && !window.encloses(&a.window))
            {
                return Err(MarketError::conflict(format!(
                    "allocation {} occupies {} outside the new availability window",
                    stranded.id, stranded.window
                )));
            }
        }

        let resource = state
            .catalog
            .get_mut(id)
            .ok_or_else(|| MarketError::resource_not_found(id))?;
        apply_patch(resource, patch, now)?;
        Ok(resource.clone())
    }

    /// Withdraw a resource and cascade over its open allocations.
    ///
    /// Every non-terminal allocation of the resource is rejected and its
    /// calendar entries released; the whole cascade commits atomically
    /// under the write guard.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id,
    /// [`MarketError::InvalidResourceState`] when already terminal.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate_resource(&self, id: ResourceId) -> Result<Resource> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;

        let resource = state
            .catalog
            .get_mut(id)
            .ok_or_else(|| MarketError::resource_not_found(id))?;
        if resource.status.is_terminal() {
            return Err(MarketError::InvalidResourceState {
                id,
                status: resource.status,
            });
        }
        resource.status = ResourceStatus::Cancelled;
        resource.updated_at = now;
        let snapshot = resource.clone();

        let open: Vec<AllocationId> = state
            .allocations
            .values()
            .filter(|a| a.resource_id == id && !a.is_terminal())
            .map(|a| a.id)
            .collect();

        let mut outbox = Outbox::new();
        for allocation_id in open {
            let (_, event) = Self::apply_event(
                &mut state,
                allocation_id,
                AllocationEvent::Reject {
                    reason: "resource deactivated".to_string(),
                },
                now,
            )?;
            Self::push_outbox(&state, &mut outbox, event);
        }
        drop(state);

        metrics::counter!("marketplace.resources.deactivated").increment(1);
        tracing::info!(resource_id = %id, cascaded = outbox.len(), "resource deactivated");
        self.dispatch_outbox(outbox).await;
        Ok(snapshot)
    }

    /// Proximity-filtered candidate search.
    ///
    /// The geo provider scopes by distance; category, window coverage,
    /// head-count, rate ceiling, skill and equipment filters are applied
    /// here. Results are a snapshot of live data ordered by distance, then
    /// published rate.
    ///
    /// # Errors
    ///
    /// Propagates geo provider failures.
    #[tracing::instrument(skip(self, query))]
    pub async fn list_candidates(&self, query: CandidateQuery) -> Result<Vec<Candidate>> {
        let radius = query.radius_km.unwrap_or(self.config.default_radius_km);
        let limit = query.limit.unwrap_or(self.config.max_candidates);

        // Geo lookup happens before the read guard is taken
        let matches = self.env.geo.nearby(query.location.clone(), radius).await?;

        let state = self.state.read().await;
        let mut candidates: Vec<Candidate> = matches
            .into_iter()
            .filter_map(|m| {
                state.catalog.get(m.resource_id).and_then(|resource| {
                    matches_query(resource, &state.calendar, &query).then(|| Candidate {
                        resource: resource.clone(),
                        distance_km: m.distance_km,
                    })
                })
            })
            .collect();
        drop(state);

        order_candidates(&mut candidates);
        candidates.truncate(limit);
        metrics::counter!("marketplace.candidates.searched").increment(1);
        Ok(candidates)
    }

    /// Fetch a resource by id.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id.
    pub async fn resource(&self, id: ResourceId) -> Result<Resource> {
        let state = self.state.read().await;
        state
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| MarketError::resource_not_found(id))
    }

    /// Effective status of a resource (terminal stored status, otherwise
    /// derived from the calendar).
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id.
    pub async fn derived_resource_status(&self, id: ResourceId) -> Result<ResourceStatus> {
        let state = self.state.read().await;
        let resource = state
            .catalog
            .get(id)
            .ok_or_else(|| MarketError::resource_not_found(id))?;
        Ok(derived_status(resource, &state.calendar))
    }

    /// Read-only roll-up of one provider's listings.
    pub async fn provider_statistics(&self, provider_id: ProviderId) -> ProviderStatistics {
        let state = self.state.read().await;
        provider_statistics(&state.catalog, &state.calendar, provider_id)
    }

    // ------------------------------------------------------------------
    // Demand
    // ------------------------------------------------------------------

    /// Open a demand request.
    ///
    /// # Errors
    ///
    /// [`MarketError::Validation`] for a zero head-count or empty category.
    #[tracing::instrument(skip(self, spec))]
    pub async fn open_demand(&self, spec: DemandSpec) -> Result<DemandRequest> {
        if spec.required_person_count == 0 {
            return Err(MarketError::validation(
                "required_person_count must be at least 1",
            ));
        }
        if spec.category.trim().is_empty() {
            return Err(MarketError::validation("category must not be empty"));
        }
        let now = self.env.clock.now();
        let demand = DemandRequest::open(DemandId::new(), spec, now);

        let mut state = self.state.write().await;
        state.demands.insert(demand.id, demand.clone());
        drop(state);

        metrics::counter!("marketplace.demands.opened").increment(1);
        tracing::info!(demand_id = %demand.id, "demand opened");
        Ok(demand)
    }

    /// Record that matching surfaced a candidate for the demand.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] when demand or resource is unknown.
    pub async fn record_match(
        &self,
        demand_id: DemandId,
        resource_id: ResourceId,
    ) -> Result<DemandRequest> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;
        if state.catalog.get(resource_id).is_none() {
            return Err(MarketError::resource_not_found(resource_id));
        }
        let demand = state
            .demands
            .get_mut(&demand_id)
            .ok_or_else(|| MarketError::demand_not_found(demand_id))?;
        demand.resources_found += 1;
        demand.updated_at = now;
        Ok(demand.clone())
    }

    /// Fetch a demand by id.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id.
    pub async fn demand(&self, id: DemandId) -> Result<DemandRequest> {
        let state = self.state.read().await;
        state
            .demands
            .get(&id)
            .cloned()
            .ok_or_else(|| MarketError::demand_not_found(id))
    }

    /// Cancel a demand and cascade over its open allocations.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id,
    /// [`MarketError::Conflict`] when already cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_demand(&self, id: DemandId) -> Result<DemandRequest> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;

        let demand = state
            .demands
            .get_mut(&id)
            .ok_or_else(|| MarketError::demand_not_found(id))?;
        if demand.status == DemandStatus::Cancelled {
            return Err(MarketError::conflict(format!(
                "demand {id} is already cancelled"
            )));
        }
        demand.status = DemandStatus::Cancelled;
        demand.updated_at = now;

        let open: Vec<AllocationId> = state
            .allocations
            .values()
            .filter(|a| a.demand_id == id && !a.is_terminal())
            .map(|a| a.id)
            .collect();

        let mut outbox = Outbox::new();
        for allocation_id in open {
            let (_, event) = Self::apply_event(
                &mut state,
                allocation_id,
                AllocationEvent::Reject {
                    reason: "demand cancelled".to_string(),
                },
                now,
            )?;
            Self::push_outbox(&state, &mut outbox, event);
        }

        let snapshot = state
            .demands
            .get(&id)
            .cloned()
            .ok_or_else(|| MarketError::demand_not_found(id))?;
        drop(state);

        metrics::counter!("marketplace.demands.cancelled").increment(1);
        tracing::info!(demand_id = %id, cascaded = outbox.len(), "demand cancelled");
        self.dispatch_outbox(outbox).await;
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Allocation workflow
    // ------------------------------------------------------------------

    /// Select a resource for a demand, reserving tentative capacity.
    ///
    /// The overbooking guard and the calendar write run under one write
    /// guard, so two racing selections for the last unit cannot both
    /// succeed.
    ///
    /// # Errors
    ///
    /// [`MarketError::Validation`] for bad input,
    /// [`MarketError::NotFound`] for unknown ids,
    /// [`MarketError::Conflict`] for a cancelled demand,
    /// [`MarketError::InvalidResourceState`] for a terminal resource,
    /// [`MarketError::CapacityExceeded`] when a day in the window is full.
    #[tracing::instrument(skip(self, request))]
    pub async fn select(&self, request: SelectionRequest) -> Result<Allocation> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;
        let outcome = Self::select_locked(&mut state, request, now);
        drop(state);

        match &outcome {
            Ok(allocation) => {
                metrics::counter!("marketplace.select.granted").increment(1);
                tracing::info!(allocation_id = %allocation.id, "selection granted");
            }
            Err(err @ MarketError::CapacityExceeded { .. }) => {
                metrics::counter!("marketplace.select.capacity_exceeded").increment(1);
                tracing::warn!(error = %err, "selection refused by capacity guard");
            }
            Err(_) => {}
        }
        outcome
    }

    /// Select several resources for one demand in a single critical
    /// section. Each selection is guarded individually; one failure does
    /// not abort the others.
    pub async fn select_bulk(
        &self,
        requests: Vec<SelectionRequest>,
    ) -> Vec<Result<Allocation>> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;
        requests
            .into_iter()
            .map(|request| Self::select_locked(&mut state, request, now))
            .collect()
    }

    /// Send the invitation for a pre-selected allocation.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] or [`MarketError::InvalidTransition`].
    #[tracing::instrument(skip(self))]
    pub async fn invite(&self, id: AllocationId) -> Result<Allocation> {
        self.apply_and_dispatch(id, AllocationEvent::Invite).await
    }

    /// Record that the provider opened the invitation. Idempotent: repeat
    /// views keep the first timestamp.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] or [`MarketError::InvalidTransition`].
    pub async fn mark_invitation_viewed(&self, id: AllocationId) -> Result<Allocation> {
        self.apply_and_dispatch(id, AllocationEvent::MarkInvitationViewed)
            .await
    }

    /// Ask the provider for a binding offer.
    ///
    /// # Errors
    ///
    /// [`MarketError::ExpiredDeadline`] when the deadline is not in the
    /// future, plus the usual not-found/transition errors.
    #[tracing::instrument(skip(self))]
    pub async fn request_offer(
        &self,
        id: AllocationId,
        deadline: DateTime<Utc>,
    ) -> Result<Allocation> {
        self.apply_and_dispatch(id, AllocationEvent::RequestOffer { deadline })
            .await
    }

    /// Provider submits a rate.
    ///
    /// # Errors
    ///
    /// [`MarketError::ExpiredDeadline`] once the stored deadline has
    /// passed, plus the usual not-found/transition errors.
    #[tracing::instrument(skip(self))]
    pub async fn submit_offer(&self, id: AllocationId, rate: Money) -> Result<Allocation> {
        self.apply_and_dispatch(id, AllocationEvent::SubmitOffer { rate })
            .await
    }

    /// Builder accepts the submitted offer; calendar entries flip to
    /// confirmed and the demand status is recomputed.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] or [`MarketError::InvalidTransition`].
    #[tracing::instrument(skip(self))]
    pub async fn accept(&self, id: AllocationId) -> Result<Allocation> {
        let allocation = self.apply_and_dispatch(id, AllocationEvent::Accept).await?;
        metrics::counter!("marketplace.allocations.accepted").increment(1);
        Ok(allocation)
    }

    /// Decline an allocation, releasing its calendar entries.
    ///
    /// Accepted allocations cannot be rejected here; withdrawing accepted
    /// work goes through resource deactivation or demand cancellation.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] or [`MarketError::InvalidTransition`].
    #[tracing::instrument(skip(self, reason))]
    pub async fn reject(&self, id: AllocationId, reason: impl Into<String>) -> Result<Allocation> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;

        let current = state
            .allocations
            .get(&id)
            .ok_or_else(|| MarketError::allocation_not_found(id))?;
        // Accepted work is only withdrawn through cascades
        if current.status() == AllocationStatus::Accepted {
            return Err(MarketError::InvalidTransition {
                from: AllocationStatus::Accepted,
                event: "reject",
            });
        }

        let (allocation, domain_event) = Self::apply_event(
            &mut state,
            id,
            AllocationEvent::Reject {
                reason: reason.into(),
            },
            now,
        )?;
        let mut outbox = Outbox::new();
        Self::push_outbox(&state, &mut outbox, domain_event);
        drop(state);

        metrics::counter!("marketplace.allocations.rejected").increment(1);
        self.dispatch_outbox(outbox).await;
        Ok(allocation)
    }

    /// Record work completion for an accepted allocation.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] or [`MarketError::InvalidTransition`].
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, id: AllocationId) -> Result<Allocation> {
        let allocation = self.apply_and_dispatch(id, AllocationEvent::Complete).await?;
        metrics::counter!("marketplace.allocations.completed").increment(1);
        Ok(allocation)
    }

    /// Reject every allocation still waiting on an offer past its
    /// deadline. Intended to be driven by an external scheduler.
    ///
    /// # Errors
    ///
    /// Propagates internal errors; individual expiries cannot fail once
    /// identified.
    #[tracing::instrument(skip(self))]
    pub async fn expire_overdue_offers(&self) -> Result<Vec<AllocationId>> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;

        let overdue: Vec<AllocationId> = state
            .allocations
            .values()
            .filter(|a| {
                matches!(
                    &a.phase,
                    AllocationPhase::OfferRequested { deadline, .. } if *deadline < now
                )
            })
            .map(|a| a.id)
            .collect();

        let mut outbox = Outbox::new();
        for allocation_id in &overdue {
            let (_, event) = Self::apply_event(
                &mut state,
                *allocation_id,
                AllocationEvent::Reject {
                    reason: "offer deadline expired".to_string(),
                },
                now,
            )?;
            Self::push_outbox(&state, &mut outbox, event);
        }
        drop(state);

        if !overdue.is_empty() {
            metrics::counter!("marketplace.offers.expired").increment(overdue.len() as u64);
            tracing::info!(expired = overdue.len(), "overdue offers expired");
        }
        self.dispatch_outbox(outbox).await;
        Ok(overdue)
    }

    /// Fetch an allocation by id.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown id.
    pub async fn allocation(&self, id: AllocationId) -> Result<Allocation> {
        let state = self.state.read().await;
        state
            .allocations
            .get(&id)
            .cloned()
            .ok_or_else(|| MarketError::allocation_not_found(id))
    }

    // ------------------------------------------------------------------
    // Calendar and KPIs
    // ------------------------------------------------------------------

    /// Per-day committed head-counts for a resource over a window.
    ///
    /// # Errors
    ///
    /// [`MarketError::NotFound`] for an unknown resource.
    pub async fn query_committed(
        &self,
        resource_id: ResourceId,
        window: DateWindow,
    ) -> Result<BTreeMap<NaiveDate, u32>> {
        let state = self.state.read().await;
        if state.catalog.get(resource_id).is_none() {
            return Err(MarketError::resource_not_found(resource_id));
        }
        Ok(state.calendar.query_committed(resource_id, window))
    }

    /// Verify the overbooking invariant across the whole calendar.
    ///
    /// # Errors
    ///
    /// [`MarketError::CapacityExceeded`] for the first violating cell.
    pub async fn check_capacity_invariant(&self) -> Result<()> {
        let state = self.state.read().await;
        state
            .calendar
            .check_capacity_invariant(|id| state.catalog.get(id).map(|r| r.person_count))
    }

    /// Compute a KPI snapshot and append it to the history.
    ///
    /// Recomputation over unchanged data yields an identical snapshot
    /// (given an unchanged clock). Unlike the other read paths this takes
    /// the write guard, so the snapshot and its history append commit as
    /// one step and the history stays in computation order.
    #[tracing::instrument(skip(self))]
    pub async fn compute_kpis(&self, provider_id: ProviderId, period: DateWindow) -> ResourceKpis {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;
        let snapshot = compute(
            provider_id,
            period,
            &state.catalog,
            &state.calendar,
            state.allocations.values(),
            now,
        );
        state.kpi_history.push(snapshot.clone());
        snapshot
    }

    /// All KPI snapshots taken for a provider, in computation order.
    pub async fn kpi_history(&self, provider_id: ProviderId) -> Vec<ResourceKpis> {
        let state = self.state.read().await;
        state
            .kpi_history
            .iter()
            .filter(|k| k.provider_id == provider_id)
            .cloned()
            .collect()
    }

    /// Service health, driven by dead-letter queue usage.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        HealthCheck::from_dlq_usage(self.dlq.len(), self.dlq.capacity())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn select_locked(
        state: &mut MarketState,
        request: SelectionRequest,
        now: DateTime<Utc>,
    ) -> Result<Allocation> {
        if request.person_count == 0 {
            return Err(MarketError::validation("person_count must be at least 1"));
        }

        let demand = state
            .demands
            .get(&request.demand_id)
            .ok_or_else(|| MarketError::demand_not_found(request.demand_id))?;
        if !demand.is_active() {
            return Err(MarketError::conflict(format!(
                "demand {} is cancelled",
                request.demand_id
            )));
        }

        let resource = state
            .catalog
            .get(request.resource_id)
            .ok_or_else(|| MarketError::resource_not_found(request.resource_id))?;
        if resource.status.is_terminal() {
            return Err(MarketError::InvalidResourceState {
                id: resource.id,
                status: resource.status,
            });
        }
        if !resource.window.encloses(&request.window) {
            return Err(MarketError::validation(format!(
                "requested window {} lies outside resource availability {}",
                request.window, resource.window
            )));
        }

        let allocation_id = AllocationId::new();
        state.calendar.reserve(
            resource.id,
            allocation_id,
            request.window,
            request.person_count,
            resource.daily_hours,
            resource.person_count,
        )?;

        let allocation = Allocation {
            id: allocation_id,
            resource_id: request.resource_id,
            demand_id: request.demand_id,
            offer_id: request.offer_id,
            person_count: request.person_count,
            window: request.window,
            priority: request.priority.unwrap_or(5),
            notes: request.notes,
            phase: AllocationPhase::PreSelected,
            created_at: now,
            updated_at: now,
        };
        state.allocations.insert(allocation_id, allocation.clone());

        if let Some(demand) = state.demands.get_mut(&request.demand_id) {
            demand.resources_selected += 1;
            demand.updated_at = now;
        }
        Self::recompute_demand(state, request.demand_id, now);

        Ok(allocation)
    }

    /// Apply a workflow event and its calendar/demand side effects.
    fn apply_event(
        state: &mut MarketState,
        id: AllocationId,
        event: AllocationEvent,
        now: DateTime<Utc>,
    ) -> Result<(Allocation, Option<DomainEvent>)> {
        let allocation = state
            .allocations
            .get(&id)
            .ok_or_else(|| MarketError::allocation_not_found(id))?;
        let next = transition(&allocation.phase, event.clone(), now)?;
        let resource_id = allocation.resource_id;
        let demand_id = allocation.demand_id;

        match &event {
            AllocationEvent::SubmitOffer { .. } => {
                if let Some(demand) = state.demands.get_mut(&demand_id) {
                    demand.offers_received += 1;
                    demand.updated_at = now;
                }
            }
            AllocationEvent::Accept => state.calendar.confirm(id),
            AllocationEvent::Reject { .. } => {
                state.calendar.release(id);
            }
            AllocationEvent::Complete => state.calendar.complete_entries(id),
            _ => {}
        }

        let allocation = state
            .allocations
            .get_mut(&id)
            .ok_or_else(|| MarketError::allocation_not_found(id))?;
        allocation.phase = next;
        allocation.updated_at = now;
        let snapshot = allocation.clone();

        if matches!(
            event,
            AllocationEvent::Accept | AllocationEvent::Reject { .. } | AllocationEvent::Complete
        ) {
            Self::recompute_demand(state, demand_id, now);
        }

        let domain_event = match event {
            AllocationEvent::Invite => Some(DomainEvent::ResourceInvited {
                allocation_id: id,
                resource_id,
                demand_id,
                occurred_at: now,
            }),
            AllocationEvent::RequestOffer { deadline } => Some(DomainEvent::OfferRequested {
                allocation_id: id,
                resource_id,
                demand_id,
                deadline,
                occurred_at: now,
            }),
            AllocationEvent::SubmitOffer { rate } => Some(DomainEvent::OfferSubmitted {
                allocation_id: id,
                resource_id,
                demand_id,
                rate,
                occurred_at: now,
            }),
            AllocationEvent::Accept => Some(DomainEvent::AllocationAccepted {
                allocation_id: id,
                resource_id,
                demand_id,
                rate: snapshot.phase.agreed_rate().unwrap_or(Money::zero()),
                occurred_at: now,
            }),
            AllocationEvent::Reject { reason } => Some(DomainEvent::AllocationRejected {
                allocation_id: id,
                resource_id,
                demand_id,
                reason,
                occurred_at: now,
            }),
            AllocationEvent::Complete => Some(DomainEvent::AllocationCompleted {
                allocation_id: id,
                resource_id,
                demand_id,
                occurred_at: now,
            }),
            AllocationEvent::MarkInvitationViewed => None,
        };

        Ok((snapshot, domain_event))
    }

    /// Re-derive a demand's status from its allocations.
    fn recompute_demand(state: &mut MarketState, demand_id: DemandId, now: DateTime<Utc>) {
        let mut accepted = 0_u32;
        let mut active = 0_u32;
        for allocation in state.allocations.values() {
            if allocation.demand_id != demand_id {
                continue;
            }
            match allocation.status() {
                AllocationStatus::Accepted | AllocationStatus::Completed => {
                    accepted += allocation.person_count;
                    active += 1;
                }
                AllocationStatus::Rejected => {}
                _ => active += 1,
            }
        }

        if let Some(demand) = state.demands.get_mut(&demand_id) {
            if demand.status != DemandStatus::Cancelled {
                let next = derive_status(demand.required_person_count, accepted, active);
                if next != demand.status {
                    tracing::debug!(demand_id = %demand_id, from = %demand.status, to = %next, "demand status derived");
                    demand.status = next;
                    demand.updated_at = now;
                }
            }
        }
    }

    /// Resolve the recipient for an event and queue it for dispatch.
    ///
    /// Offer submissions go to the builder; everything else goes to the
    /// provider.
    fn push_outbox(state: &MarketState, outbox: &mut Outbox, event: Option<DomainEvent>) {
        let Some(event) = event else { return };
        let recipient: Option<Uuid> = match &event {
            DomainEvent::OfferSubmitted { .. } => state
                .demands
                .get(&event.demand_id())
                .map(|d| *d.builder_id.as_uuid()),
            _ => state
                .catalog
                .get(event.resource_id())
                .map(|r| *r.provider_id.as_uuid()),
        };
        if let Some(recipient) = recipient {
            outbox.push((event, recipient));
        }
    }

    /// Apply one event under the write guard, then dispatch its
    /// notification after releasing it.
    async fn apply_and_dispatch(
        &self,
        id: AllocationId,
        event: AllocationEvent,
    ) -> Result<Allocation> {
        let now = self.env.clock.now();
        let mut state = self.state.write().await;
        let (allocation, domain_event) = Self::apply_event(&mut state, id, event, now)?;
        let mut outbox = Outbox::new();
        Self::push_outbox(&state, &mut outbox, domain_event);
        drop(state);

        self.dispatch_outbox(outbox).await;
        Ok(allocation)
    }

    /// Deliver queued notifications. Failures are logged and dead-lettered;
    /// they never surface to the caller.
    async fn dispatch_outbox(&self, outbox: Outbox) {
        for (event, recipient) in outbox {
            let notification = event.to_notification(recipient);
            if let Err(err) = self.env.dispatcher.emit(notification.clone()).await {
                tracing::warn!(
                    error = %err,
                    event_type = %notification.event_type,
                    "notification dispatch failed"
                );
                metrics::counter!("marketplace.dispatch.failed").increment(1);
                self.dlq.push(notification, err.to_string(), self.env.clock.now());
            } else {
                metrics::counter!("marketplace.dispatch.sent").increment(1);
            }
        }
    }
}
