//! Provider KPIs.
//!
//! Pure roll-up over catalog, calendar and allocation state for one
//! provider and one reporting period. `compute` reads, never writes, and
//! yields identical snapshots for identical inputs; the service appends
//! each snapshot to an immutable history.

use crate::allocation::{Allocation, AllocationPhase};
use crate::calendar::CalendarState;
use crate::catalog::{CatalogState, derived_status};
use crate::types::{CalendarEntryStatus, DateWindow, Money, ProviderId, ResourceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// KPI snapshot for one provider over one period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceKpis {
    /// The provider
    pub provider_id: ProviderId,
    /// Reporting period (inclusive days)
    pub period: DateWindow,
    /// When the snapshot was taken
    pub calculated_at: DateTime<Utc>,
    /// Listings whose window overlaps the period
    pub total_resources: usize,
    /// Overlapping listings currently available
    pub resources_available: usize,
    /// Overlapping listings currently reserved or allocated
    pub resources_allocated: usize,
    /// Overlapping listings completed
    pub resources_completed: usize,
    /// Capacity person-days on offer in the period (non-cancelled listings)
    pub person_days_available: u64,
    /// Committed person-days in the period (confirmed and in_progress)
    pub person_days_allocated: u64,
    /// Completed person-days in the period
    pub person_days_completed: u64,
    /// (allocated + completed) / available, in [0, 1]; 0 when nothing is on offer
    pub utilization_rate: f64,
    /// Hours-weighted mean agreed rate over accepted and completed work
    pub average_hourly_rate: Option<Money>,
    /// Agreed rate x total hours, summed over allocations completed in the period
    pub total_revenue: Money,
}

/// Ledger person-days with `status` inside `period`, for one provider.
fn ledger_person_days(
    catalog: &CatalogState,
    calendar: &CalendarState,
    provider_id: ProviderId,
    period: &DateWindow,
    status: CalendarEntryStatus,
) -> u64 {
    catalog
        .by_provider(provider_id)
        .map(|resource| {
            calendar
                .ledger_days(resource.id)
                .filter(|(day, _)| period.contains(**day))
                .flat_map(|(_, ledger)| ledger.commitments())
                .filter(|c| c.status == status)
                .map(|c| u64::from(c.person_count))
                .sum::<u64>()
        })
        .sum()
}

/// Compute the KPI snapshot.
///
/// `allocations` must hold every allocation in the system; the function
/// filters down to those touching the provider's resources.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute<'a>(
    provider_id: ProviderId,
    period: DateWindow,
    catalog: &CatalogState,
    calendar: &CalendarState,
    allocations: impl Iterator<Item = &'a Allocation> + Clone,
    calculated_at: DateTime<Utc>,
) -> ResourceKpis {
    let mut total_resources = 0;
    let mut resources_available = 0;
    let mut resources_allocated = 0;
    let mut resources_completed = 0;
    let mut person_days_available = 0_u64;

    for resource in catalog.by_provider(provider_id) {
        let overlap = resource.window.overlap_days(&period);
        if overlap == 0 {
            continue;
        }
        total_resources += 1;
        let status = derived_status(resource, calendar);
        match status {
            ResourceStatus::Available => resources_available += 1,
            ResourceStatus::Reserved | ResourceStatus::Allocated => resources_allocated += 1,
            ResourceStatus::Completed => resources_completed += 1,
            ResourceStatus::Cancelled => {}
        }
        if status != ResourceStatus::Cancelled {
            person_days_available += overlap * u64::from(resource.person_count);
        }
    }

    let confirmed =
        ledger_person_days(catalog, calendar, provider_id, &period, CalendarEntryStatus::Confirmed);
    let in_progress = ledger_person_days(
        catalog,
        calendar,
        provider_id,
        &period,
        CalendarEntryStatus::InProgress,
    );
    let person_days_allocated = confirmed + in_progress;
    let person_days_completed = ledger_person_days(
        catalog,
        calendar,
        provider_id,
        &period,
        CalendarEntryStatus::Completed,
    );

    let utilization_rate = if person_days_available == 0 {
        0.0
    } else {
        (person_days_allocated + person_days_completed) as f64 / person_days_available as f64
    };

    let mut weighted_rate_cents = 0.0_f64;
    let mut weighted_hours = 0.0_f64;
    let mut total_revenue = Money::zero();

    for allocation in allocations {
        let Some(resource) = catalog.get(allocation.resource_id) else {
            continue;
        };
        if resource.provider_id != provider_id {
            continue;
        }
        let Some(rate) = allocation.phase.agreed_rate() else {
            continue;
        };
        let agreed = matches!(
            allocation.phase,
            AllocationPhase::Accepted { .. } | AllocationPhase::Completed { .. }
        );
        if !agreed {
            continue;
        }

        let days_in_period = allocation.window.overlap_days(&period);
        if days_in_period > 0 {
            let hours = days_in_period as f64
                * f64::from(allocation.person_count)
                * resource.daily_hours;
            weighted_rate_cents += rate.cents() as f64 * hours;
            weighted_hours += hours;
        }

        if let Some(completed_at) = allocation.phase.completed_at() {
            if period.contains(completed_at.date_naive()) {
                let total_hours = allocation.window.day_count() as f64
                    * f64::from(allocation.person_count)
                    * resource.daily_hours;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let revenue_cents = (rate.cents() as f64 * total_hours).round() as u64;
                total_revenue = total_revenue.saturating_add(Money::from_cents(revenue_cents));
            }
        }
    }

    let average_hourly_rate = if weighted_hours > 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cents = (weighted_rate_cents / weighted_hours).round() as u64;
        Some(Money::from_cents(cents))
    } else {
        None
    };

    ResourceKpis {
        provider_id,
        period,
        calculated_at,
        total_resources,
        resources_available,
        resources_allocated,
        resources_completed,
        person_days_available,
        person_days_allocated,
        person_days_completed,
        utilization_rate,
        average_hourly_rate,
        total_revenue,
    }
}
