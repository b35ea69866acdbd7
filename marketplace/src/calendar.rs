//! Capacity calendar.
//!
//! A per-(resource, day) ledger of commitments. Every selection writes one
//! tentative commitment per day of its window; acceptance flips them to
//! confirmed, rejection removes them, completion marks them completed.
//!
//! The overbooking invariant lives here: for every resource and day, the
//! sum of committed person-counts (tentative, confirmed, in_progress) never
//! exceeds the resource's per-day capacity. `reserve` checks every day of
//! the requested window before writing anything, so a failed reservation
//! leaves no trace.

use crate::error::{MarketError, Result};
use crate::types::{AllocationId, CalendarEntryStatus, DateWindow, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One allocation's claim on one day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    /// The allocation holding this claim
    pub allocation_id: AllocationId,
    /// People claimed for the day
    pub person_count: u32,
    /// Person-hours claimed for the day
    pub hours: f64,
    /// Entry status
    pub status: CalendarEntryStatus,
}

/// All commitments on a single (resource, day) cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DayLedger {
    commitments: HashMap<AllocationId, Commitment>,
}

impl DayLedger {
    /// Sum of person-counts that consume capacity on this day.
    #[must_use]
    pub fn committed(&self) -> u32 {
        self.commitments
            .values()
            .filter(|c| c.status.counts_against_capacity())
            .map(|c| c.person_count)
            .sum()
    }

    /// Whether no commitments remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }

    /// Iterate over the commitments on this day.
    pub fn commitments(&self) -> impl Iterator<Item = &Commitment> {
        self.commitments.values()
    }
}

/// The full calendar: day ledgers per resource, plus an allocation index
/// for O(1) release and confirmation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarState {
    ledgers: HashMap<ResourceId, BTreeMap<chrono::NaiveDate, DayLedger>>,
    index: HashMap<AllocationId, (ResourceId, DateWindow)>,
}

impl CalendarState {
    /// Empty calendar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `person_count` people on every day of `window`.
    ///
    /// Guard-and-write: every day is checked against `capacity` before the
    /// first commitment is written. Entries are created tentative.
    ///
    /// # Errors
    ///
    /// - [`MarketError::Conflict`] when the allocation already holds entries
    /// - [`MarketError::CapacityExceeded`] on the first day whose committed
    ///   total plus `person_count` would exceed `capacity`; nothing is
    ///   written in that case
    pub fn reserve(
        &mut self,
        resource_id: ResourceId,
        allocation_id: AllocationId,
        window: DateWindow,
        person_count: u32,
        daily_hours: f64,
        capacity: u32,
    ) -> Result<()> {
        if self.index.contains_key(&allocation_id) {
            return Err(MarketError::conflict(format!(
                "allocation {allocation_id} already holds calendar entries"
            )));
        }

        let existing = self.ledgers.get(&resource_id);
        for day in window.days() {
            let committed = existing
                .and_then(|days| days.get(&day))
                .map_or(0, DayLedger::committed);
            if committed + person_count > capacity {
                return Err(MarketError::CapacityExceeded {
                    resource_id,
                    day,
                    requested: person_count,
                    committed,
                    capacity,
                });
            }
        }

        let days = self.ledgers.entry(resource_id).or_default();
        let hours = daily_hours * f64::from(person_count);
        for day in window.days() {
            days.entry(day).or_default().commitments.insert(
                allocation_id,
                Commitment {
                    allocation_id,
                    person_count,
                    hours,
                    status: CalendarEntryStatus::Tentative,
                },
            );
        }
        self.index.insert(allocation_id, (resource_id, window));

        Ok(())
    }

    /// Remove every entry held by `allocation_id`.
    ///
    /// Releasing an allocation with no entries is a no-op, so cascades can
    /// release unconditionally. Returns whether anything was removed.
    pub fn release(&mut self, allocation_id: AllocationId) -> bool {
        let Some((resource_id, window)) = self.index.remove(&allocation_id) else {
            return false;
        };
        if let Some(days) = self.ledgers.get_mut(&resource_id) {
            for day in window.days() {
                if let Some(ledger) = days.get_mut(&day) {
                    ledger.commitments.remove(&allocation_id);
                    if ledger.is_empty() {
                        days.remove(&day);
                    }
                }
            }
            if days.is_empty() {
                self.ledgers.remove(&resource_id);
            }
        }
        true
    }

    /// Flip an allocation's tentative entries to confirmed.
    pub fn confirm(&mut self, allocation_id: AllocationId) {
        self.set_status(allocation_id, CalendarEntryStatus::Confirmed);
    }

    /// Mark an allocation's entries completed. They stop consuming
    /// capacity but remain in the ledger for KPI attribution.
    pub fn complete_entries(&mut self, allocation_id: AllocationId) {
        self.set_status(allocation_id, CalendarEntryStatus::Completed);
    }

    fn set_status(&mut self, allocation_id: AllocationId, status: CalendarEntryStatus) {
        let Some((resource_id, window)) = self.index.get(&allocation_id).copied() else {
            return;
        };
        if let Some(days) = self.ledgers.get_mut(&resource_id) {
            for day in window.days() {
                if let Some(commitment) = days
                    .get_mut(&day)
                    .and_then(|ledger| ledger.commitments.get_mut(&allocation_id))
                {
                    commitment.status = status;
                }
            }
        }
    }

    /// Per-day committed person-counts for a resource over a window.
    ///
    /// Every day of the window appears in the result, with 0 for days
    /// without commitments.
    #[must_use]
    pub fn query_committed(
        &self,
        resource_id: ResourceId,
        window: DateWindow,
    ) -> BTreeMap<chrono::NaiveDate, u32> {
        let days = self.ledgers.get(&resource_id);
        window
            .days()
            .map(|day| {
                let committed = days
                    .and_then(|d| d.get(&day))
                    .map_or(0, DayLedger::committed);
                (day, committed)
            })
            .collect()
    }

    /// Whether the allocation currently holds calendar entries.
    #[must_use]
    pub fn holds_entries(&self, allocation_id: AllocationId) -> bool {
        self.index.contains_key(&allocation_id)
    }

    /// The resource and window an allocation's entries cover, if any.
    #[must_use]
    pub fn entry_span(&self, allocation_id: AllocationId) -> Option<(ResourceId, DateWindow)> {
        self.index.get(&allocation_id).copied()
    }

    /// Days on which the resource has at least one commitment with the
    /// given status.
    #[must_use]
    pub fn days_with_status(
        &self,
        resource_id: ResourceId,
        status: CalendarEntryStatus,
    ) -> Vec<chrono::NaiveDate> {
        self.ledgers.get(&resource_id).map_or_else(Vec::new, |days| {
            days.iter()
                .filter(|(_, ledger)| ledger.commitments().any(|c| c.status == status))
                .map(|(day, _)| *day)
                .collect()
        })
    }

    /// Whether the resource has any commitment with the given status.
    #[must_use]
    pub fn has_status(&self, resource_id: ResourceId, status: CalendarEntryStatus) -> bool {
        self.ledgers.get(&resource_id).is_some_and(|days| {
            days.values()
                .any(|ledger| ledger.commitments().any(|c| c.status == status))
        })
    }

    /// Iterate over every (day, ledger) cell of a resource.
    pub fn ledger_days(
        &self,
        resource_id: ResourceId,
    ) -> impl Iterator<Item = (&chrono::NaiveDate, &DayLedger)> {
        self.ledgers
            .get(&resource_id)
            .into_iter()
            .flat_map(BTreeMap::iter)
    }

    /// Verify the overbooking invariant against a capacity lookup.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::CapacityExceeded`] for the first (resource,
    /// day) cell whose committed total exceeds the resource's capacity.
    pub fn check_capacity_invariant(
        &self,
        capacity_of: impl Fn(ResourceId) -> Option<u32>,
    ) -> Result<()> {
        for (resource_id, days) in &self.ledgers {
            let Some(capacity) = capacity_of(*resource_id) else {
                continue;
            };
            for (day, ledger) in days {
                let committed = ledger.committed();
                if committed > capacity {
                    return Err(MarketError::CapacityExceeded {
                        resource_id: *resource_id,
                        day: *day,
                        requested: 0,
                        committed,
                        capacity,
                    });
                }
            }
        }
        Ok(())
    }
}
