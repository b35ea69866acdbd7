//! Capacity catalog.
//!
//! Providers list capacity as resources: a crew of N people with a skill
//! profile, available over a date window. The catalog owns the resource
//! arena, input validation, patch application, candidate filtering and the
//! derived-status view (reserved/allocated are never stored, they are read
//! off the calendar).

use crate::calendar::CalendarState;
use crate::error::{MarketError, Result};
use crate::types::{
    CalendarEntryStatus, DateWindow, Location, Money, Pricing, ProjectId, ProviderId, ResourceId,
    ResourceStatus, Visibility,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A listed capacity resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource id
    pub id: ResourceId,
    /// Owning provider
    pub provider_id: ProviderId,
    /// Project the capacity is earmarked for, if any
    pub project_id: Option<ProjectId>,
    /// Listing title
    pub title: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Days the capacity is on offer
    pub window: DateWindow,
    /// People available per day (the per-day capacity)
    pub person_count: u32,
    /// Working hours per person per day
    pub daily_hours: f64,
    /// Trade category, e.g. `"electrical"`
    pub category: String,
    /// Finer-grained trade, e.g. `"high_voltage"`
    pub subcategory: Option<String>,
    /// Where the crew is based
    pub location: Option<Location>,
    /// Stored lifecycle status
    pub status: ResourceStatus,
    /// Search visibility
    pub visibility: Visibility,
    /// Published pricing
    pub pricing: Pricing,
    /// Skill tags
    pub skills: Vec<String>,
    /// Equipment tags
    pub equipment: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Total person-days offered over the whole window.
    #[must_use]
    pub fn person_days(&self) -> u64 {
        self.window.day_count() * u64::from(self.person_count)
    }

    /// Total person-hours offered over the whole window.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_hours(&self) -> f64 {
        self.person_days() as f64 * self.daily_hours
    }
}

/// Input for creating a resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Owning provider
    pub provider_id: ProviderId,
    /// Project the capacity is earmarked for, if any
    pub project_id: Option<ProjectId>,
    /// Listing title
    pub title: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Days on offer
    pub window: DateWindow,
    /// People available per day
    pub person_count: u32,
    /// Working hours per person per day; defaults from config when absent
    pub daily_hours: Option<f64>,
    /// Trade category
    pub category: String,
    /// Finer-grained trade
    pub subcategory: Option<String>,
    /// Crew base location
    pub location: Option<Location>,
    /// Search visibility
    pub visibility: Visibility,
    /// Published pricing; defaults when absent
    pub pricing: Option<Pricing>,
    /// Skill tags
    pub skills: Vec<String>,
    /// Equipment tags
    pub equipment: Vec<String>,
}

/// Partial update for a resource. `Some` fields overwrite, `None` fields
/// are left alone.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcePatch {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New availability window
    pub window: Option<DateWindow>,
    /// New per-day head-count
    pub person_count: Option<u32>,
    /// New daily hours
    pub daily_hours: Option<f64>,
    /// New category
    pub category: Option<String>,
    /// New subcategory
    pub subcategory: Option<String>,
    /// New location
    pub location: Option<Location>,
    /// New visibility
    pub visibility: Option<Visibility>,
    /// New pricing
    pub pricing: Option<Pricing>,
    /// New skill tags
    pub skills: Option<Vec<String>>,
    /// New equipment tags
    pub equipment: Option<Vec<String>>,
    /// Provider-driven status change (completed)
    pub status: Option<ResourceStatus>,
}

/// Validate a resource spec before it touches the arena.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] when head-count is zero, daily
/// hours are non-positive or non-finite, or the category is empty.
pub fn validate_spec(spec: &ResourceSpec) -> Result<()> {
    if spec.person_count == 0 {
        return Err(MarketError::validation("person_count must be at least 1"));
    }
    if let Some(hours) = spec.daily_hours {
        validate_daily_hours(hours)?;
    }
    if spec.category.trim().is_empty() {
        return Err(MarketError::validation("category must not be empty"));
    }
    Ok(())
}

fn validate_daily_hours(hours: f64) -> Result<()> {
    if !hours.is_finite() || hours <= 0.0 || hours > 24.0 {
        return Err(MarketError::validation(
            "daily_hours must be a positive number of hours per day",
        ));
    }
    Ok(())
}

/// Apply a patch to a resource, stamping `updated_at`.
///
/// # Errors
///
/// Returns [`MarketError::Validation`] for invalid patched values, or when
/// the patched status is not a legal provider-driven change (only
/// `completed` may be set through a patch; cancellation goes through
/// deactivation).
pub fn apply_patch(resource: &mut Resource, patch: ResourcePatch, now: DateTime<Utc>) -> Result<()> {
    if let Some(person_count) = patch.person_count {
        if person_count == 0 {
            return Err(MarketError::validation("person_count must be at least 1"));
        }
        resource.person_count = person_count;
    }
    if let Some(hours) = patch.daily_hours {
        validate_daily_hours(hours)?;
        resource.daily_hours = hours;
    }
    if let Some(category) = patch.category {
        if category.trim().is_empty() {
            return Err(MarketError::validation("category must not be empty"));
        }
        resource.category = category;
    }
    if let Some(status) = patch.status {
        if status != ResourceStatus::Completed {
            return Err(MarketError::validation(
                "only completed may be set directly; use deactivation to cancel",
            ));
        }
        resource.status = status;
    }
    if let Some(window) = patch.window {
        resource.window = window;
    }
    if let Some(title) = patch.title {
        resource.title = Some(title);
    }
    if let Some(description) = patch.description {
        resource.description = Some(description);
    }
    if let Some(subcategory) = patch.subcategory {
        resource.subcategory = Some(subcategory);
    }
    if let Some(location) = patch.location {
        resource.location = Some(location);
    }
    if let Some(visibility) = patch.visibility {
        resource.visibility = visibility;
    }
    if let Some(pricing) = patch.pricing {
        resource.pricing = pricing;
    }
    if let Some(skills) = patch.skills {
        resource.skills = skills;
    }
    if let Some(equipment) = patch.equipment {
        resource.equipment = equipment;
    }
    resource.updated_at = now;
    Ok(())
}

/// Effective status of a resource: stored lifecycle when terminal,
/// otherwise derived from the calendar.
#[must_use]
pub fn derived_status(resource: &Resource, calendar: &CalendarState) -> ResourceStatus {
    if resource.status.is_terminal() {
        return resource.status;
    }
    if calendar.has_status(resource.id, CalendarEntryStatus::Confirmed)
        || calendar.has_status(resource.id, CalendarEntryStatus::InProgress)
    {
        return ResourceStatus::Allocated;
    }
    if calendar.has_status(resource.id, CalendarEntryStatus::Tentative) {
        return ResourceStatus::Reserved;
    }
    ResourceStatus::Available
}

/// The resource arena.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogState {
    resources: HashMap<ResourceId, Resource>,
}

impl CatalogState {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource.
    pub fn insert(&mut self, resource: Resource) {
        self.resources.insert(resource.id, resource);
    }

    /// Look up a resource.
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(&id)
    }

    /// Look up a resource mutably.
    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(&id)
    }

    /// Iterate over all resources.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Iterate over one provider's resources.
    pub fn by_provider(&self, provider_id: ProviderId) -> impl Iterator<Item = &Resource> {
        self.resources
            .values()
            .filter(move |r| r.provider_id == provider_id)
    }

    /// Number of resources listed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Filters for candidate search. Geo scoping (`location`, `radius_km`)
/// happens in the geo provider; everything else is applied here.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateQuery {
    /// Query point
    pub location: Location,
    /// Search radius in kilometers; defaults from config when absent
    pub radius_km: Option<f64>,
    /// Required trade category
    pub category: Option<String>,
    /// Required subcategory
    pub subcategory: Option<String>,
    /// Window the capacity must fully cover
    pub window: Option<DateWindow>,
    /// Minimum per-day head-count
    pub min_person_count: Option<u32>,
    /// Maximum published hourly rate; unpriced resources always pass
    pub max_hourly_rate: Option<Money>,
    /// Skills the resource must all carry
    pub required_skills: Vec<String>,
    /// Equipment the resource must all carry
    pub required_equipment: Vec<String>,
    /// Cap on the number of results; defaults from config when absent
    pub limit: Option<usize>,
}

impl CandidateQuery {
    /// A query with only a location, matching everything in range.
    #[must_use]
    pub const fn at(location: Location) -> Self {
        Self {
            location,
            radius_km: None,
            category: None,
            subcategory: None,
            window: None,
            min_person_count: None,
            max_hourly_rate: None,
            required_skills: Vec::new(),
            required_equipment: Vec::new(),
            limit: None,
        }
    }
}

/// One candidate search result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The matched resource (snapshot at query time)
    pub resource: Resource,
    /// Distance from the query point in kilometers
    pub distance_km: f64,
}

/// Whether a resource passes the non-geo filters of a query.
///
/// Only publicly visible resources whose effective status is available or
/// reserved can be candidates; allocated and terminal resources never
/// match.
#[must_use]
pub fn matches_query(resource: &Resource, calendar: &CalendarState, query: &CandidateQuery) -> bool {
    if resource.visibility != Visibility::Public {
        return false;
    }
    match derived_status(resource, calendar) {
        ResourceStatus::Available | ResourceStatus::Reserved => {}
        _ => return false,
    }
    if let Some(category) = &query.category {
        if &resource.category != category {
            return false;
        }
    }
    if let Some(subcategory) = &query.subcategory {
        if resource.subcategory.as_ref() != Some(subcategory) {
            return false;
        }
    }
    if let Some(window) = &query.window {
        if !resource.window.encloses(window) {
            return false;
        }
    }
    if let Some(min) = query.min_person_count {
        if resource.person_count < min {
            return false;
        }
    }
    if let Some(max_rate) = query.max_hourly_rate {
        // Unpriced listings stay in; the rate is negotiated later
        if resource.pricing.hourly_rate.is_some_and(|rate| rate > max_rate) {
            return false;
        }
    }
    let has_all = |required: &[String], tags: &[String]| {
        required.iter().all(|needle| tags.contains(needle))
    };
    if !has_all(&query.required_skills, &resource.skills) {
        return false;
    }
    if !has_all(&query.required_equipment, &resource.equipment) {
        return false;
    }
    true
}

/// Order candidates by distance, then published hourly rate ascending with
/// unpriced listings last, then id for determinism.
pub fn order_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| {
                let rate = |c: &Candidate| c.resource.pricing.hourly_rate;
                match (rate(a), rate(b)) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            })
            .then_with(|| a.resource.id.as_uuid().cmp(b.resource.id.as_uuid()))
    });
}

/// Read-only roll-up of one provider's listings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatistics {
    /// Total listings
    pub total_resources: usize,
    /// Listing counts keyed by effective status
    pub by_status: HashMap<String, usize>,
    /// Listing counts keyed by category
    pub by_category: HashMap<String, usize>,
    /// Person-days across all non-cancelled listings
    pub total_person_days: u64,
}

/// Compute statistics for one provider.
#[must_use]
pub fn provider_statistics(
    catalog: &CatalogState,
    calendar: &CalendarState,
    provider_id: ProviderId,
) -> ProviderStatistics {
    let mut stats = ProviderStatistics::default();
    for resource in catalog.by_provider(provider_id) {
        stats.total_resources += 1;
        let status = derived_status(resource, calendar);
        *stats.by_status.entry(status.to_string()).or_insert(0) += 1;
        *stats
            .by_category
            .entry(resource.category.clone())
            .or_insert(0) += 1;
        if status != ResourceStatus::Cancelled {
            stats.total_person_days += resource.person_days();
        }
    }
    stats
}
