//! Demand requests.
//!
//! A builder posts demand: "I need N people of trade X over window W near
//! location L". Matching fills counters, selections spawn allocations, and
//! the request's status is always derivable from the requirement and the
//! accepted head-count. The derivation is a pure function so it can be
//! re-checked against stored state at any time.

use crate::types::{BuilderId, DateWindow, DemandId, DemandStatus, Location, Money, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Input for opening a demand request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandSpec {
    /// The builder posting the demand
    pub builder_id: BuilderId,
    /// Project the demand belongs to, if any
    pub project_id: Option<ProjectId>,
    /// Required trade category
    pub category: String,
    /// Finer-grained trade
    pub subcategory: Option<String>,
    /// People required per day
    pub required_person_count: u32,
    /// Days the people are needed
    pub window: DateWindow,
    /// Site location
    pub location: Option<Location>,
    /// How far away capacity may come from
    pub max_distance_km: Option<f64>,
    /// Rate ceiling per person-hour
    pub max_hourly_rate: Option<Money>,
    /// Skills the capacity must carry
    pub required_skills: Vec<String>,
    /// Equipment the capacity must carry
    pub required_equipment: Vec<String>,
    /// Free-form description
    pub description: Option<String>,
}

/// An open demand for capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemandRequest {
    /// Demand id
    pub id: DemandId,
    /// The builder posting the demand
    pub builder_id: BuilderId,
    /// Project the demand belongs to, if any
    pub project_id: Option<ProjectId>,
    /// Required trade category
    pub category: String,
    /// Finer-grained trade
    pub subcategory: Option<String>,
    /// People required per day
    pub required_person_count: u32,
    /// Days the people are needed
    pub window: DateWindow,
    /// Site location
    pub location: Option<Location>,
    /// How far away capacity may come from
    pub max_distance_km: Option<f64>,
    /// Rate ceiling per person-hour
    pub max_hourly_rate: Option<Money>,
    /// Skills the capacity must carry
    pub required_skills: Vec<String>,
    /// Equipment the capacity must carry
    pub required_equipment: Vec<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Current status, kept in sync with the derivation rule
    pub status: DemandStatus,
    /// Candidates surfaced by matching so far
    pub resources_found: u32,
    /// Selections made so far
    pub resources_selected: u32,
    /// Offers submitted so far
    pub offers_received: u32,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl DemandRequest {
    /// Build a fresh open request from a spec.
    #[must_use]
    pub fn open(id: DemandId, spec: DemandSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            builder_id: spec.builder_id,
            project_id: spec.project_id,
            category: spec.category,
            subcategory: spec.subcategory,
            required_person_count: spec.required_person_count,
            window: spec.window,
            location: spec.location,
            max_distance_km: spec.max_distance_km,
            max_hourly_rate: spec.max_hourly_rate,
            required_skills: spec.required_skills,
            required_equipment: spec.required_equipment,
            description: spec.description,
            status: DemandStatus::Open,
            resources_found: 0,
            resources_selected: 0,
            offers_received: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the request still accepts selections.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.status, DemandStatus::Cancelled)
    }
}

/// Derive the status of a non-cancelled demand.
///
/// - `filled` when the accepted head-count meets the requirement
/// - `partially_filled` when something is accepted but not enough
/// - `searching` when selections are in flight with nothing accepted
/// - `open` otherwise
#[must_use]
pub const fn derive_status(
    required_person_count: u32,
    accepted_person_count: u32,
    active_selections: u32,
) -> DemandStatus {
    if accepted_person_count >= required_person_count && required_person_count > 0 {
        DemandStatus::Filled
    } else if accepted_person_count > 0 {
        DemandStatus::PartiallyFilled
    } else if active_selections > 0 {
        DemandStatus::Searching
    } else {
        DemandStatus::Open
    }
}
