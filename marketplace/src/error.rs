//! Error taxonomy for the marketplace core.
//!
//! Every fallible operation returns [`MarketError`]. The variants map
//! one-to-one onto the failure classes callers need to distinguish:
//! bad input, missing entity, illegal workflow transition, capacity
//! exhaustion, expired deadline and write conflicts.

use crate::types::{AllocationId, DemandId, ResourceId, ResourceStatus};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Marketplace error taxonomy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    /// Input failed validation before touching any state.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// A referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind, e.g. `"resource"`.
        entity: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// The requested allocation event is not legal from the current state.
    #[error("invalid transition: {event} is not allowed from {from}")]
    InvalidTransition {
        /// Status the allocation was in.
        from: crate::allocation::AllocationStatus,
        /// Name of the rejected event.
        event: &'static str,
    },

    /// The resource is in a lifecycle state that forbids the operation.
    #[error("resource {id} is {status} and can no longer be modified")]
    InvalidResourceState {
        /// The resource in question.
        id: ResourceId,
        /// Its current stored status.
        status: ResourceStatus,
    },

    /// Admitting the reservation would overbook at least one day.
    #[error(
        "resource {resource_id} overbooked on {day}: \
         requested {requested} with {committed} of {capacity} already committed"
    )]
    CapacityExceeded {
        /// The resource whose calendar rejected the write.
        resource_id: ResourceId,
        /// First day on which the guard failed.
        day: NaiveDate,
        /// Person-count the reservation asked for.
        requested: u32,
        /// Person-count already committed on that day.
        committed: u32,
        /// The resource's per-day capacity.
        capacity: u32,
    },

    /// The offer deadline has already passed.
    #[error("deadline {deadline} has already passed")]
    ExpiredDeadline {
        /// The deadline that was missed.
        deadline: DateTime<Utc>,
    },

    /// The write conflicts with existing state.
    #[error("conflict: {reason}")]
    Conflict {
        /// Description of the conflicting state.
        reason: String,
    },
}

impl MarketError {
    /// Shorthand for a validation failure.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for a conflict.
    #[must_use]
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// A missing resource.
    #[must_use]
    pub fn resource_not_found(id: ResourceId) -> Self {
        Self::NotFound {
            entity: "resource",
            id: id.to_string(),
        }
    }

    /// A missing allocation.
    #[must_use]
    pub fn allocation_not_found(id: AllocationId) -> Self {
        Self::NotFound {
            entity: "allocation",
            id: id.to_string(),
        }
    }

    /// A missing demand request.
    #[must_use]
    pub fn demand_not_found(id: DemandId) -> Self {
        Self::NotFound {
            entity: "demand",
            id: id.to_string(),
        }
    }

    /// Whether this error is a precondition guard firing (the caller lost a
    /// race or asked too late) rather than a caller bug.
    #[must_use]
    pub const fn is_guard_failure(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::ExpiredDeadline { .. } | Self::Conflict { .. }
        )
    }

    /// Whether this error indicates a missing entity.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
