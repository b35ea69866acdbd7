//! Domain events emitted by the allocation workflow.
//!
//! Each event names the allocation, resource and demand it concerns plus
//! the payload of the transition that produced it. Events are flattened
//! into [`Notification`] envelopes for dispatch; the recipient is chosen by
//! the service layer.

use capmarket_core::dispatch::Notification;
use crate::types::{AllocationId, DemandId, Money, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification-worthy milestones of an allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Invitation sent to the provider.
    ResourceInvited {
        /// The allocation
        allocation_id: AllocationId,
        /// The invited resource
        resource_id: ResourceId,
        /// The demand being served
        demand_id: DemandId,
        /// When the invitation went out
        occurred_at: DateTime<Utc>,
    },

    /// Builder asked for a binding offer.
    OfferRequested {
        /// The allocation
        allocation_id: AllocationId,
        /// The resource
        resource_id: ResourceId,
        /// The demand being served
        demand_id: DemandId,
        /// Deadline by which the offer must arrive
        deadline: DateTime<Utc>,
        /// When the request went out
        occurred_at: DateTime<Utc>,
    },

    /// Provider submitted a rate.
    OfferSubmitted {
        /// The allocation
        allocation_id: AllocationId,
        /// The resource
        resource_id: ResourceId,
        /// The demand being served
        demand_id: DemandId,
        /// Submitted per-person-hour rate
        rate: Money,
        /// When the offer came in
        occurred_at: DateTime<Utc>,
    },

    /// Builder accepted the offer.
    AllocationAccepted {
        /// The allocation
        allocation_id: AllocationId,
        /// The resource
        resource_id: ResourceId,
        /// The demand being served
        demand_id: DemandId,
        /// Agreed per-person-hour rate
        rate: Money,
        /// When the decision fell
        occurred_at: DateTime<Utc>,
    },

    /// Allocation ended without agreement.
    AllocationRejected {
        /// The allocation
        allocation_id: AllocationId,
        /// The resource
        resource_id: ResourceId,
        /// The demand being served
        demand_id: DemandId,
        /// Why
        reason: String,
        /// When the decision fell
        occurred_at: DateTime<Utc>,
    },

    /// Work finished.
    AllocationCompleted {
        /// The allocation
        allocation_id: AllocationId,
        /// The resource
        resource_id: ResourceId,
        /// The demand being served
        demand_id: DemandId,
        /// When completion was recorded
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Stable snake_case discriminator for routing and logs.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ResourceInvited { .. } => "resource_invited",
            Self::OfferRequested { .. } => "offer_requested",
            Self::OfferSubmitted { .. } => "offer_submitted",
            Self::AllocationAccepted { .. } => "allocation_accepted",
            Self::AllocationRejected { .. } => "allocation_rejected",
            Self::AllocationCompleted { .. } => "allocation_completed",
        }
    }

    /// When the underlying transition happened.
    #[must_use]
    pub const fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::ResourceInvited { occurred_at, .. }
            | Self::OfferRequested { occurred_at, .. }
            | Self::OfferSubmitted { occurred_at, .. }
            | Self::AllocationAccepted { occurred_at, .. }
            | Self::AllocationRejected { occurred_at, .. }
            | Self::AllocationCompleted { occurred_at, .. } => *occurred_at,
        }
    }

    /// The allocation this event concerns.
    #[must_use]
    pub const fn allocation_id(&self) -> AllocationId {
        match self {
            Self::ResourceInvited { allocation_id, .. }
            | Self::OfferRequested { allocation_id, .. }
            | Self::OfferSubmitted { allocation_id, .. }
            | Self::AllocationAccepted { allocation_id, .. }
            | Self::AllocationRejected { allocation_id, .. }
            | Self::AllocationCompleted { allocation_id, .. } => *allocation_id,
        }
    }

    /// The resource this event concerns.
    #[must_use]
    pub const fn resource_id(&self) -> ResourceId {
        match self {
            Self::ResourceInvited { resource_id, .. }
            | Self::OfferRequested { resource_id, .. }
            | Self::OfferSubmitted { resource_id, .. }
            | Self::AllocationAccepted { resource_id, .. }
            | Self::AllocationRejected { resource_id, .. }
            | Self::AllocationCompleted { resource_id, .. } => *resource_id,
        }
    }

    /// The demand this event concerns.
    #[must_use]
    pub const fn demand_id(&self) -> DemandId {
        match self {
            Self::ResourceInvited { demand_id, .. }
            | Self::OfferRequested { demand_id, .. }
            | Self::OfferSubmitted { demand_id, .. }
            | Self::AllocationAccepted { demand_id, .. }
            | Self::AllocationRejected { demand_id, .. }
            | Self::AllocationCompleted { demand_id, .. } => *demand_id,
        }
    }

    /// Flatten into a dispatchable envelope addressed to `recipient`.
    #[must_use]
    pub fn to_notification(&self, recipient: Uuid) -> Notification {
        let payload = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        Notification::new(self.event_type(), recipient, payload, self.occurred_at())
    }
}
