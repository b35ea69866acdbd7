//! Allocation workflow.
//!
//! An allocation is the negotiation between a builder's demand and a
//! provider's resource. Its lifecycle is a closed state machine:
//!
//! ```text
//! pre_selected -> invited -> offer_requested -> offer_submitted -> accepted -> completed
//!       \            \             \                  \
//!        +------------+-------------+------------------+--> rejected
//! ```
//!
//! Each state is a distinct [`AllocationPhase`] variant carrying only the
//! fields that exist in that state, so an accepted allocation cannot lack a
//! rate and a pre-selected one cannot carry a deadline. All transitions go
//! through the single [`transition`] chokepoint.

use crate::error::{MarketError, Result};
use crate::types::{AllocationId, DateWindow, DemandId, Money, OfferId, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat status view of an allocation, for queries and serialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Builder picked the resource; provider not yet contacted
    PreSelected,
    /// Invitation sent to the provider
    Invited,
    /// Builder asked for a binding offer with a deadline
    OfferRequested,
    /// Provider submitted a rate
    OfferSubmitted,
    /// Builder accepted; calendar entries confirmed
    Accepted,
    /// Declined or withdrawn
    Rejected,
    /// Work finished
    Completed,
}

impl AllocationStatus {
    /// Whether no further events are accepted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreSelected => "pre_selected",
            Self::Invited => "invited",
            Self::OfferRequested => "offer_requested",
            Self::OfferSubmitted => "offer_submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Per-state data of an allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AllocationPhase {
    /// Builder picked the resource; nothing sent yet.
    PreSelected,

    /// Invitation sent to the provider.
    Invited {
        /// When the invitation went out.
        invitation_sent_at: DateTime<Utc>,
        /// When the provider first opened it, if they have.
        invitation_viewed_at: Option<DateTime<Utc>>,
    },

    /// Builder asked for a binding offer.
    OfferRequested {
        /// When the invitation went out.
        invitation_sent_at: DateTime<Utc>,
        /// When the offer was requested.
        offer_requested_at: DateTime<Utc>,
        /// Deadline by which the provider must submit.
        deadline: DateTime<Utc>,
    },

    /// Provider submitted a rate before the deadline.
    OfferSubmitted {
        /// When the offer came in.
        offer_submitted_at: DateTime<Utc>,
        /// The submitted per-person-hour rate.
        agreed_rate: Money,
    },

    /// Builder accepted the offer.
    Accepted {
        /// The agreed per-person-hour rate.
        agreed_rate: Money,
        /// When the builder decided.
        decision_made_at: DateTime<Utc>,
    },

    /// Declined by either party or withdrawn by a cascade.
    Rejected {
        /// Why the allocation ended.
        reason: String,
        /// When the decision fell.
        decision_made_at: DateTime<Utc>,
    },

    /// Work finished.
    Completed {
        /// The rate the work was billed at.
        agreed_rate: Money,
        /// When completion was recorded.
        completed_at: DateTime<Utc>,
    },
}

impl AllocationPhase {
    /// Flat status of this phase.
    #[must_use]
    pub const fn status(&self) -> AllocationStatus {
        match self {
            Self::PreSelected => AllocationStatus::PreSelected,
            Self::Invited { .. } => AllocationStatus::Invited,
            Self::OfferRequested { .. } => AllocationStatus::OfferRequested,
            Self::OfferSubmitted { .. } => AllocationStatus::OfferSubmitted,
            Self::Accepted { .. } => AllocationStatus::Accepted,
            Self::Rejected { .. } => AllocationStatus::Rejected,
            Self::Completed { .. } => AllocationStatus::Completed,
        }
    }

    /// The agreed rate, once one exists.
    #[must_use]
    pub const fn agreed_rate(&self) -> Option<Money> {
        match self {
            Self::OfferSubmitted { agreed_rate, .. }
            | Self::Accepted { agreed_rate, .. }
            | Self::Completed { agreed_rate, .. } => Some(*agreed_rate),
            _ => None,
        }
    }

    /// The offer deadline, while one is running.
    #[must_use]
    pub const fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::OfferRequested { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Completion timestamp, once completed.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Completed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }
}

/// Workflow events an allocation can receive.
#[derive(Clone, Debug, PartialEq)]
pub enum AllocationEvent {
    /// Send the invitation to the provider.
    Invite,
    /// Record that the provider opened the invitation.
    MarkInvitationViewed,
    /// Ask the provider for a binding offer.
    RequestOffer {
        /// Deadline by which the offer must arrive.
        deadline: DateTime<Utc>,
    },
    /// Provider submits a rate.
    SubmitOffer {
        /// Per-person-hour rate.
        rate: Money,
    },
    /// Builder accepts the submitted offer.
    Accept,
    /// Either party declines, or a cascade withdraws the allocation.
    Reject {
        /// Why.
        reason: String,
    },
    /// Record work completion.
    Complete,
}

impl AllocationEvent {
    /// Stable event name for errors and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Invite => "invite",
            Self::MarkInvitationViewed => "mark_invitation_viewed",
            Self::RequestOffer { .. } => "request_offer",
            Self::SubmitOffer { .. } => "submit_offer",
            Self::Accept => "accept",
            Self::Reject { .. } => "reject",
            Self::Complete => "complete",
        }
    }
}

/// Apply an event to a phase.
///
/// This is the only place a phase changes. Every pair not listed here is
/// illegal and returns [`MarketError::InvalidTransition`].
///
/// Rejection is admitted from every non-terminal state including accepted;
/// public entry points restrict accepted-state rejection to cascades.
///
/// # Errors
///
/// - [`MarketError::InvalidTransition`] for any pair outside the table
/// - [`MarketError::ExpiredDeadline`] when requesting an offer with a
///   deadline already in the past, or submitting one after the deadline
pub fn transition(
    phase: &AllocationPhase,
    event: AllocationEvent,
    now: DateTime<Utc>,
) -> Result<AllocationPhase> {
    match (phase, event) {
        (AllocationPhase::PreSelected, AllocationEvent::Invite) => Ok(AllocationPhase::Invited {
            invitation_sent_at: now,
            invitation_viewed_at: None,
        }),

        (
            AllocationPhase::Invited {
                invitation_sent_at,
                invitation_viewed_at,
            },
            AllocationEvent::MarkInvitationViewed,
        ) => Ok(AllocationPhase::Invited {
            invitation_sent_at: *invitation_sent_at,
            // First view wins; repeat views keep the original timestamp
            invitation_viewed_at: Some(invitation_viewed_at.unwrap_or(now)),
        }),

        (
            AllocationPhase::Invited {
                invitation_sent_at, ..
            },
            AllocationEvent::RequestOffer { deadline },
        ) => {
            if deadline <= now {
                return Err(MarketError::ExpiredDeadline { deadline });
            }
            Ok(AllocationPhase::OfferRequested {
                invitation_sent_at: *invitation_sent_at,
                offer_requested_at: now,
                deadline,
            })
        }

        (AllocationPhase::OfferRequested { deadline, .. }, AllocationEvent::SubmitOffer { rate }) => {
            if now > *deadline {
                return Err(MarketError::ExpiredDeadline {
                    deadline: *deadline,
                });
            }
            Ok(AllocationPhase::OfferSubmitted {
                offer_submitted_at: now,
                agreed_rate: rate,
            })
        }

        (AllocationPhase::OfferSubmitted { agreed_rate, .. }, AllocationEvent::Accept) => {
            Ok(AllocationPhase::Accepted {
                agreed_rate: *agreed_rate,
                decision_made_at: now,
            })
        }

        (
            AllocationPhase::PreSelected
            | AllocationPhase::Invited { .. }
            | AllocationPhase::OfferRequested { .. }
            | AllocationPhase::OfferSubmitted { .. }
            | AllocationPhase::Accepted { .. },
            AllocationEvent::Reject { reason },
        ) => Ok(AllocationPhase::Rejected {
            reason,
            decision_made_at: now,
        }),

        (AllocationPhase::Accepted { agreed_rate, .. }, AllocationEvent::Complete) => {
            Ok(AllocationPhase::Completed {
                agreed_rate: *agreed_rate,
                completed_at: now,
            })
        }

        (phase, event) => Err(MarketError::InvalidTransition {
            from: phase.status(),
            event: event.name(),
        }),
    }
}

/// A resource allocation: one (demand, resource) negotiation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation id
    pub id: AllocationId,
    /// The resource being allocated
    pub resource_id: ResourceId,
    /// The demand this allocation serves
    pub demand_id: DemandId,
    /// Originating offer, when the selection came from one
    pub offer_id: Option<OfferId>,
    /// People allocated per day
    pub person_count: u32,
    /// Days the allocation covers
    pub window: DateWindow,
    /// Builder-assigned priority (lower is more urgent)
    pub priority: u32,
    /// Free-form notes from the builder
    pub notes: Option<String>,
    /// Current workflow phase
    pub phase: AllocationPhase,
    /// When the allocation was created
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Allocation {
    /// Flat status of the current phase.
    #[must_use]
    pub const fn status(&self) -> AllocationStatus {
        self.phase.status()
    }

    /// Whether the workflow has ended.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Total person-days over the allocation window.
    #[must_use]
    pub fn person_days(&self) -> u64 {
        self.window.day_count() * u64::from(self.person_count)
    }
}

/// Input for creating an allocation through `select`.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionRequest {
    /// The resource to allocate
    pub resource_id: ResourceId,
    /// The demand being served
    pub demand_id: DemandId,
    /// People requested per day
    pub person_count: u32,
    /// Days requested
    pub window: DateWindow,
    /// Builder-assigned priority; defaults to 5
    pub priority: Option<u32>,
    /// Originating offer, if any
    pub offer_id: Option<OfferId>,
    /// Free-form notes
    pub notes: Option<String>,
}
