//! Dispatch health reporting.
//!
//! The marketplace owns no storage and no network of its own; the one
//! thing that can quietly go wrong inside it is notification delivery.
//! Health is therefore read straight off the dead-letter queue: a filling
//! queue degrades the service, a full one (letters being evicted) marks it
//! unhealthy.

use serde::{Deserialize, Serialize};

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Notifications are flowing
    Healthy,
    /// Dead letters are accumulating
    Degraded,
    /// Dead letters are being lost
    Unhealthy,
}

impl HealthStatus {
    /// Whether the service is fully operational.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Whether the service is operational but backing up.
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Whether the service is losing notifications.
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Point-in-time health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Derived status
    pub status: HealthStatus,
    /// Letters currently parked in the dead-letter queue
    pub dead_letters: usize,
    /// Letters the queue can hold before evicting
    pub dlq_capacity: usize,
    /// Operator-facing note, when not healthy
    pub detail: Option<String>,
}

impl HealthCheck {
    /// Derive health from dead-letter queue usage.
    ///
    /// Degraded once the queue is half full, unhealthy once it is full and
    /// evicting.
    #[must_use]
    pub fn from_dlq_usage(dead_letters: usize, dlq_capacity: usize) -> Self {
        let (status, detail) = if dead_letters >= dlq_capacity {
            (
                HealthStatus::Unhealthy,
                Some("dead letter queue is full, oldest letters are dropped".to_string()),
            )
        } else if dead_letters >= dlq_capacity / 2 {
            (
                HealthStatus::Degraded,
                Some("dead letter queue is filling up".to_string()),
            )
        } else {
            (HealthStatus::Healthy, None)
        };
        Self {
            status,
            dead_letters,
            dlq_capacity,
            detail,
        }
    }
}
