//! Notification dispatch seam.
//!
//! Domain events that must reach a party outside the process (provider,
//! builder) are flattened into a [`Notification`] envelope and handed to a
//! [`NotificationDispatcher`]. Delivery is at-most-once from the caller's
//! point of view: a failed dispatch is reported through [`DispatchError`]
//! and never blocks or rolls back the state change that produced it.
//!
//! The trait returns boxed futures so it stays dyn-compatible and can be
//! injected as `Arc<dyn NotificationDispatcher>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Type-erased notification envelope.
///
/// `payload` carries the serialized domain event; `event_type` is a stable
/// snake_case discriminator the delivery channel can route on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Routing discriminator, e.g. `"resource_invited"`.
    pub event_type: String,

    /// The party this notification is addressed to.
    pub recipient: Uuid,

    /// Serialized event body.
    pub payload: serde_json::Value,

    /// When the underlying domain event occurred.
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    /// Create a new notification envelope.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        recipient: Uuid,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            recipient,
            payload,
            occurred_at,
        }
    }
}

/// Errors surfaced by a notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The delivery channel could not be reached.
    #[error("dispatch channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// The channel refused the notification.
    #[error("notification rejected ({event_type}): {reason}")]
    Rejected {
        /// Event type of the rejected notification.
        event_type: String,
        /// Reason reported by the channel.
        reason: String,
    },
}

/// Outbound notification channel.
///
/// Implementations deliver to email, push, webhooks, a message broker, or
/// (in tests) an in-memory recording sink. Implementations must be cheap to
/// clone behind an `Arc` and safe to call from spawned tasks.
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver a single notification.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when the channel is unreachable or
    /// refuses the notification. Callers treat this as non-fatal.
    fn emit(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct NullDispatcher;

    impl NotificationDispatcher for NullDispatcher {
        fn emit(
            &self,
            _notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn null_dispatcher_accepts_envelope() {
        let dispatcher = NullDispatcher;
        let notification = Notification::new(
            "resource_invited",
            Uuid::new_v4(),
            serde_json::json!({ "hello": "world" }),
            Utc::now(),
        );
        assert!(dispatcher.emit(notification).await.is_ok());
    }

    #[test]
    fn notification_round_trips_through_json() {
        let notification = Notification::new(
            "offer_submitted",
            Uuid::new_v4(),
            serde_json::json!({ "rate_cents": 8500 }),
            Utc::now(),
        );
        let encoded = serde_json::to_string(&notification).unwrap();
        let decoded: Notification = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, notification);
    }

    #[test]
    fn dispatch_error_messages_name_the_event() {
        let err = DispatchError::Rejected {
            event_type: "allocation_accepted".to_string(),
            reason: "unknown recipient".to_string(),
        };
        assert!(err.to_string().contains("allocation_accepted"));
    }
}
