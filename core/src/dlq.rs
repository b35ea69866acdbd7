//! Holding area for undeliverable notifications.
//!
//! By the time a dispatch fails, the allocation transition that produced
//! the notification has already committed; the envelope must not be lost.
//! Failed notifications are parked here, bounded, until an operator or a
//! redelivery job drains them. At capacity the oldest letter is evicted
//! and counted.

use crate::dispatch::Notification;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A notification that failed to leave the process.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// The undelivered envelope
    pub notification: Notification,
    /// What the dispatcher reported
    pub error: String,
    /// When delivery failed
    pub failed_at: DateTime<Utc>,
}

/// Bounded queue of dead letters, oldest first.
///
/// Handles share storage, so the marketplace can keep one while exposing
/// another to an operator surface.
///
/// # Example
///
/// ```
/// use capmarket_core::{DeadLetterQueue, Notification};
/// use chrono::Utc;
///
/// let dlq = DeadLetterQueue::new(100);
/// let notification = Notification::new(
///     "allocation_accepted",
///     uuid::Uuid::new_v4(),
///     serde_json::json!({}),
///     Utc::now(),
/// );
/// dlq.push(notification, "smtp relay unreachable".to_string(), Utc::now());
/// assert_eq!(dlq.len(), 1);
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue {
    letters: Arc<Mutex<VecDeque<DeadLetter>>>,
    capacity: usize,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` letters.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            letters: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Park an undelivered notification, evicting the oldest letter when
    /// the queue is full.
    pub fn push(&self, notification: Notification, error: String, failed_at: DateTime<Utc>) {
        let mut letters = self
            .letters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if letters.len() >= self.capacity {
            if let Some(evicted) = letters.pop_front() {
                metrics::counter!("capmarket.dlq.evicted").increment(1);
                tracing::warn!(
                    capacity = self.capacity,
                    event_type = %evicted.notification.event_type,
                    "dead letter queue full, evicting oldest letter"
                );
            }
        }

        tracing::warn!(
            event_type = %notification.event_type,
            recipient = %notification.recipient,
            error = %error,
            "notification dead-lettered"
        );
        letters.push_back(DeadLetter {
            notification,
            error,
            failed_at,
        });

        metrics::counter!("capmarket.dlq.letters").increment(1);
        // Depth is bounded by capacity, well within f64's exact range
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("capmarket.dlq.depth").set(letters.len() as f64);
    }

    /// Number of letters currently parked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.letters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether the queue holds no letters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The oldest letter, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter> {
        self.letters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Hand every letter off for redelivery, emptying the queue.
    pub fn drain(&self) -> Vec<DeadLetter> {
        let mut letters = self
            .letters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let drained: Vec<_> = letters.drain(..).collect();

        metrics::gauge!("capmarket.dlq.depth").set(0.0);
        tracing::info!(count = drained.len(), "dead letters drained for redelivery");

        drained
    }

    /// Maximum number of letters the queue retains.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Clone for DeadLetterQueue {
    fn clone(&self) -> Self {
        Self {
            letters: Arc::clone(&self.letters),
            capacity: self.capacity,
        }
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}
