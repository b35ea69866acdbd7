//! # Capmarket Testing
//!
//! Deterministic test doubles for the capmarket crates:
//! - Clocks that stand still ([`FixedClock`]) or move only when told to
//!   ([`StepClock`])
//! - Dispatchers that record ([`RecordingDispatcher`]) or always fail
//!   ([`FailingDispatcher`])
//!
//! ## Example
//!
//! ```
//! use capmarket_testing::{test_clock, RecordingDispatcher};
//! use capmarket_core::Clock;
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//!
//! let dispatcher = RecordingDispatcher::new();
//! assert!(dispatcher.emitted().is_empty());
//! ```

use chrono::{DateTime, Utc};
use capmarket_core::environment::Clock;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use capmarket_core::dispatch::{DispatchError, Notification, NotificationDispatcher};
    use chrono::Duration;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use capmarket_testing::mocks::FixedClock;
    /// use capmarket_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Manually advanceable clock.
    ///
    /// Starts at a given instant and only moves when `advance` or `set`
    /// is called. Useful for deadline and expiry tests.
    #[derive(Debug, Clone)]
    pub struct StepClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl StepClock {
        /// Create a new step clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward by `delta`.
        pub fn advance(&self, delta: Duration) {
            let mut time = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += delta;
        }

        /// Pin the clock to an exact instant.
        pub fn set(&self, instant: DateTime<Utc>) {
            let mut time = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time = instant;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Dispatcher that records every notification it is handed.
    ///
    /// Clones share the same log, so the test can keep one handle and give
    /// another to the system under test.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingDispatcher {
        sent: Arc<Mutex<Vec<Notification>>>,
    }

    impl RecordingDispatcher {
        /// Create an empty recording dispatcher.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything emitted so far, in order.
        #[must_use]
        pub fn emitted(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }

        /// Number of notifications emitted so far.
        #[must_use]
        pub fn count(&self) -> usize {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len()
        }

        /// Forget everything recorded so far.
        pub fn clear(&self) {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clear();
        }
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn emit(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
            let sent = Arc::clone(&self.sent);
            Box::pin(async move {
                sent.lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(notification);
                Ok(())
            })
        }
    }

    /// Dispatcher that rejects every notification.
    ///
    /// Drives the dead-letter path in service tests.
    #[derive(Debug, Clone)]
    pub struct FailingDispatcher {
        reason: String,
    }

    impl FailingDispatcher {
        /// Create a failing dispatcher with the given rejection reason.
        #[must_use]
        pub fn new(reason: impl Into<String>) -> Self {
            Self {
                reason: reason.into(),
            }
        }
    }

    impl Default for FailingDispatcher {
        fn default() -> Self {
            Self::new("dispatch channel down")
        }
    }

    impl NotificationDispatcher for FailingDispatcher {
        fn emit(
            &self,
            notification: Notification,
        ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
            let reason = self.reason.clone();
            Box::pin(async move {
                Err(DispatchError::Rejected {
                    event_type: notification.event_type,
                    reason,
                })
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FailingDispatcher, FixedClock, RecordingDispatcher, StepClock, test_clock};
