//! Time abstraction.
//!
//! All domain code reads the current time through [`Clock`] so tests can
//! pin or step time deterministically. Production code uses [`SystemClock`].

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// # Examples
///
/// ```
/// use capmarket_core::{Clock, SystemClock};
///
/// fn stamp(clock: &dyn Clock) -> chrono::DateTime<chrono::Utc> {
///     clock.now()
/// }
///
/// let now = stamp(&SystemClock);
/// assert!(now.timestamp() > 0);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
