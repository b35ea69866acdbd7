//! # Capmarket Core
//!
//! Runtime-independent building blocks shared by the capmarket crates:
//!
//! - [`environment`]: the `Clock` abstraction that keeps time injectable
//! - [`dispatch`]: the notification seam toward external delivery channels
//! - [`dlq`]: a bounded holding area for undeliverable notifications
//! - [`health`]: service health derived from the dispatch backlog
//!
//! Everything here is deliberately free of domain knowledge. The
//! marketplace crate owns the business rules; this crate owns the plumbing
//! those rules are wired through.

pub mod dispatch;
pub mod dlq;
pub mod environment;
pub mod health;

pub use dispatch::{DispatchError, Notification, NotificationDispatcher};
pub use dlq::{DeadLetter, DeadLetterQueue};
pub use environment::{Clock, SystemClock};
pub use health::{HealthCheck, HealthStatus};
