//! # Capmarket
//!
//! Resource capacity allocation and scheduling core for a construction
//! marketplace. Providers list capacity (crews of N people over a date
//! window), builders post demand, and the allocation workflow negotiates
//! the two sides together:
//!
//! - [`catalog`]: resource listings, validation, candidate search,
//!   derived status
//! - [`calendar`]: the per-(resource, day) commitment ledger and the
//!   overbooking guard
//! - [`allocation`]: the selection-to-completion state machine
//! - [`demand`]: demand requests with an always-derivable status
//! - [`kpi`]: pure KPI roll-ups per provider and period
//! - [`service`]: the [`Marketplace`](service::Marketplace) facade that
//!   serializes all writes behind one lock and dispatches notifications
//!
//! The domain modules are pure and synchronous; only the service layer is
//! async. Time, geo search and notification delivery are injected through
//! the traits in [`capmarket_core`] and [`geo`].

pub mod allocation;
pub mod calendar;
pub mod catalog;
pub mod config;
pub mod demand;
pub mod error;
pub mod events;
pub mod geo;
pub mod kpi;
pub mod service;
pub mod types;

pub use allocation::{Allocation, AllocationEvent, AllocationPhase, AllocationStatus, SelectionRequest};
pub use calendar::CalendarState;
pub use catalog::{Candidate, CandidateQuery, Resource, ResourcePatch, ResourceSpec};
pub use config::MarketplaceConfig;
pub use demand::{DemandRequest, DemandSpec};
pub use error::{MarketError, Result};
pub use events::DomainEvent;
pub use geo::{GeoMatch, GeoProvider};
pub use kpi::ResourceKpis;
pub use service::{MarketState, Marketplace, MarketplaceEnvironment};
pub use types::{
    AllocationId, BuilderId, CalendarEntryStatus, DateWindow, DemandId, DemandStatus, Location,
    Money, OfferId, Pricing, ProjectId, ProviderId, ResourceId, ResourceStatus, Visibility,
};
