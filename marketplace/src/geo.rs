//! Geographic search collaborator.
//!
//! Proximity search is owned by an external service (PostGIS, a geo index,
//! whatever the deployment provides). The marketplace only needs one
//! question answered: which resources lie within a radius of a point, and
//! how far away are they. The trait returns boxed futures so it can be
//! injected as `Arc<dyn GeoProvider>`.

use crate::error::Result;
use crate::types::{Location, ResourceId};
use std::future::Future;
use std::pin::Pin;

/// One hit from a proximity query.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoMatch {
    /// The matched resource
    pub resource_id: ResourceId,
    /// Distance from the query point in kilometers
    pub distance_km: f64,
}

/// External proximity index.
pub trait GeoProvider: Send + Sync {
    /// Resources within `radius_km` of `origin`, nearest first.
    ///
    /// # Errors
    ///
    /// Implementations surface lookup failures as [`crate::MarketError`];
    /// callers treat any failure as an empty candidate list being
    /// unavailable, not as corrupted state.
    fn nearby(
        &self,
        origin: Location,
        radius_km: f64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GeoMatch>>> + Send + '_>>;
}
