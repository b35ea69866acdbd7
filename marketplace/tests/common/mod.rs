//! Shared harness for the marketplace integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use capmarket::allocation::SelectionRequest;
use capmarket::catalog::ResourceSpec;
use capmarket::demand::DemandSpec;
use capmarket::error::Result;
use capmarket::geo::{GeoMatch, GeoProvider};
use capmarket::service::{Marketplace, MarketplaceEnvironment};
use capmarket::types::{
    BuilderId, DateWindow, DemandId, Location, Money, Pricing, ProviderId, ResourceId, Visibility,
};
use capmarket::MarketplaceConfig;
use capmarket_core::environment::Clock;
use capmarket_core::dispatch::NotificationDispatcher;
use capmarket_testing::{RecordingDispatcher, StepClock, test_clock};
use chrono::NaiveDate;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// Geo double fed with canned matches; `nearby` filters them by radius.
#[derive(Clone, Default)]
pub struct StubGeo {
    matches: Arc<Mutex<Vec<GeoMatch>>>,
}

impl StubGeo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, resource_id: ResourceId, distance_km: f64) {
        self.matches
            .lock()
            .unwrap()
            .push(GeoMatch {
                resource_id,
                distance_km,
            });
    }
}

impl GeoProvider for StubGeo {
    fn nearby(
        &self,
        _origin: Location,
        radius_km: f64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<GeoMatch>>> + Send + '_>> {
        let matches = self.matches.lock().unwrap().clone();
        Box::pin(async move {
            let mut hits: Vec<GeoMatch> = matches
                .into_iter()
                .filter(|m| m.distance_km <= radius_km)
                .collect();
            hits.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
            Ok(hits)
        })
    }
}

pub struct Harness {
    pub market: Marketplace,
    pub dispatcher: RecordingDispatcher,
    pub clock: StepClock,
    pub geo: StubGeo,
}

/// Marketplace wired to a step clock, a recording dispatcher and a stub
/// geo index, with a small DLQ so tests can fill it.
pub fn harness() -> Harness {
    let clock = StepClock::new(test_clock().now());
    let dispatcher = RecordingDispatcher::new();
    let geo = StubGeo::new();
    let env = MarketplaceEnvironment::new(
        Arc::new(clock.clone()),
        Arc::new(dispatcher.clone()),
        Arc::new(geo.clone()),
    );
    let config = MarketplaceConfig::default().with_dlq_max_size(8);
    Harness {
        market: Marketplace::new(env, config),
        dispatcher,
        clock,
        geo,
    }
}

/// Same harness but with a caller-supplied dispatcher.
pub fn harness_with_dispatcher(dispatcher: Arc<dyn NotificationDispatcher>) -> Harness {
    let clock = StepClock::new(test_clock().now());
    let geo = StubGeo::new();
    let env = MarketplaceEnvironment::new(Arc::new(clock.clone()), dispatcher, Arc::new(geo.clone()));
    let config = MarketplaceConfig::default().with_dlq_max_size(8);
    Harness {
        market: Marketplace::new(env, config),
        dispatcher: RecordingDispatcher::new(),
        clock,
        geo,
    }
}

pub fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn window(start: &str, end: &str) -> DateWindow {
    DateWindow::new(day(start), day(end)).unwrap()
}

/// A June listing: `people` per day, 8h days, scaffolding, Berlin.
pub fn resource_spec(provider_id: ProviderId, people: u32) -> ResourceSpec {
    ResourceSpec {
        provider_id,
        project_id: None,
        title: Some("Scaffolding crew".to_string()),
        description: None,
        window: window("2025-06-01", "2025-06-30"),
        person_count: people,
        daily_hours: Some(8.0),
        category: "scaffolding".to_string(),
        subcategory: None,
        location: Some(Location::new(52.52, 13.405)),
        visibility: Visibility::Public,
        pricing: Some(Pricing {
            hourly_rate: Some(Money::from_cents(6500)),
            daily_rate: None,
            currency: "EUR".to_string(),
        }),
        skills: vec!["scaffolding".to_string()],
        equipment: vec![],
    }
}

/// A matching June demand for `people` per day.
pub fn demand_spec(builder_id: BuilderId, people: u32) -> DemandSpec {
    DemandSpec {
        builder_id,
        project_id: None,
        category: "scaffolding".to_string(),
        subcategory: None,
        required_person_count: people,
        window: window("2025-06-01", "2025-06-30"),
        location: Some(Location::new(52.5, 13.4)),
        max_distance_km: Some(50.0),
        max_hourly_rate: None,
        required_skills: vec![],
        required_equipment: vec![],
        description: None,
    }
}

pub fn selection(
    resource_id: ResourceId,
    demand_id: DemandId,
    people: u32,
    w: DateWindow,
) -> SelectionRequest {
    SelectionRequest {
        resource_id,
        demand_id,
        person_count: people,
        window: w,
        priority: None,
        offer_id: None,
        notes: None,
    }
}
