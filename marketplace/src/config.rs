//! Marketplace configuration.
//!
//! Values come from the environment (`CAPMARKET_*` variables, with `.env`
//! support through `dotenvy`) or from builder-style setters in tests.

use std::env;

/// Runtime knobs of the marketplace service.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketplaceConfig {
    /// Candidate search radius when the query gives none (km).
    ///
    /// Default: 50.0
    pub default_radius_km: f64,

    /// Result cap for candidate search when the query gives none.
    ///
    /// Default: 100
    pub max_candidates: usize,

    /// Working hours per person per day when a listing gives none.
    ///
    /// Default: 8.0
    pub default_daily_hours: f64,

    /// Maximum entries kept in the dead-letter queue.
    ///
    /// Default: 1000
    pub dlq_max_size: usize,

    /// Currency for listings that do not name one.
    ///
    /// Default: "EUR"
    pub default_currency: String,
}

impl MarketplaceConfig {
    /// Load configuration from the environment.
    ///
    /// Reads `.env` if present. Unset or unparseable variables fall back
    /// to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            default_radius_km: env::var("CAPMARKET_DEFAULT_RADIUS_KM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(50.0),
            max_candidates: env::var("CAPMARKET_MAX_CANDIDATES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            default_daily_hours: env::var("CAPMARKET_DEFAULT_DAILY_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8.0),
            dlq_max_size: env::var("CAPMARKET_DLQ_MAX_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            default_currency: env::var("CAPMARKET_DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "EUR".to_string()),
        }
    }

    /// Set the default search radius.
    #[must_use]
    pub const fn with_default_radius_km(mut self, radius_km: f64) -> Self {
        self.default_radius_km = radius_km;
        self
    }

    /// Set the candidate result cap.
    #[must_use]
    pub const fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Set the default daily hours.
    #[must_use]
    pub const fn with_default_daily_hours(mut self, hours: f64) -> Self {
        self.default_daily_hours = hours;
        self
    }

    /// Set the DLQ size cap.
    #[must_use]
    pub const fn with_dlq_max_size(mut self, size: usize) -> Self {
        self.dlq_max_size = size;
        self
    }
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            default_radius_km: 50.0,
            max_candidates: 100,
            default_daily_hours: 8.0,
            dlq_max_size: 1000,
            default_currency: "EUR".to_string(),
        }
    }
}
