//! Engine tunables. Defaults match production behavior; tests and staging
//! shrink the delays via the builders or `LODGECAST_*` environment variables.

use crate::limits::BASE_LISTING_FARE;
use crate::model::{Ms, Naira};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between queuing a listing and firing its verification transition.
    pub verify_delay_ms: Ms,
    /// How often the background verifier polls for due listings.
    pub verifier_poll_ms: u64,
    /// Amount credited to the creator per verified listing.
    pub listing_fare: Naira,
    /// Seed for the allocator's RNG. `None` seeds from entropy; tests pin it.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            verify_delay_ms: 600_000, // 10 minutes
            verifier_poll_ms: 5_000,
            listing_fare: BASE_LISTING_FARE,
            rng_seed: None,
        }
    }
}

impl EngineConfig {
    /// Read overrides from `LODGECAST_VERIFY_DELAY_MS`, `LODGECAST_VERIFIER_POLL_MS`,
    /// `LODGECAST_LISTING_FARE` and `LODGECAST_RNG_SEED`. Unset or unparsable
    /// variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            verify_delay_ms: env_parse("LODGECAST_VERIFY_DELAY_MS")
                .unwrap_or(defaults.verify_delay_ms),
            verifier_poll_ms: env_parse("LODGECAST_VERIFIER_POLL_MS")
                .unwrap_or(defaults.verifier_poll_ms),
            listing_fare: env_parse("LODGECAST_LISTING_FARE").unwrap_or(defaults.listing_fare),
            rng_seed: env_parse("LODGECAST_RNG_SEED"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
