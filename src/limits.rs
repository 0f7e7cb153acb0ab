//! Hard limits and fixed quotas. Everything here is a deliberate product or
//! abuse ceiling, not a tunable — tunables live in [`crate::config`].

use crate::model::Naira;

/// Listings a region tracker may hold across its lifetime: once this many are
/// verified the tracker is permanently expired.
pub const REGION_LISTING_QUOTA: u32 = 3;

/// Lifetime cap on listings surfaced under one subscription, across all of
/// its regions.
pub const MAX_LISTINGS_PER_SUBSCRIPTION: u32 = 20;

/// Regions a single paid transaction may cover.
pub const MAX_REGIONS_PER_SUBSCRIPTION: usize = 16;

/// Room-catalog entries per campus engine.
pub const MAX_ROOMS_PER_CAMPUS: usize = 100_000;

/// Open subscriptions per campus engine.
pub const MAX_SUBSCRIPTIONS_PER_CAMPUS: usize = 50_000;

/// Fixed amount credited to a creator when one of their listings verifies.
/// Overridable per engine via [`crate::config::EngineConfig::listing_fare`].
pub const BASE_LISTING_FARE: Naira = 50;

/// Campus name length cap — campus names become WAL file names.
pub const MAX_CAMPUS_NAME_LEN: usize = 256;

/// Campus engines a single manager will host. Each engine keeps its WAL file
/// open, so this also bounds file descriptors.
pub const MAX_CAMPUSES: usize = 128;
