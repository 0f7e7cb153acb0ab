use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MAX_LISTINGS_PER_SUBSCRIPTION, REGION_LISTING_QUOTA};

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Whole naira — the only money type.
pub type Naira = u64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as Ms
}

/// Closed set of room categories creators can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    OneRoom,
    SelfContained,
    OneBedroom,
    TwoBedrooms,
    ThreeBedrooms,
}

/// Lifecycle of a surfaced listing. `Unverified` is the only non-terminal
/// state; everything else is history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    /// Surfaced to the client, verification pending.
    Unverified,
    /// Delayed verification fired while still unverified.
    Verified,
    /// Room lost its vacancy before verification.
    Rejected,
    /// Client disputed the listing as still occupied.
    Probation,
}

impl ListingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ListingStatus::Unverified)
    }

    /// Live listings block the same room from being re-surfaced to the
    /// same subscription.
    pub fn is_live(self) -> bool {
        matches!(self, ListingStatus::Unverified | ListingStatus::Verified)
    }

    pub fn label(self) -> &'static str {
        match self {
            ListingStatus::Unverified => "unverified",
            ListingStatus::Verified => "verified",
            ListingStatus::Rejected => "rejected",
            ListingStatus::Probation => "probation",
        }
    }
}

/// Room-type and price bounds carried by the paid transaction. Unset fields
/// are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingFilter {
    pub room_types: Option<Vec<RoomType>>,
    pub min_price: Option<Naira>,
    pub max_price: Option<Naira>,
}

impl ListingFilter {
    pub fn matches(&self, room: &RoomProfile) -> bool {
        if let Some(types) = &self.room_types
            && !types.contains(&room.room_type) {
                return false;
            }
        if let Some(min) = self.min_price
            && room.price < min {
                return false;
            }
        if let Some(max) = self.max_price
            && room.price > max {
                return false;
            }
        true
    }
}

/// Catalog mirror of a creator's room. Owned by the listings persistence
/// layer; the engine only reacts to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomProfile {
    pub id: Ulid,
    pub lodge_id: Ulid,
    /// Near-duplicate lodge cluster, assigned at lodge registration.
    pub group_id: Option<Ulid>,
    pub region_id: Ulid,
    pub creator_id: Ulid,
    pub room_type: RoomType,
    pub price: Naira,
    pub is_vacant: bool,
}

impl RoomProfile {
    /// Ungrouped lodges count as their own singleton group.
    pub fn group_key(&self) -> Ulid {
        self.group_id.unwrap_or(self.lodge_id)
    }
}

/// Per (subscription, region) counter pair. `queued + verified` never exceeds
/// [`REGION_LISTING_QUOTA`]; `expired` is a one-way ratchet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionTracker {
    pub region_id: Ulid,
    pub queued: u32,
    pub verified: u32,
    pub expired: bool,
}

impl RegionTracker {
    pub fn new(region_id: Ulid) -> Self {
        Self {
            region_id,
            queued: 0,
            verified: 0,
            expired: false,
        }
    }

    /// Room for one more listing? Expiry is checked independently of the raw
    /// sum — queued slots freed after expiry never reopen the tracker.
    pub fn has_capacity(&self) -> bool {
        !self.expired && self.queued + self.verified < REGION_LISTING_QUOTA
    }

    pub(crate) fn note_queued(&mut self) {
        self.queued += 1;
    }

    /// Move one listing from queued to verified; expire the tracker when the
    /// quota is reached.
    pub(crate) fn promote_one(&mut self) {
        self.queued = self.queued.saturating_sub(1);
        self.verified += 1;
        if self.verified >= REGION_LISTING_QUOTA {
            self.expired = true;
        }
    }

    pub(crate) fn release_queued(&mut self) {
        self.queued = self.queued.saturating_sub(1);
    }
}

/// One surfaced (room, client) pairing. Never deleted — terminal listings are
/// the subscription's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub id: Ulid,
    pub room_id: Ulid,
    pub region_id: Ulid,
    /// Lodge-group key at queue time, for de-duplicated allocation.
    pub group_key: Ulid,
    pub creator_id: Ulid,
    /// Rent snapshot the client saw when the listing was surfaced.
    pub price: Naira,
    pub status: ListingStatus,
    /// When the delayed verification transition becomes due.
    pub verify_at: Ms,
    /// Handle of the pending verification task; `None` once settled.
    pub pending_task: Option<Ulid>,
}

#[derive(Debug)]
pub struct SubscriptionState {
    pub id: Ulid,
    pub client_id: Ulid,
    pub filter: ListingFilter,
    /// One tracker per region covered by the paid transaction.
    pub trackers: HashMap<Ulid, RegionTracker>,
    pub listings: HashMap<Ulid, Listing>,
    /// Lifetime count of listings surfaced, capped at
    /// [`MAX_LISTINGS_PER_SUBSCRIPTION`].
    pub listings_sent: u32,
    pub is_expired: bool,
}

impl SubscriptionState {
    pub fn new(id: Ulid, client_id: Ulid, regions: &[Ulid], filter: ListingFilter) -> Self {
        let trackers = regions
            .iter()
            .map(|&r| (r, RegionTracker::new(r)))
            .collect();
        Self {
            id,
            client_id,
            filter,
            trackers,
            listings: HashMap::new(),
            listings_sent: 0,
            is_expired: false,
        }
    }

    pub fn under_listing_cap(&self) -> bool {
        self.listings_sent < MAX_LISTINGS_PER_SUBSCRIPTION
    }

    pub fn has_live_listing_for_room(&self, room_id: Ulid) -> bool {
        self.listings
            .values()
            .any(|l| l.room_id == room_id && l.status.is_live())
    }

    pub fn has_live_listing_for_group(&self, region_id: Ulid, group_key: Ulid) -> bool {
        self.listings
            .values()
            .any(|l| l.region_id == region_id && l.group_key == group_key && l.status.is_live())
    }

    /// Re-derive subscription expiry from the live tracker set. One-way: a
    /// subscription never un-expires.
    pub(crate) fn derive_expiry(&mut self) {
        if !self.trackers.is_empty() && self.trackers.values().all(|t| t.expired) {
            self.is_expired = true;
        }
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomUpserted {
        id: Ulid,
        lodge_id: Ulid,
        group_id: Option<Ulid>,
        region_id: Ulid,
        creator_id: Ulid,
        room_type: RoomType,
        price: Naira,
        is_vacant: bool,
    },
    RoomVacancyChanged {
        id: Ulid,
        is_vacant: bool,
    },
    SubscriptionOpened {
        id: Ulid,
        client_id: Ulid,
        regions: Vec<Ulid>,
        room_types: Option<Vec<RoomType>>,
        min_price: Option<Naira>,
        max_price: Option<Naira>,
    },
    ListingQueued {
        id: Ulid,
        subscription_id: Ulid,
        region_id: Ulid,
        room_id: Ulid,
        group_key: Ulid,
        creator_id: Ulid,
        price: Naira,
        verify_at: Ms,
        task: Ulid,
    },
    ListingVerified {
        id: Ulid,
        subscription_id: Ulid,
        amount: Naira,
    },
    ListingRejected {
        id: Ulid,
        subscription_id: Ulid,
    },
    ListingProbated {
        id: Ulid,
        subscription_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingInfo {
    pub id: Ulid,
    pub subscription_id: Ulid,
    pub client_id: Ulid,
    pub region_id: Ulid,
    pub room_id: Ulid,
    pub creator_id: Ulid,
    pub price: Naira,
    pub status: ListingStatus,
    pub verify_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerInfo {
    pub region_id: Ulid,
    pub queued: u32,
    pub verified: u32,
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: Ulid,
    pub client_id: Ulid,
    pub listings_sent: u32,
    pub is_expired: bool,
    pub trackers: Vec<TrackerInfo>,
}

/// Filters carried by a paid transaction, as handed over by the payments
/// layer when it opens a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionIntake {
    pub regions: Vec<Ulid>,
    pub room_types: Option<Vec<RoomType>>,
    pub min_price: Option<Naira>,
    pub max_price: Option<Naira>,
}

impl SubscriptionIntake {
    pub fn filter(&self) -> ListingFilter {
        ListingFilter {
            room_types: self.room_types.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }
}

/// What the initial allocation produced, per region.
#[derive(Debug, Clone)]
pub struct SubscriptionOutcome {
    pub subscription_id: Ulid,
    pub allocated: Vec<(Ulid, Vec<Ulid>)>,
}

impl SubscriptionOutcome {
    pub fn room_count(&self) -> usize {
        self.allocated.iter().map(|(_, rooms)| rooms.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(price: Naira, room_type: RoomType) -> RoomProfile {
        RoomProfile {
            id: Ulid::new(),
            lodge_id: Ulid::new(),
            group_id: None,
            region_id: Ulid::new(),
            creator_id: Ulid::new(),
            room_type,
            price,
            is_vacant: true,
        }
    }

    #[test]
    fn filter_unbounded_matches_everything() {
        let f = ListingFilter::default();
        assert!(f.matches(&room(1, RoomType::OneRoom)));
        assert!(f.matches(&room(999_999, RoomType::ThreeBedrooms)));
    }

    #[test]
    fn filter_price_bounds_are_inclusive() {
        let f = ListingFilter {
            room_types: None,
            min_price: Some(100),
            max_price: Some(200),
        };
        assert!(!f.matches(&room(99, RoomType::OneRoom)));
        assert!(f.matches(&room(100, RoomType::OneRoom)));
        assert!(f.matches(&room(200, RoomType::OneRoom)));
        assert!(!f.matches(&room(201, RoomType::OneRoom)));
    }

    #[test]
    fn filter_room_types() {
        let f = ListingFilter {
            room_types: Some(vec![RoomType::SelfContained, RoomType::OneBedroom]),
            min_price: None,
            max_price: None,
        };
        assert!(f.matches(&room(100, RoomType::SelfContained)));
        assert!(!f.matches(&room(100, RoomType::TwoBedrooms)));
    }

    #[test]
    fn group_key_falls_back_to_lodge() {
        let mut r = room(100, RoomType::OneRoom);
        assert_eq!(r.group_key(), r.lodge_id);
        let g = Ulid::new();
        r.group_id = Some(g);
        assert_eq!(r.group_key(), g);
    }

    #[test]
    fn tracker_capacity_and_promotion() {
        let mut t = RegionTracker::new(Ulid::new());
        assert!(t.has_capacity());

        for _ in 0..REGION_LISTING_QUOTA {
            t.note_queued();
        }
        assert!(!t.has_capacity());
        assert_eq!(t.queued, REGION_LISTING_QUOTA);

        for _ in 0..REGION_LISTING_QUOTA - 1 {
            t.promote_one();
            assert!(!t.expired);
        }
        t.promote_one();
        assert!(t.expired);
        assert_eq!(t.verified, REGION_LISTING_QUOTA);
        assert_eq!(t.queued, 0);
    }

    #[test]
    fn tracker_expiry_is_permanent() {
        let mut t = RegionTracker::new(Ulid::new());
        for _ in 0..REGION_LISTING_QUOTA {
            t.note_queued();
            t.promote_one();
        }
        assert!(t.expired);
        // Freed queue slots never reopen an expired tracker.
        t.release_queued();
        assert!(!t.has_capacity());
        assert!(t.expired);
    }

    #[test]
    fn tracker_release_floors_at_zero() {
        let mut t = RegionTracker::new(Ulid::new());
        t.release_queued();
        assert_eq!(t.queued, 0);
    }

    #[test]
    fn status_terminality() {
        assert!(!ListingStatus::Unverified.is_terminal());
        assert!(ListingStatus::Verified.is_terminal());
        assert!(ListingStatus::Rejected.is_terminal());
        assert!(ListingStatus::Probation.is_terminal());

        assert!(ListingStatus::Unverified.is_live());
        assert!(ListingStatus::Verified.is_live());
        assert!(!ListingStatus::Rejected.is_live());
        assert!(!ListingStatus::Probation.is_live());
    }

    #[test]
    fn subscription_expiry_derivation() {
        let regions = [Ulid::new(), Ulid::new()];
        let mut sub = SubscriptionState::new(
            Ulid::new(),
            Ulid::new(),
            &regions,
            ListingFilter::default(),
        );

        sub.trackers.get_mut(&regions[0]).unwrap().expired = true;
        sub.derive_expiry();
        assert!(!sub.is_expired);

        sub.trackers.get_mut(&regions[1]).unwrap().expired = true;
        sub.derive_expiry();
        assert!(sub.is_expired);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ListingQueued {
            id: Ulid::new(),
            subscription_id: Ulid::new(),
            region_id: Ulid::new(),
            room_id: Ulid::new(),
            group_key: Ulid::new(),
            creator_id: Ulid::new(),
            price: 45_000,
            verify_at: 1_700_000_000_000,
            task: Ulid::new(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
