use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, SharedSubscription};

/// A vacant room eligible for allocation, with the lodge handles needed for
/// group de-duplication.
#[derive(Debug, Clone)]
pub(super) struct Candidate {
    pub room_id: Ulid,
    pub lodge_id: Ulid,
    pub group_key: Ulid,
    pub creator_id: Ulid,
    pub price: Naira,
}

/// Pick at most `quota` rooms, never two from the same lodge group: choose a
/// representative lodge per group uniformly at random, then one matching room
/// from it, then keep a random subset of groups.
pub(super) fn pick_representatives(
    candidates: Vec<Candidate>,
    quota: usize,
    rng: &mut StdRng,
) -> Vec<Candidate> {
    if quota == 0 || candidates.is_empty() {
        return Vec::new();
    }

    // group → lodge → rooms. BTreeMaps keep iteration order stable so a
    // seeded RNG reproduces the same selection.
    let mut groups: BTreeMap<Ulid, BTreeMap<Ulid, Vec<Candidate>>> = BTreeMap::new();
    for cand in candidates {
        groups
            .entry(cand.group_key)
            .or_default()
            .entry(cand.lodge_id)
            .or_default()
            .push(cand);
    }

    let mut reps: Vec<Candidate> = Vec::with_capacity(groups.len());
    for lodges in groups.into_values() {
        let lodge_keys: Vec<Ulid> = lodges.keys().copied().collect();
        let Some(lodge) = lodge_keys.choose(rng) else {
            continue;
        };
        if let Some(room) = lodges[lodge].choose(rng) {
            reps.push(room.clone());
        }
    }

    reps.shuffle(rng);
    reps.truncate(quota);
    reps
}

/// Remaining listing budget for one region of a subscription.
/// `CapacityExceeded` is the allocator's internal skip signal for regions at
/// or past quota (or subscriptions at their lifetime cap) — callers swallow
/// it, they never surface it.
fn region_budget(sub: &SubscriptionState, region_id: Ulid) -> Result<usize, EngineError> {
    if sub.is_expired || !sub.under_listing_cap() {
        return Err(EngineError::CapacityExceeded(region_id));
    }
    let tracker = sub
        .trackers
        .get(&region_id)
        .ok_or(EngineError::NotFound(region_id))?;
    if !tracker.has_capacity() {
        return Err(EngineError::CapacityExceeded(region_id));
    }
    let tracker_left = REGION_LISTING_QUOTA - tracker.queued - tracker.verified;
    let cap_left = MAX_LISTINGS_PER_SUBSCRIPTION - sub.listings_sent;
    Ok(tracker_left.min(cap_left) as usize)
}

impl Engine {
    /// Mirror a room-catalog row. Pure state: vacancy edges come in through
    /// [`Engine::on_room_vacancy_changed`], the caller owns edge detection.
    pub async fn upsert_room(&self, room: RoomProfile) -> Result<(), EngineError> {
        if !self.rooms.contains_key(&room.id) && self.rooms.len() >= MAX_ROOMS_PER_CAMPUS {
            return Err(EngineError::LimitExceeded("too many rooms on campus"));
        }
        let event = Event::RoomUpserted {
            id: room.id,
            lodge_id: room.lodge_id,
            group_id: room.group_id,
            region_id: room.region_id,
            creator_id: room.creator_id,
            room_type: room.room_type,
            price: room.price,
            is_vacant: room.is_vacant,
        };
        self.wal_append(&event).await?;
        self.rooms.insert(room.id, room);
        Ok(())
    }

    /// Open a paid subscription and run the initial allocation across its
    /// regions. A region with no qualifying candidates simply allocates
    /// nothing — that is a valid empty allocation, not an error.
    pub async fn open_subscription(
        &self,
        id: Ulid,
        client_id: Ulid,
        intake: SubscriptionIntake,
    ) -> Result<SubscriptionOutcome, EngineError> {
        if self.subs.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.subs.len() >= MAX_SUBSCRIPTIONS_PER_CAMPUS {
            return Err(EngineError::LimitExceeded("too many subscriptions on campus"));
        }

        let mut regions = intake.regions.clone();
        let mut seen = HashSet::new();
        regions.retain(|r| seen.insert(*r));
        if regions.is_empty() {
            return Err(EngineError::LimitExceeded("subscription covers no regions"));
        }
        if regions.len() > MAX_REGIONS_PER_SUBSCRIPTION {
            return Err(EngineError::LimitExceeded("too many regions on subscription"));
        }

        let event = Event::SubscriptionOpened {
            id,
            client_id,
            regions: regions.clone(),
            room_types: intake.room_types.clone(),
            min_price: intake.min_price,
            max_price: intake.max_price,
        };
        self.wal_append(&event).await?;
        let sub = SubscriptionState::new(id, client_id, &regions, intake.filter());
        let sub_arc = Arc::new(tokio::sync::RwLock::new(sub));
        self.subs.insert(id, sub_arc.clone());
        self.notify.send(id, &event);
        metrics::counter!(crate::observability::SUBSCRIPTIONS_OPENED_TOTAL).increment(1);

        let mut guard = sub_arc.write().await;
        let mut allocated = Vec::with_capacity(regions.len());
        for region_id in &regions {
            let rooms = self.allocate_region(&mut guard, *region_id).await?;
            allocated.push((*region_id, rooms));
        }

        let outcome = SubscriptionOutcome {
            subscription_id: id,
            allocated,
        };
        info!(
            "subscription {id} opened: {} initial listings across {} regions",
            outcome.room_count(),
            regions.len()
        );
        Ok(outcome)
    }

    /// Fill one region's tracker up to its remaining capacity.
    async fn allocate_region(
        &self,
        sub: &mut SubscriptionState,
        region_id: Ulid,
    ) -> Result<Vec<Ulid>, EngineError> {
        let budget = match region_budget(sub, region_id) {
            Ok(budget) => budget,
            Err(EngineError::CapacityExceeded(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let candidates = self.vacant_candidates(sub, region_id);
        let picks = {
            let mut rng = self.rng.lock().expect("allocator rng poisoned");
            pick_representatives(candidates, budget, &mut rng)
        };

        let mut allocated = Vec::with_capacity(picks.len());
        for cand in picks {
            self.queue_listing(sub, region_id, &cand).await?;
            allocated.push(cand.room_id);
        }
        Ok(allocated)
    }

    /// Vacant, filter-matching rooms in a region, excluding rooms and lodge
    /// groups the subscription already has a live listing for.
    fn vacant_candidates(&self, sub: &SubscriptionState, region_id: Ulid) -> Vec<Candidate> {
        self.rooms
            .iter()
            .filter_map(|entry| {
                let room = entry.value();
                if room.region_id != region_id || !room.is_vacant || !sub.filter.matches(room) {
                    return None;
                }
                if sub.has_live_listing_for_room(room.id)
                    || sub.has_live_listing_for_group(region_id, room.group_key())
                {
                    return None;
                }
                Some(Candidate {
                    room_id: room.id,
                    lodge_id: room.lodge_id,
                    group_key: room.group_key(),
                    creator_id: room.creator_id,
                    price: room.price,
                })
            })
            .collect()
    }

    /// Surface one room to one subscription: queue the listing and schedule
    /// its delayed verification.
    async fn queue_listing(
        &self,
        sub: &mut SubscriptionState,
        region_id: Ulid,
        cand: &Candidate,
    ) -> Result<Ulid, EngineError> {
        let id = Ulid::new();
        let event = Event::ListingQueued {
            id,
            subscription_id: sub.id,
            region_id,
            room_id: cand.room_id,
            group_key: cand.group_key,
            creator_id: cand.creator_id,
            price: cand.price,
            verify_at: now_ms() + self.config.verify_delay_ms,
            task: Ulid::new(),
        };
        self.persist_and_apply(sub.id, sub, &event).await?;
        metrics::counter!(crate::observability::LISTINGS_QUEUED_TOTAL).increment(1);
        Ok(id)
    }

    /// Vacancy edge from the room persistence layer. On a gained vacancy the
    /// room is offered to every matching subscription with capacity; on a
    /// lost vacancy every pending listing on the room is rejected. Returns
    /// the listings queued (empty on loss).
    pub async fn on_room_vacancy_changed(
        &self,
        room_id: Ulid,
        became_vacant: bool,
    ) -> Result<Vec<Ulid>, EngineError> {
        if !self.rooms.contains_key(&room_id) {
            return Err(EngineError::NotFound(room_id));
        }
        let event = Event::RoomVacancyChanged {
            id: room_id,
            is_vacant: became_vacant,
        };
        self.wal_append(&event).await?;
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.is_vacant = became_vacant;
        }

        if became_vacant {
            self.offer_room(room_id).await
        } else {
            self.reject_pending_for_room(room_id).await?;
            Ok(Vec::new())
        }
    }

    /// Incremental allocation: offer a newly vacant room to every matching
    /// subscription, at most one listing each.
    async fn offer_room(&self, room_id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let Some(room) = self.rooms.get(&room_id).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let subs: Vec<SharedSubscription> = self.subs.iter().map(|e| e.value().clone()).collect();

        let mut queued = Vec::new();
        for sub_arc in subs {
            let mut sub = sub_arc.write().await;
            if region_budget(&sub, room.region_id).is_err() {
                // No tracker for this region, or at quota — skip silently.
                continue;
            }
            if !sub.filter.matches(&room) {
                continue;
            }
            if sub.has_live_listing_for_room(room.id)
                || sub.has_live_listing_for_group(room.region_id, room.group_key())
            {
                continue;
            }

            let cand = Candidate {
                room_id: room.id,
                lodge_id: room.lodge_id,
                group_key: room.group_key(),
                creator_id: room.creator_id,
                price: room.price,
            };
            let id = self.queue_listing(&mut sub, room.region_id, &cand).await?;
            queued.push(id);
        }
        if !queued.is_empty() {
            info!("room {room_id} vacated: offered to {} subscriptions", queued.len());
        }
        Ok(queued)
    }
}
