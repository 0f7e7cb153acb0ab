use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, SharedSubscription};

fn listing_info(sub: &SubscriptionState, l: &Listing) -> ListingInfo {
    ListingInfo {
        id: l.id,
        subscription_id: sub.id,
        client_id: sub.client_id,
        region_id: l.region_id,
        room_id: l.room_id,
        creator_id: l.creator_id,
        price: l.price,
        status: l.status,
        verify_at: l.verify_at,
    }
}

impl Engine {
    /// Dashboard summary: counters and per-region tracker state.
    pub async fn subscription_overview(&self, id: Ulid) -> Result<SubscriptionInfo, EngineError> {
        let sub = self
            .get_subscription(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = sub.read().await;
        let mut trackers: Vec<TrackerInfo> = guard
            .trackers
            .values()
            .map(|t| TrackerInfo {
                region_id: t.region_id,
                queued: t.queued,
                verified: t.verified,
                expired: t.expired,
            })
            .collect();
        trackers.sort_by_key(|t| t.region_id);
        Ok(SubscriptionInfo {
            id: guard.id,
            client_id: guard.client_id,
            listings_sent: guard.listings_sent,
            is_expired: guard.is_expired,
            trackers,
        })
    }

    /// Every listing ever surfaced under a subscription, oldest first.
    pub async fn listings_for_subscription(
        &self,
        id: Ulid,
    ) -> Result<Vec<ListingInfo>, EngineError> {
        let sub = self
            .get_subscription(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = sub.read().await;
        let mut out: Vec<ListingInfo> = guard
            .listings
            .values()
            .map(|l| listing_info(&guard, l))
            .collect();
        out.sort_by_key(|l| l.id);
        Ok(out)
    }

    /// A creator's listings across all subscriptions, optionally narrowed to
    /// one status.
    pub async fn listings_for_creator(
        &self,
        creator_id: Ulid,
        status: Option<ListingStatus>,
    ) -> Vec<ListingInfo> {
        let subs: Vec<SharedSubscription> = self.subs.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for sub in subs {
            let guard = sub.read().await;
            for l in guard.listings.values() {
                if l.creator_id != creator_id {
                    continue;
                }
                if let Some(want) = status
                    && l.status != want {
                        continue;
                    }
                out.push(listing_info(&guard, l));
            }
        }
        out.sort_by_key(|l| l.id);
        out
    }

    pub fn get_room(&self, id: &Ulid) -> Option<RoomProfile> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }
}
