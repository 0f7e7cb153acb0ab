use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Delayed verification transition for one listing. Idempotent: returns
    /// `Ok(false)` when the listing was already settled by a vacancy loss or
    /// dispute that won the race — firing twice never double-credits.
    pub async fn fire_verification(&self, listing_id: Ulid) -> Result<bool, EngineError> {
        let (sub_id, mut sub) = self.resolve_listing_write(&listing_id).await?;
        let (creator_id, status) = {
            let listing = sub
                .listings
                .get(&listing_id)
                .ok_or(EngineError::NotFound(listing_id))?;
            (listing.creator_id, listing.status)
        };

        // The status re-check under the write lock is the authoritative
        // guard; a lost task cancellation lands here as a no-op.
        if status != ListingStatus::Unverified {
            return Ok(false);
        }

        // Credit before the commit: a ledger refusal must leave the listing
        // and its tracker untouched.
        let amount = self.config.listing_fare;
        self.ledger
            .credit(creator_id, amount)
            .await
            .map_err(|e| EngineError::Ledger(e.to_string()))?;

        let was_expired = sub.is_expired;
        let event = Event::ListingVerified {
            id: listing_id,
            subscription_id: sub_id,
            amount,
        };
        self.persist_and_apply(sub_id, &mut sub, &event).await?;
        metrics::counter!(crate::observability::LISTINGS_SETTLED_TOTAL, "status" => "verified")
            .increment(1);
        info!("listing {listing_id} verified; creator {creator_id} credited {amount}");

        if !was_expired && sub.is_expired {
            metrics::counter!(crate::observability::SUBSCRIPTIONS_EXPIRED_TOTAL).increment(1);
            info!("subscription {sub_id} expired: every region tracker is at quota");
        }
        Ok(true)
    }

    /// Client dispute: "this room is still occupied." Only valid while the
    /// listing is unverified, and only for the subscription's own client.
    pub async fn report_listing_occupied(
        &self,
        listing_id: Ulid,
        client_id: Ulid,
    ) -> Result<(), EngineError> {
        let (sub_id, mut sub) = self.resolve_listing_write(&listing_id).await?;
        if sub.client_id != client_id {
            return Err(EngineError::Forbidden(listing_id));
        }
        let status = sub
            .listings
            .get(&listing_id)
            .ok_or(EngineError::NotFound(listing_id))?
            .status;
        if status != ListingStatus::Unverified {
            return Err(EngineError::InvalidState {
                listing: listing_id,
                status,
            });
        }

        let event = Event::ListingProbated {
            id: listing_id,
            subscription_id: sub_id,
        };
        self.persist_and_apply(sub_id, &mut sub, &event).await?;
        metrics::counter!(crate::observability::LISTINGS_SETTLED_TOTAL, "status" => "probation")
            .increment(1);
        info!("listing {listing_id} moved to probation on client dispute");
        Ok(())
    }

    /// Reject every pending listing on a room that lost its vacancy. Each
    /// listing is re-checked under its subscription's write lock — a
    /// verification that fired in between wins and is left alone.
    pub(super) async fn reject_pending_for_room(&self, room_id: Ulid) -> Result<(), EngineError> {
        let pending: Vec<Ulid> = self
            .pending_by_room
            .get(&room_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        for listing_id in pending {
            let (sub_id, mut sub) = match self.resolve_listing_write(&listing_id).await {
                Ok(resolved) => resolved,
                Err(_) => continue,
            };
            let still_pending = sub
                .listings
                .get(&listing_id)
                .is_some_and(|l| l.status == ListingStatus::Unverified && l.room_id == room_id);
            if !still_pending {
                continue;
            }

            let event = Event::ListingRejected {
                id: listing_id,
                subscription_id: sub_id,
            };
            self.persist_and_apply(sub_id, &mut sub, &event).await?;
            metrics::counter!(crate::observability::LISTINGS_SETTLED_TOTAL, "status" => "rejected")
                .increment(1);
            info!("listing {listing_id} rejected: room {room_id} lost its vacancy");
        }
        Ok(())
    }

    /// Unverified listings whose verification is due. The verifier polls this
    /// and fires each one; contended subscriptions are picked up next sweep.
    pub fn collect_due_verifications(&self, now: Ms) -> Vec<Ulid> {
        let mut due = Vec::new();
        for entry in self.subs.iter() {
            let sub = entry.value().clone();
            if let Ok(guard) = sub.try_read() {
                for listing in guard.listings.values() {
                    if listing.status == ListingStatus::Unverified
                        && listing.pending_task.is_some()
                        && listing.verify_at <= now
                    {
                        due.push(listing.id);
                    }
                }
            }
        }
        due
    }
}
