mod allocator;
mod error;
mod lifecycle;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::ledger::CreatorLedger;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSubscription = Arc<RwLock<SubscriptionState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One campus worth of allocation state: the room-catalog mirror plus every
/// subscription with its trackers and listings.
pub struct Engine {
    pub subs: DashMap<Ulid, SharedSubscription>,
    /// Room catalog mirrored from the listings persistence layer.
    pub rooms: DashMap<Ulid, RoomProfile>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) ledger: Arc<dyn CreatorLedger>,
    pub config: EngineConfig,
    /// Reverse lookup: listing id → owning subscription id.
    pub(super) listing_index: DashMap<Ulid, Ulid>,
    /// Room → unverified listing ids, for vacancy-loss rejection.
    pub(super) pending_by_room: DashMap<Ulid, Vec<Ulid>>,
    /// Allocator RNG; seeded via config for reproducible selection in tests.
    pub(super) rng: Mutex<StdRng>,
}

/// Apply an event directly to a SubscriptionState (no locking — caller holds
/// the lock). Infallible: every event was validated before it hit the WAL.
fn apply_to_subscription(
    sub: &mut SubscriptionState,
    event: &Event,
    listing_index: &DashMap<Ulid, Ulid>,
    pending_by_room: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::ListingQueued {
            id,
            subscription_id,
            region_id,
            room_id,
            group_key,
            creator_id,
            price,
            verify_at,
            task,
        } => {
            sub.listings.insert(
                *id,
                Listing {
                    id: *id,
                    room_id: *room_id,
                    region_id: *region_id,
                    group_key: *group_key,
                    creator_id: *creator_id,
                    price: *price,
                    status: ListingStatus::Unverified,
                    verify_at: *verify_at,
                    pending_task: Some(*task),
                },
            );
            if let Some(tracker) = sub.trackers.get_mut(region_id) {
                tracker.note_queued();
            }
            sub.listings_sent += 1;
            listing_index.insert(*id, *subscription_id);
            pending_by_room.entry(*room_id).or_default().push(*id);
        }
        Event::ListingVerified { id, .. } => {
            settle_listing(sub, id, ListingStatus::Verified, pending_by_room);
        }
        Event::ListingRejected { id, .. } => {
            settle_listing(sub, id, ListingStatus::Rejected, pending_by_room);
        }
        Event::ListingProbated { id, .. } => {
            settle_listing(sub, id, ListingStatus::Probation, pending_by_room);
        }
        // Room and subscription-creation events are handled at the map level
        Event::RoomUpserted { .. }
        | Event::RoomVacancyChanged { .. }
        | Event::SubscriptionOpened { .. } => {}
    }
}

/// Move a listing to a terminal status, clear its task handle, update the
/// region tracker, and re-derive subscription expiry where it applies.
fn settle_listing(
    sub: &mut SubscriptionState,
    id: &Ulid,
    status: ListingStatus,
    pending_by_room: &DashMap<Ulid, Vec<Ulid>>,
) {
    let Some(listing) = sub.listings.get_mut(id) else {
        return;
    };
    listing.status = status;
    listing.pending_task = None;
    let region_id = listing.region_id;
    let room_id = listing.room_id;

    if let Some(tracker) = sub.trackers.get_mut(&region_id) {
        match status {
            ListingStatus::Verified => tracker.promote_one(),
            _ => tracker.release_queued(),
        }
    }
    if status == ListingStatus::Verified {
        // Expiry must come from the live tracker set, not a cached flag.
        sub.derive_expiry();
    }

    if let Some(mut pending) = pending_by_room.get_mut(&room_id) {
        pending.retain(|l| l != id);
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        ledger: Arc<dyn CreatorLedger>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let engine = Self {
            subs: DashMap::new(),
            rooms: DashMap::new(),
            wal_tx,
            notify,
            ledger,
            config,
            listing_index: DashMap::new(),
            pending_by_room: DashMap::new(),
            rng: Mutex::new(rng),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context (e.g. lazy campus
        // creation).
        for event in &events {
            match event {
                Event::RoomUpserted {
                    id,
                    lodge_id,
                    group_id,
                    region_id,
                    creator_id,
                    room_type,
                    price,
                    is_vacant,
                } => {
                    engine.rooms.insert(
                        *id,
                        RoomProfile {
                            id: *id,
                            lodge_id: *lodge_id,
                            group_id: *group_id,
                            region_id: *region_id,
                            creator_id: *creator_id,
                            room_type: *room_type,
                            price: *price,
                            is_vacant: *is_vacant,
                        },
                    );
                }
                Event::RoomVacancyChanged { id, is_vacant } => {
                    if let Some(mut room) = engine.rooms.get_mut(id) {
                        room.is_vacant = *is_vacant;
                    }
                }
                Event::SubscriptionOpened {
                    id,
                    client_id,
                    regions,
                    room_types,
                    min_price,
                    max_price,
                } => {
                    let filter = ListingFilter {
                        room_types: room_types.clone(),
                        min_price: *min_price,
                        max_price: *max_price,
                    };
                    let sub = SubscriptionState::new(*id, *client_id, regions, filter);
                    engine.subs.insert(*id, Arc::new(RwLock::new(sub)));
                }
                other => {
                    if let Some(sub_id) = event_subscription_id(other)
                        && let Some(entry) = engine.subs.get(&sub_id) {
                            let sub_arc = entry.clone();
                            let mut guard = sub_arc.try_write().expect("replay: uncontended write");
                            apply_to_subscription(
                                &mut guard,
                                other,
                                &engine.listing_index,
                                &engine.pending_by_room,
                            );
                        }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_subscription(&self, id: &Ulid) -> Option<SharedSubscription> {
        self.subs.get(id).map(|e| e.value().clone())
    }

    pub fn subscription_for_listing(&self, listing_id: &Ulid) -> Option<Ulid> {
        self.listing_index.get(listing_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        subscription_id: Ulid,
        sub: &mut SubscriptionState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_subscription(sub, event, &self.listing_index, &self.pending_by_room);
        self.notify.send(subscription_id, event);
        Ok(())
    }

    /// Lookup listing → subscription, get subscription, acquire write lock.
    pub(super) async fn resolve_listing_write(
        &self,
        listing_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SubscriptionState>), EngineError> {
        let sub_id = self
            .subscription_for_listing(listing_id)
            .ok_or(EngineError::NotFound(*listing_id))?;
        let sub = self
            .get_subscription(&sub_id)
            .ok_or(EngineError::NotFound(sub_id))?;
        let guard = sub.write_owned().await;
        Ok((sub_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state: the room catalog, then each subscription with its
    /// listings replayed as queue + terminal pairs.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut rooms: Vec<RoomProfile> = self.rooms.iter().map(|e| e.value().clone()).collect();
        rooms.sort_by_key(|r| r.id);
        for room in rooms {
            events.push(Event::RoomUpserted {
                id: room.id,
                lodge_id: room.lodge_id,
                group_id: room.group_id,
                region_id: room.region_id,
                creator_id: room.creator_id,
                room_type: room.room_type,
                price: room.price,
                is_vacant: room.is_vacant,
            });
        }

        let mut subs: Vec<SharedSubscription> =
            self.subs.iter().map(|e| e.value().clone()).collect();
        subs.sort_by_key(|s| s.try_read().map(|g| g.id).unwrap_or_default());
        for sub_arc in subs {
            let guard = sub_arc.try_read().expect("compact: uncontended read");

            let mut regions: Vec<Ulid> = guard.trackers.keys().copied().collect();
            regions.sort();
            events.push(Event::SubscriptionOpened {
                id: guard.id,
                client_id: guard.client_id,
                regions,
                room_types: guard.filter.room_types.clone(),
                min_price: guard.filter.min_price,
                max_price: guard.filter.max_price,
            });

            let mut listings: Vec<&Listing> = guard.listings.values().collect();
            listings.sort_by_key(|l| l.id);
            for l in listings {
                events.push(Event::ListingQueued {
                    id: l.id,
                    subscription_id: guard.id,
                    region_id: l.region_id,
                    room_id: l.room_id,
                    group_key: l.group_key,
                    creator_id: l.creator_id,
                    price: l.price,
                    verify_at: l.verify_at,
                    // Settled listings carry no task handle; the terminal
                    // event below clears this placeholder on replay.
                    task: l.pending_task.unwrap_or(l.id),
                });
                match l.status {
                    ListingStatus::Unverified => {}
                    ListingStatus::Verified => events.push(Event::ListingVerified {
                        id: l.id,
                        subscription_id: guard.id,
                        amount: self.config.listing_fare,
                    }),
                    ListingStatus::Rejected => events.push(Event::ListingRejected {
                        id: l.id,
                        subscription_id: guard.id,
                    }),
                    ListingStatus::Probation => events.push(Event::ListingProbated {
                        id: l.id,
                        subscription_id: guard.id,
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the subscription_id from an event (for listing events).
fn event_subscription_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ListingQueued { subscription_id, .. }
        | Event::ListingVerified { subscription_id, .. }
        | Event::ListingRejected { subscription_id, .. }
        | Event::ListingProbated { subscription_id, .. } => Some(*subscription_id),
        Event::RoomUpserted { .. }
        | Event::RoomVacancyChanged { .. }
        | Event::SubscriptionOpened { .. } => None,
    }
}
