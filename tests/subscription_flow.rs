use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use lodgecast::campus::CampusManager;
use lodgecast::config::EngineConfig;
use lodgecast::ledger::BalanceBook;
use lodgecast::model::*;
use lodgecast::{Engine, EngineError};

// ── Test infrastructure ──────────────────────────────────────

fn test_data_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir()
        .join(format!("lodgecast_int_test_{}", Ulid::new()))
        .join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        verify_delay_ms: 40,
        verifier_poll_ms: 10,
        rng_seed: Some(11),
        ..EngineConfig::default()
    }
}

fn start_campus(name: &str) -> (Arc<Engine>, Arc<BalanceBook>) {
    let ledger = Arc::new(BalanceBook::new());
    let manager = CampusManager::new(test_data_dir(name), 1000, fast_config(), ledger.clone());
    let engine = manager.get_or_create("nsukka").unwrap();
    (engine, ledger)
}

fn vacant_room(region_id: Ulid, creator_id: Ulid) -> RoomProfile {
    RoomProfile {
        id: Ulid::new(),
        lodge_id: Ulid::new(),
        group_id: None,
        region_id,
        creator_id,
        room_type: RoomType::SelfContained,
        price: 150_000,
        is_vacant: true,
    }
}

async fn wait_until<F>(mut done: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached within 2s");
}

// ── End-to-end flows ─────────────────────────────────────────

#[tokio::test]
async fn paid_subscription_verifies_through_the_background_verifier() {
    let (engine, ledger) = start_campus("verify_flow");
    let region = Ulid::new();
    let creator = Ulid::new();
    for _ in 0..3 {
        engine
            .upsert_room(vacant_room(region, creator))
            .await
            .unwrap();
    }

    let client = Ulid::new();
    let sub_id = Ulid::new();
    let mut events = engine.notify.subscribe(sub_id);
    let outcome = engine
        .open_subscription(
            sub_id,
            client,
            SubscriptionIntake {
                regions: vec![region],
                room_types: None,
                min_price: None,
                max_price: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.room_count(), 3);

    // The campus verifier fires all three delayed transitions on its own;
    // the balance lands at three fares.
    let fare = engine.config.listing_fare;
    wait_until(|| ledger.balance(creator) == 3 * fare).await;
    let overview = engine.subscription_overview(sub_id).await.unwrap();
    assert!(overview.is_expired);
    assert!(overview.trackers[0].expired);
    assert_eq!(overview.trackers[0].verified, 3);

    // The notify stream saw the opening, three queues, and three verdicts.
    let mut queued = 0;
    let mut verified = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ListingQueued { .. } => queued += 1,
            Event::ListingVerified { .. } => verified += 1,
            _ => {}
        }
    }
    assert_eq!(queued, 3);
    assert_eq!(verified, 3);
}

#[tokio::test]
async fn dispute_beats_the_verifier_when_raised_first() {
    let (engine, ledger) = start_campus("dispute_flow");
    let region = Ulid::new();
    let creator = Ulid::new();
    engine
        .upsert_room(vacant_room(region, creator))
        .await
        .unwrap();

    let client = Ulid::new();
    let sub_id = Ulid::new();
    engine
        .open_subscription(
            sub_id,
            client,
            SubscriptionIntake {
                regions: vec![region],
                room_types: None,
                min_price: None,
                max_price: None,
            },
        )
        .await
        .unwrap();

    let listing = engine.listings_for_subscription(sub_id).await.unwrap()[0].clone();
    engine
        .report_listing_occupied(listing.id, client)
        .await
        .unwrap();

    // Give the verifier time to sweep past the (cancelled) due time.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let listing = engine.listings_for_subscription(sub_id).await.unwrap()[0].clone();
    assert_eq!(listing.status, ListingStatus::Probation);
    assert_eq!(ledger.balance(creator), 0);

    // A second dispute hits the terminal-state wall.
    let result = engine.report_listing_occupied(listing.id, client).await;
    assert!(matches!(result, Err(EngineError::InvalidState { .. })));
}

#[tokio::test]
async fn campuses_do_not_share_subscriptions() {
    let ledger = Arc::new(BalanceBook::new());
    let manager = CampusManager::new(
        test_data_dir("two_campuses"),
        1000,
        fast_config(),
        ledger.clone(),
    );
    let north = manager.get_or_create("north").unwrap();
    let south = manager.get_or_create("south").unwrap();

    let region = Ulid::new();
    north
        .upsert_room(vacant_room(region, Ulid::new()))
        .await
        .unwrap();

    let sub_id = Ulid::new();
    north
        .open_subscription(
            sub_id,
            Ulid::new(),
            SubscriptionIntake {
                regions: vec![region],
                room_types: None,
                min_price: None,
                max_price: None,
            },
        )
        .await
        .unwrap();

    assert!(north.subscription_overview(sub_id).await.is_ok());
    assert!(matches!(
        south.subscription_overview(sub_id).await,
        Err(EngineError::NotFound(_))
    ));
}
