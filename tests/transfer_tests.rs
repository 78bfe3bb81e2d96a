mod common;

use dorm_ledger::error::AppError;
use dorm_ledger::models::{BedStatus, TransferStatus};
use dorm_ledger::store::{DormStore, NewTransfer};

#[tokio::test]
async fn approval_moves_no_occupancy() {
    let fx = common::store_with_room(2);
    let (to_room, _) = common::add_room(&fx, "A-102", 2);
    let registration = common::register_confirmed(&fx.store, fx.room.id, None).await;

    let transfer = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: to_room.id,
            to_bed_id: None,
            reason: Some("closer to campus".into()),
        })
        .await
        .unwrap();
    let approved = fx.store.decide_transfer(transfer.id, true).await.unwrap();
    assert_eq!(approved.status, TransferStatus::Approved);

    let from = fx.store.room(fx.room.id).await.unwrap().unwrap();
    let to = fx.store.room(to_room.id).await.unwrap().unwrap();
    assert_eq!(from.occupied, 1);
    assert_eq!(to.occupied, 0);
}

#[tokio::test]
async fn completion_reserves_destination_then_releases_source() {
    let fx = common::store_with_room(2);
    let (to_room, to_beds) = common::add_room(&fx, "A-102", 2);
    let registration = common::register_confirmed(&fx.store, fx.room.id, Some(fx.beds[0].id)).await;

    let transfer = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: to_room.id,
            to_bed_id: Some(to_beds[0].id),
            reason: None,
        })
        .await
        .unwrap();
    fx.store.decide_transfer(transfer.id, true).await.unwrap();
    let completed = fx.store.complete_transfer(transfer.id).await.unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);
    assert!(completed.completed_at.is_some());

    let from = fx.store.room(fx.room.id).await.unwrap().unwrap();
    let to = fx.store.room(to_room.id).await.unwrap().unwrap();
    assert_eq!(from.occupied, 0);
    assert_eq!(to.occupied, 1);
    assert_eq!(
        fx.store.bed(fx.beds[0].id).await.unwrap().unwrap().status,
        BedStatus::Available
    );
    assert_eq!(
        fx.store.bed(to_beds[0].id).await.unwrap().unwrap().status,
        BedStatus::Occupied
    );

    // The registration now points at the new allocation.
    let moved = fx.store.registration(registration.id).await.unwrap().unwrap();
    assert_eq!(moved.room_id, to_room.id);
    assert_eq!(moved.bed_id, Some(to_beds[0].id));
}

#[tokio::test]
async fn full_destination_leaves_source_untouched() {
    let fx = common::store_with_room(2);
    let (to_room, _) = common::add_room(&fx, "A-102", 1);
    common::register(&fx.store, to_room.id, None).await;
    let registration = common::register_confirmed(&fx.store, fx.room.id, None).await;

    let transfer = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: to_room.id,
            to_bed_id: None,
            reason: None,
        })
        .await
        .unwrap();
    fx.store.decide_transfer(transfer.id, true).await.unwrap();

    let err = fx.store.complete_transfer(transfer.id).await.unwrap_err();
    assert!(matches!(err, AppError::NoCapacity));

    // Source allocation and request both survive.
    let from = fx.store.room(fx.room.id).await.unwrap().unwrap();
    assert_eq!(from.occupied, 1);
    let transfer = fx.store.transfer_request(transfer.id).await.unwrap().unwrap();
    assert_eq!(transfer.status, TransferStatus::Approved);
    let unchanged = fx.store.registration(registration.id).await.unwrap().unwrap();
    assert_eq!(unchanged.room_id, fx.room.id);
}

#[tokio::test]
async fn completion_requires_prior_approval() {
    let fx = common::store_with_room(2);
    let (to_room, _) = common::add_room(&fx, "A-102", 2);
    let registration = common::register_confirmed(&fx.store, fx.room.id, None).await;

    let transfer = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: to_room.id,
            to_bed_id: None,
            reason: None,
        })
        .await
        .unwrap();

    let err = fx.store.complete_transfer(transfer.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn rejected_transfer_cannot_be_completed() {
    let fx = common::store_with_room(2);
    let (to_room, _) = common::add_room(&fx, "A-102", 2);
    let registration = common::register_confirmed(&fx.store, fx.room.id, None).await;

    let transfer = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: to_room.id,
            to_bed_id: None,
            reason: None,
        })
        .await
        .unwrap();
    fx.store.decide_transfer(transfer.id, false).await.unwrap();

    let err = fx.store.complete_transfer(transfer.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn bed_swap_within_a_full_room_succeeds() {
    let fx = common::store_with_room(2);
    let registration = common::register_confirmed(&fx.store, fx.room.id, Some(fx.beds[0].id)).await;
    common::register(&fx.store, fx.room.id, None).await;

    let transfer = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: fx.room.id,
            to_bed_id: Some(fx.beds[1].id),
            reason: None,
        })
        .await
        .unwrap();
    fx.store.decide_transfer(transfer.id, true).await.unwrap();
    fx.store.complete_transfer(transfer.id).await.unwrap();

    let room = fx.store.room(fx.room.id).await.unwrap().unwrap();
    assert_eq!(room.occupied, 2);
    assert_eq!(
        fx.store.bed(fx.beds[0].id).await.unwrap().unwrap().status,
        BedStatus::Available
    );
    assert_eq!(
        fx.store.bed(fx.beds[1].id).await.unwrap().unwrap().status,
        BedStatus::Occupied
    );
    let snapshot = fx.store.occupancy_snapshot(fx.room.id).await.unwrap();
    assert!(snapshot.is_consistent());
}

#[tokio::test]
async fn pending_registrations_cannot_request_transfers() {
    let fx = common::store_with_room(2);
    let (to_room, _) = common::add_room(&fx, "A-102", 2);
    let registration = common::register(&fx.store, fx.room.id, None).await;

    let err = fx
        .store
        .create_transfer(NewTransfer {
            registration_id: registration.id,
            to_room_id: to_room.id,
            to_bed_id: None,
            reason: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
