mod common;

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;

use dorm_ledger::error::AppError;
use dorm_ledger::models::{BillStatus, MeterReading, Principal, UtilityRate};
use dorm_ledger::notify::LogNotifier;
use dorm_ledger::services::BillingService;
use dorm_ledger::store::DormStore;

fn billing(store: Arc<dorm_ledger::store::MemStore>) -> BillingService {
    BillingService::new(store, Arc::new(LogNotifier), 0)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn seed_rate(service: &BillingService) -> UtilityRate {
    service
        .set_rate(
            &Principal::admin(),
            dec!(3500),
            dec!(15000),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn bill_uses_the_delta_between_consecutive_readings() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();
    let rate = seed_rate(&service).await;

    service
        .record_reading(&admin, fx.room.id, 2, 2025, dec!(100), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();

    let bill = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap();
    assert_eq!(bill.electricity_usage, dec!(80));
    assert_eq!(bill.water_usage, dec!(20));
    assert_eq!(bill.electricity_amount, dec!(280000));
    assert_eq!(bill.water_amount, dec!(300000));
    assert_eq!(bill.total_amount, dec!(580000));
    assert_eq!(bill.rate_id, rate.id);
    assert_eq!(bill.status, BillStatus::Pending);
}

#[tokio::test]
async fn missing_previous_reading_blocks_the_bill() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();
    seed_rate(&service).await;

    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();

    let err = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingReading { month: 2, year: 2025 }));
}

#[tokio::test]
async fn no_applicable_rate_blocks_the_bill() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();

    service
        .record_reading(&admin, fx.room.id, 2, 2025, dec!(100), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();
    // The only rate starts after the billing period.
    service
        .set_rate(
            &admin,
            dec!(3500),
            dec!(15000),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        )
        .await
        .unwrap();

    let err = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NoActiveRate(_)));
}

#[tokio::test]
async fn latest_rate_at_or_before_period_start_wins() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();

    seed_rate(&service).await;
    let newer = service
        .set_rate(
            &admin,
            dec!(4000),
            dec!(16000),
            Utc.with_ymd_and_hms(2025, 2, 15, 0, 0, 0).unwrap(),
        )
        .await
        .unwrap();

    service
        .record_reading(&admin, fx.room.id, 2, 2025, dec!(100), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();

    let bill = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap();
    assert_eq!(bill.rate_id, newer.id);
    assert_eq!(bill.electricity_amount, dec!(320000));
}

#[tokio::test]
async fn negative_delta_is_rejected() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();
    seed_rate(&service).await;

    service
        .record_reading(&admin, fx.room.id, 2, 2025, dec!(200), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();

    let err = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NegativeUsage { meter: "electricity", .. }));
}

#[tokio::test]
async fn duplicate_reading_for_a_period_is_rejected() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();

    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();
    let err = service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(181), dec!(71))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateReading));
}

#[tokio::test]
async fn january_bill_reaches_back_to_december() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();
    service
        .set_rate(
            &admin,
            dec!(3500),
            dec!(15000),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .await
        .unwrap();

    service
        .record_reading(&admin, fx.room.id, 12, 2024, dec!(100), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 1, 2025, dec!(110), dec!(55))
        .await
        .unwrap();

    let bill = service
        .compute_bill(&admin, fx.room.id, 1, 2025, date(2025, 2, 15))
        .await
        .unwrap();
    assert_eq!(bill.electricity_usage, dec!(10));
    assert_eq!(bill.water_usage, dec!(5));
}

#[tokio::test]
async fn overdue_sweep_flips_only_pending_bills_past_due() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();
    seed_rate(&service).await;

    service
        .record_reading(&admin, fx.room.id, 2, 2025, dec!(100), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();
    let bill = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap();

    assert_eq!(service.mark_overdue(&admin, date(2025, 4, 15)).await.unwrap(), 0);
    assert_eq!(service.mark_overdue(&admin, date(2025, 4, 16)).await.unwrap(), 1);
    let bill = fx.store.bill(bill.id).await.unwrap().unwrap();
    assert_eq!(bill.status, BillStatus::Overdue);

    // Idempotent: a second sweep finds nothing pending.
    assert_eq!(service.mark_overdue(&admin, date(2025, 4, 16)).await.unwrap(), 0);
}

#[tokio::test]
async fn billing_operations_require_admin() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let student = Principal::student(uuid::Uuid::new_v4());

    let err = service
        .record_reading(&student, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    let err = service
        .set_rate(&student, dec!(3500), dec!(15000), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn cancelled_bills_are_terminal() {
    let fx = common::store_with_room(2);
    let service = billing(fx.store.clone());
    let admin = Principal::admin();
    seed_rate(&service).await;

    service
        .record_reading(&admin, fx.room.id, 2, 2025, dec!(100), dec!(50))
        .await
        .unwrap();
    service
        .record_reading(&admin, fx.room.id, 3, 2025, dec!(180), dec!(70))
        .await
        .unwrap();
    let bill = service
        .compute_bill(&admin, fx.room.id, 3, 2025, date(2025, 4, 15))
        .await
        .unwrap();

    let cancelled = service.cancel_bill(&admin, bill.id).await.unwrap();
    assert_eq!(cancelled.status, BillStatus::Cancelled);
    let err = service.cancel_bill(&admin, bill.id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

// Readings recorded through the service go through the same uniqueness
// path as direct store writes.
#[tokio::test]
async fn store_level_duplicate_reading_guard() {
    let fx = common::store_with_room(2);
    let first = MeterReading::new(fx.room.id, 5, 2025, dec!(10), dec!(5));
    fx.store.record_reading(first).await.unwrap();
    let dup = MeterReading::new(fx.room.id, 5, 2025, dec!(11), dec!(6));
    let err = fx.store.record_reading(dup).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateReading));
}
