mod common;

use std::sync::Arc;

use rust_decimal_macros::dec;

use dorm_ledger::error::AppError;
use dorm_ledger::gateway::{IpnResponseCode, SECURE_HASH_FIELD};
use dorm_ledger::models::{
    PaymentMethod, PaymentStatus, PaymentTarget, Payment, RegistrationStatus,
};
use dorm_ledger::notify::LogNotifier;
use dorm_ledger::services::ReconciliationService;
use dorm_ledger::store::{DormStore, MemStore};

async fn pending_payment_for_confirmed_registration(
    fx: &common::Fixture,
) -> (Payment, uuid::Uuid) {
    let registration = common::register_confirmed(&fx.store, fx.room.id, None).await;
    let payment = fx
        .store
        .create_payment(Payment::new(
            "ORD-42".into(),
            PaymentTarget::Registration(registration.id),
            dec!(1_500_000),
            PaymentMethod::Gateway,
        ))
        .await
        .unwrap();
    let payment = fx.store.mark_payment_pending(payment.id).await.unwrap();
    (payment, registration.id)
}

fn reconciliation(store: Arc<MemStore>) -> ReconciliationService {
    ReconciliationService::new(store, common::gateway_config(), Arc::new(LogNotifier))
}

#[tokio::test]
async fn successful_callback_settles_payment_and_registration() {
    let fx = common::store_with_room(2);
    let (payment, registration_id) = pending_payment_for_confirmed_registration(&fx).await;
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Ok);

    let payment = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.gateway_txn_id.as_deref(), Some("GW-778899"));
    let registration = fx.store.registration(registration_id).await.unwrap().unwrap();
    assert_eq!(registration.status, RegistrationStatus::Paid);
    assert!(registration.paid_at.is_some());
}

#[tokio::test]
async fn duplicate_delivery_is_acknowledged_without_remutation() {
    let fx = common::store_with_room(2);
    let (payment, _) = pending_payment_for_confirmed_registration(&fx).await;
    let service = reconciliation(fx.store.clone());
    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");

    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Ok);
    let settled = fx.store.payment(payment.id).await.unwrap().unwrap();

    assert_eq!(
        service.handle_ipn(&params).await,
        IpnResponseCode::AlreadyConfirmed
    );
    let after = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(after.status, settled.status);
    assert_eq!(after.completed_at, settled.completed_at);
}

#[tokio::test]
async fn tampered_signature_is_rejected_without_touching_state() {
    let fx = common::store_with_room(2);
    let (payment, registration_id) = pending_payment_for_confirmed_registration(&fx).await;
    let service = reconciliation(fx.store.clone());

    let mut params =
        common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    params.insert("amount".to_string(), "1".to_string());
    assert_eq!(
        service.handle_ipn(&params).await,
        IpnResponseCode::InvalidSignature
    );

    let mut params =
        common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    params.remove(SECURE_HASH_FIELD);
    assert_eq!(
        service.handle_ipn(&params).await,
        IpnResponseCode::InvalidSignature
    );

    let payment = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::PendingGateway);
    let registration = fx.store.registration(registration_id).await.unwrap().unwrap();
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn unknown_order_reference_returns_01() {
    let fx = common::store_with_room(2);
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), "ORD-GHOST", "1500000", "00");
    assert_eq!(
        service.handle_ipn(&params).await,
        IpnResponseCode::OrderNotFound
    );
}

#[tokio::test]
async fn amount_mismatch_returns_04_and_payment_stays_pending() {
    let fx = common::store_with_room(2);
    let (payment, _) = pending_payment_for_confirmed_registration(&fx).await;
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "999", "00");
    assert_eq!(
        service.handle_ipn(&params).await,
        IpnResponseCode::AmountMismatch
    );

    // Still settleable by a later correct delivery.
    let payment = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::PendingGateway);
    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Ok);
}

#[tokio::test]
async fn gateway_failure_marks_payment_failed_only() {
    let fx = common::store_with_room(2);
    let (payment, registration_id) = pending_payment_for_confirmed_registration(&fx).await;
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "24");
    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Ok);

    let payment = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    let registration = fx.store.registration(registration_id).await.unwrap().unwrap();
    assert_eq!(registration.status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn callback_for_unissued_payment_is_a_contract_violation() {
    let fx = common::store_with_room(2);
    let registration = common::register_confirmed(&fx.store, fx.room.id, None).await;
    let payment = fx
        .store
        .create_payment(Payment::new(
            "ORD-42".into(),
            PaymentTarget::Registration(registration.id),
            dec!(1_500_000),
            PaymentMethod::Gateway,
        ))
        .await
        .unwrap();
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), "ORD-42", "1500000", "00");
    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Failure);
    let payment = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Created);
}

#[tokio::test]
async fn cancelled_registration_blocks_settlement() {
    let fx = common::store_with_room(2);
    let (payment, registration_id) = pending_payment_for_confirmed_registration(&fx).await;
    fx.store
        .close_registration(registration_id, RegistrationStatus::Cancelled, None)
        .await
        .unwrap();
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Failure);

    // Nothing moved: the payment is still pending, the registration stays
    // cancelled.
    let payment = fx.store.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::PendingGateway);
    let registration = fx.store.registration(registration_id).await.unwrap().unwrap();
    assert_eq!(registration.status, RegistrationStatus::Cancelled);
}

#[tokio::test]
async fn refund_requires_success_and_caps_at_the_original_amount() {
    let fx = common::store_with_room(2);
    let (payment, _) = pending_payment_for_confirmed_registration(&fx).await;

    let err = fx
        .store
        .refund_payment(payment.id, dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotRefundable(_)));

    let service = reconciliation(fx.store.clone());
    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    assert_eq!(service.handle_ipn(&params).await, IpnResponseCode::Ok);

    let err = fx
        .store
        .refund_payment(payment.id, dec!(2_000_000))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AmountExceedsOriginal { .. }));

    let refunded = fx
        .store
        .refund_payment(payment.id, dec!(500_000))
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refund_amount, Some(dec!(500_000)));

    // A refunded payment is terminal for both refunds and callbacks.
    assert!(fx.store.refund_payment(payment.id, dec!(1)).await.is_err());
    assert_eq!(
        service.handle_ipn(&params).await,
        IpnResponseCode::AlreadyConfirmed
    );
}

#[tokio::test]
async fn return_leg_verifies_but_never_mutates() {
    let fx = common::store_with_room(2);
    let (payment, _) = pending_payment_for_confirmed_registration(&fx).await;
    let service = reconciliation(fx.store.clone());

    let params = common::signed_ipn(&common::gateway_config(), &payment.order_ref, "1500000", "00");
    let seen = service.handle_return(&params).await.unwrap();
    assert_eq!(seen.id, payment.id);
    assert_eq!(seen.status, PaymentStatus::PendingGateway);

    let mut tampered = params.clone();
    tampered.insert("response_code".to_string(), "99".to_string());
    let err = service.handle_return(&tampered).await.unwrap_err();
    assert!(matches!(err, AppError::BadSignature));
}
