#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal_macros::dec;
use uuid::Uuid;

use dorm_ledger::gateway::{self, GatewayConfig, SECURE_HASH_FIELD};
use dorm_ledger::models::{
    Bed, Payment, PaymentMethod, PaymentTarget, Registration, Room, Semester, Term,
};
use dorm_ledger::store::{CallbackApply, CallbackOutcome, DormStore, MemStore, NewRegistration};

pub fn semester() -> Semester {
    Semester::new(Term::First, 2025)
}

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        endpoint: "https://gw.example/paygate".into(),
        merchant_code: "DORMTEST1".into(),
        secret: "topsecret".into(),
        return_url: "https://dorm.example/payments/return".into(),
        locale: "vn".into(),
        currency: "VND".into(),
        currency_decimals: 0,
        order_lifetime_minutes: 15,
    }
}

pub struct Fixture {
    pub store: Arc<MemStore>,
    pub room: Room,
    pub beds: Vec<Bed>,
}

/// A store seeded with one room of the given capacity, one bed per slot.
pub fn store_with_room(capacity: i32) -> Fixture {
    let store = Arc::new(MemStore::new());
    let room = Room::new(Uuid::new_v4(), "A-101", capacity, dec!(1_500_000));
    store.insert_room(room.clone());
    let beds: Vec<Bed> = (0..capacity)
        .map(|i| {
            let bed = Bed::new(room.id, format!("B{}", i + 1));
            store.insert_bed(bed.clone());
            bed
        })
        .collect();
    Fixture { store, room, beds }
}

/// Adds another room to an existing fixture.
pub fn add_room(fixture: &Fixture, name: &str, capacity: i32) -> (Room, Vec<Bed>) {
    let room = Room::new(fixture.room.dormitory_id, name, capacity, dec!(1_500_000));
    fixture.store.insert_room(room.clone());
    let beds: Vec<Bed> = (0..capacity)
        .map(|i| {
            let bed = Bed::new(room.id, format!("B{}", i + 1));
            fixture.store.insert_bed(bed.clone());
            bed
        })
        .collect();
    (room, beds)
}

pub async fn register(
    store: &MemStore,
    room_id: Uuid,
    bed_id: Option<Uuid>,
) -> Registration {
    store
        .create_registration(NewRegistration {
            student_id: Uuid::new_v4(),
            room_id,
            bed_id,
            semester: semester(),
            note: None,
        })
        .await
        .expect("registration should succeed")
}

pub async fn register_confirmed(
    store: &MemStore,
    room_id: Uuid,
    bed_id: Option<Uuid>,
) -> Registration {
    let registration = register(store, room_id, bed_id).await;
    store
        .confirm_registration(registration.id)
        .await
        .expect("confirmation should succeed")
}

/// Registers, confirms and settles through a gateway callback, returning
/// the registration in PAID status.
pub async fn register_paid(
    store: &MemStore,
    room_id: Uuid,
    bed_id: Option<Uuid>,
) -> Registration {
    let registration = register_confirmed(store, room_id, bed_id).await;
    let payment = store
        .create_payment(Payment::new(
            format!("ORD-{}", Uuid::new_v4().simple()),
            PaymentTarget::Registration(registration.id),
            dec!(1_500_000),
            PaymentMethod::Gateway,
        ))
        .await
        .expect("payment creation should succeed");
    store
        .mark_payment_pending(payment.id)
        .await
        .expect("payment should reach the gateway");
    let outcome = store
        .apply_gateway_callback(CallbackApply {
            order_ref: payment.order_ref,
            amount: dec!(1_500_000),
            txn_id: "GW-1".to_string(),
            gateway_success: true,
        })
        .await
        .expect("callback should apply");
    assert!(matches!(outcome, CallbackOutcome::Applied(_)));
    store
        .registration(registration.id)
        .await
        .unwrap()
        .expect("registration should exist")
}

/// Builds a correctly signed IPN parameter map for the given order.
pub fn signed_ipn(
    config: &GatewayConfig,
    order_ref: &str,
    amount_minor: &str,
    response_code: &str,
) -> HashMap<String, String> {
    let mut fields = BTreeMap::new();
    fields.insert("merchant_code".to_string(), config.merchant_code.clone());
    fields.insert("order_ref".to_string(), order_ref.to_string());
    fields.insert("amount".to_string(), amount_minor.to_string());
    fields.insert("txn_id".to_string(), "GW-778899".to_string());
    fields.insert("response_code".to_string(), response_code.to_string());

    let hash = gateway::sign(&config.secret, &gateway::canonical_query(&fields))
        .expect("signing should succeed");
    let mut params: HashMap<String, String> = fields.into_iter().collect();
    params.insert(SECURE_HASH_FIELD.to_string(), hash);
    params
}
