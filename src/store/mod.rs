//! Transactional repository boundary.
//!
//! Every method on [`DormStore`] is an atomic unit: implementations must
//! execute it under a serialization point covering the rows it touches
//! (row locks in Postgres, the state mutex in memory). The orchestration
//! layer composes these units but never reaches around them to mutate
//! occupancy or payment state directly.

mod memory;
mod postgres;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use memory::MemStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{
    Bed, MeterReading, Payment, PaymentStatus, Registration, RegistrationStatus, Room, Semester,
    TransferRequest, UtilityBill, UtilityRate,
};

/// Input for creating a registration. The slot reserve and the insert are
/// one atomic unit: if the reserve fails, nothing is persisted. A slot the
/// same student already holds on the same room/bed (a contract extension
/// into another semester) is shared rather than reserved a second time.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub student_id: Uuid,
    pub room_id: Uuid,
    pub bed_id: Option<Uuid>,
    pub semester: Semester,
    pub note: Option<String>,
}

/// Input for creating a transfer request. The source slot is taken from
/// the registration being transferred.
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub registration_id: Uuid,
    pub to_room_id: Uuid,
    pub to_bed_id: Option<Uuid>,
    pub reason: Option<String>,
}

/// A verified gateway callback, reduced to what reconciliation applies.
#[derive(Debug, Clone)]
pub struct CallbackApply {
    pub order_ref: String,
    pub amount: Decimal,
    pub txn_id: String,
    pub gateway_success: bool,
}

/// Outcome of applying a callback. Only `Applied` mutated anything.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The payment moved to SUCCESS or FAILED and, on success, the
    /// dependent registration or bill advanced with it.
    Applied(Payment),
    /// The payment was already terminal; acknowledged without mutation.
    AlreadyFinal(Payment),
    /// No payment with this order reference.
    NotFound,
    /// Callback amount differs from the pending payment; nothing mutated,
    /// the payment stays PENDING_GATEWAY.
    AmountMismatch { expected: Decimal, received: Decimal },
    /// A state-contract violation (payment never handed to the gateway, or
    /// the dependent entity is not in a payable state). Nothing mutated.
    Contract(String),
}

/// The reconciliation decision for a locked payment row. Shared by both
/// store backends so the policy cannot drift between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackDecision {
    AlreadyFinal,
    NeverIssued,
    AmountMismatch,
    ApplySuccess,
    ApplyFailure,
}

pub(crate) fn decide_callback(
    status: PaymentStatus,
    expected: Decimal,
    received: Decimal,
    gateway_success: bool,
) -> CallbackDecision {
    if status.is_callback_terminal() {
        return CallbackDecision::AlreadyFinal;
    }
    if status == PaymentStatus::Created {
        return CallbackDecision::NeverIssued;
    }
    if expected != received {
        return CallbackDecision::AmountMismatch;
    }
    if gateway_success {
        CallbackDecision::ApplySuccess
    } else {
        CallbackDecision::ApplyFailure
    }
}

#[async_trait]
pub trait DormStore: Send + Sync {
    // --- inventory ---

    async fn room(&self, id: Uuid) -> Result<Option<Room>>;
    async fn bed(&self, id: Uuid) -> Result<Option<Bed>>;
    async fn beds_in_room(&self, room_id: Uuid) -> Result<Vec<Bed>>;
    /// Consistent view of a room's counter against its beds and
    /// registrations, read as one atomic unit.
    async fn occupancy_snapshot(&self, room_id: Uuid) -> Result<OccupancySnapshot>;

    // --- registrations ---

    async fn create_registration(&self, new: NewRegistration) -> Result<Registration>;
    async fn registration(&self, id: Uuid) -> Result<Option<Registration>>;
    /// The registration currently holding a slot for this student and
    /// semester, if any.
    async fn active_registration_for(
        &self,
        student_id: Uuid,
        semester: Semester,
    ) -> Result<Option<Registration>>;
    async fn confirm_registration(&self, id: Uuid) -> Result<Registration>;
    /// Moves a registration to CANCELLED or REJECTED and releases its slot
    /// in the same atomic unit. Loses cleanly against a racing payment
    /// callback: if the registration went PAID first this returns a
    /// transition error and mutates nothing.
    async fn close_registration(
        &self,
        id: Uuid,
        to: RegistrationStatus,
        note: Option<String>,
    ) -> Result<Registration>;

    // --- transfers ---

    async fn create_transfer(&self, new: NewTransfer) -> Result<TransferRequest>;
    async fn transfer_request(&self, id: Uuid) -> Result<Option<TransferRequest>>;
    async fn decide_transfer(&self, id: Uuid, approve: bool) -> Result<TransferRequest>;
    /// Runs the ledger transfer (reserve destination, release source),
    /// repoints the registration and marks the request COMPLETED, all
    /// atomically. A failed destination reserve leaves the source
    /// allocation untouched.
    async fn complete_transfer(&self, id: Uuid) -> Result<TransferRequest>;

    // --- utilities ---

    async fn insert_rate(&self, rate: UtilityRate) -> Result<UtilityRate>;
    async fn rate_effective_at(&self, at: DateTime<Utc>) -> Result<Option<UtilityRate>>;
    async fn record_reading(&self, reading: MeterReading) -> Result<MeterReading>;
    async fn reading(&self, room_id: Uuid, month: i32, year: i32) -> Result<Option<MeterReading>>;
    async fn create_bill(&self, bill: UtilityBill) -> Result<UtilityBill>;
    async fn bill(&self, id: Uuid) -> Result<Option<UtilityBill>>;
    /// Flips pending bills past their due date to OVERDUE; returns how
    /// many changed.
    async fn mark_bills_overdue(&self, as_of: NaiveDate) -> Result<u64>;
    async fn cancel_bill(&self, id: Uuid) -> Result<UtilityBill>;

    // --- payments ---

    async fn create_payment(&self, payment: Payment) -> Result<Payment>;
    async fn payment(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn payment_by_order_ref(&self, order_ref: &str) -> Result<Option<Payment>>;
    async fn mark_payment_pending(&self, id: Uuid) -> Result<Payment>;
    /// Applies a verified callback exactly once, serialized on the
    /// order-reference row. The terminal-status check and the eventual
    /// status write happen inside the same atomic unit, so two
    /// simultaneous deliveries cannot both observe PENDING_GATEWAY.
    async fn apply_gateway_callback(&self, apply: CallbackApply) -> Result<CallbackOutcome>;
    async fn refund_payment(&self, id: Uuid, amount: Decimal) -> Result<Payment>;
}

/// Occupancy snapshot used by invariant checks in tests and audits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancySnapshot {
    pub room_id: Uuid,
    pub capacity: i32,
    pub occupied: i32,
    pub occupied_beds: i32,
    pub held_slots: i32,
}

impl OccupancySnapshot {
    /// `0 <= occupied <= capacity` and the counter agrees with the slots
    /// held through the room's registrations. A contract extension shares
    /// its predecessor's slot, so slots are counted per distinct
    /// `(student, bed)` allocation, not per registration row.
    pub fn is_consistent(&self) -> bool {
        self.occupied >= 0
            && self.occupied <= self.capacity
            && self.occupied == self.held_slots
            && self.occupied_beds <= self.occupied
    }
}

pub(crate) fn snapshot_from_parts(
    room: &Room,
    beds: &[Bed],
    registrations: impl Iterator<Item = Registration>,
) -> OccupancySnapshot {
    use crate::models::BedStatus;

    let occupied_beds = beds.iter().filter(|b| b.status == BedStatus::Occupied).count() as i32;
    let held: HashSet<(Uuid, Option<Uuid>)> = registrations
        .filter(|r| r.room_id == room.id && r.status.holds_slot())
        .map(|r| (r.student_id, r.bed_id))
        .collect();

    OccupancySnapshot {
        room_id: room.id,
        capacity: room.capacity,
        occupied: room.occupied,
        occupied_beds,
        held_slots: held.len() as i32,
    }
}

/// Convenience used by handlers receiving raw callback parameter maps.
pub type CallbackParams = HashMap<String, String>;
