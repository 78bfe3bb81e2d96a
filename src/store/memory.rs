//! In-memory store backend.
//!
//! One mutex over the whole state makes every trait method a critical
//! section, which linearizes concurrent callers exactly the way row locks
//! do in Postgres. Used by the test suite and for running the core without
//! a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::ledger;
use crate::models::{
    ensure_bill_transition, ensure_payment_transition, ensure_registration_transition,
    ensure_transfer_transition, Bed, BedStatus, BillStatus, MeterReading, Payment, PaymentStatus,
    Registration, RegistrationStatus, Room, Semester, TransferRequest, TransferStatus,
    UtilityBill, UtilityRate,
};
use crate::store::{
    decide_callback, snapshot_from_parts, CallbackApply, CallbackDecision, CallbackOutcome,
    DormStore, NewRegistration, NewTransfer, OccupancySnapshot,
};

#[derive(Debug, Default)]
struct MemState {
    rooms: HashMap<Uuid, Room>,
    beds: HashMap<Uuid, Bed>,
    registrations: HashMap<Uuid, Registration>,
    transfers: HashMap<Uuid, TransferRequest>,
    rates: Vec<UtilityRate>,
    readings: HashMap<(Uuid, i32, i32), MeterReading>,
    bills: HashMap<Uuid, UtilityBill>,
    payments: HashMap<Uuid, Payment>,
    payments_by_ref: HashMap<String, Uuid>,
}

#[derive(Debug, Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a room; test fixture, not part of the store contract.
    pub fn insert_room(&self, room: Room) {
        self.state.lock().rooms.insert(room.id, room);
    }

    /// Seeds a bed; test fixture, not part of the store contract.
    pub fn insert_bed(&self, bed: Bed) {
        self.state.lock().beds.insert(bed.id, bed);
    }
}

fn release_slot(state: &mut MemState, room_id: Uuid, bed_id: Option<Uuid>) {
    if let Some(room) = state.rooms.get_mut(&room_id) {
        ledger::apply_release(room, bed_id.and_then(|id| state.beds.get_mut(&id)));
    }
}

/// Whether another active registration of the same student holds the same
/// slot, as a contract extension does across semesters.
fn sibling_holds_slot(
    state: &MemState,
    registration_id: Uuid,
    student_id: Uuid,
    room_id: Uuid,
    bed_id: Option<Uuid>,
) -> bool {
    state.registrations.values().any(|r| {
        r.id != registration_id
            && r.student_id == student_id
            && r.room_id == room_id
            && r.bed_id == bed_id
            && r.status.holds_slot()
    })
}

#[async_trait]
impl DormStore for MemStore {
    async fn room(&self, id: Uuid) -> Result<Option<Room>> {
        Ok(self.state.lock().rooms.get(&id).cloned())
    }

    async fn bed(&self, id: Uuid) -> Result<Option<Bed>> {
        Ok(self.state.lock().beds.get(&id).cloned())
    }

    async fn beds_in_room(&self, room_id: Uuid) -> Result<Vec<Bed>> {
        Ok(self
            .state
            .lock()
            .beds
            .values()
            .filter(|b| b.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn occupancy_snapshot(&self, room_id: Uuid) -> Result<OccupancySnapshot> {
        let state = self.state.lock();
        let room = state
            .rooms
            .get(&room_id)
            .ok_or_else(|| AppError::NotFound("room".into()))?;
        let beds: Vec<Bed> = state
            .beds
            .values()
            .filter(|b| b.room_id == room_id)
            .cloned()
            .collect();
        Ok(snapshot_from_parts(
            room,
            &beds,
            state.registrations.values().cloned(),
        ))
    }

    async fn create_registration(&self, new: NewRegistration) -> Result<Registration> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let room = state
            .rooms
            .get(&new.room_id)
            .ok_or_else(|| AppError::NotFound("room".into()))?;
        let bed = match new.bed_id {
            Some(id) => Some(
                state
                    .beds
                    .get(&id)
                    .ok_or_else(|| AppError::NotFound("bed".into()))?,
            ),
            None => None,
        };

        let duplicate = state.registrations.values().any(|r| {
            r.student_id == new.student_id
                && r.semester == new.semester
                && r.status.holds_slot()
        });
        if duplicate {
            return Err(AppError::AlreadyRegistered);
        }

        // A registration sharing the student's own current slot (an
        // extension into another semester) reserves nothing; the ledger
        // already counts that slot.
        let shares_own_slot =
            sibling_holds_slot(state, Uuid::nil(), new.student_id, new.room_id, new.bed_id);
        if !shares_own_slot {
            ledger::check_reserve(room, bed)?;

            let room = state
                .rooms
                .get_mut(&new.room_id)
                .ok_or_else(|| AppError::NotFound("room".into()))?;
            ledger::apply_reserve(room, new.bed_id.and_then(|id| state.beds.get_mut(&id)));
        }

        let mut registration =
            Registration::new(new.student_id, new.room_id, new.bed_id, new.semester);
        registration.note = new.note;
        state
            .registrations
            .insert(registration.id, registration.clone());
        Ok(registration)
    }

    async fn registration(&self, id: Uuid) -> Result<Option<Registration>> {
        Ok(self.state.lock().registrations.get(&id).cloned())
    }

    async fn active_registration_for(
        &self,
        student_id: Uuid,
        semester: Semester,
    ) -> Result<Option<Registration>> {
        Ok(self
            .state
            .lock()
            .registrations
            .values()
            .find(|r| {
                r.student_id == student_id && r.semester == semester && r.status.holds_slot()
            })
            .cloned())
    }

    async fn confirm_registration(&self, id: Uuid) -> Result<Registration> {
        let mut state = self.state.lock();
        let registration = state
            .registrations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        ensure_registration_transition(registration.status, RegistrationStatus::Confirmed)?;
        registration.status = RegistrationStatus::Confirmed;
        registration.confirmed_at = Some(Utc::now());
        Ok(registration.clone())
    }

    async fn close_registration(
        &self,
        id: Uuid,
        to: RegistrationStatus,
        note: Option<String>,
    ) -> Result<Registration> {
        if !matches!(
            to,
            RegistrationStatus::Cancelled | RegistrationStatus::Rejected
        ) {
            return Err(AppError::Validation(format!(
                "close target must be CANCELLED or REJECTED, not {to:?}"
            )));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let registration = state
            .registrations
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("registration".into()))?;

        ensure_registration_transition(registration.status, to)?;
        let releases = registration.status.releases_slot_on(to);
        registration.status = to;
        registration.closed_at = Some(Utc::now());
        if note.is_some() {
            registration.note = note;
        }
        let result = registration.clone();

        // While a sharing sibling (an extension or its predecessor) still
        // holds the slot, closing this registration must not free it.
        if releases
            && !sibling_holds_slot(state, id, result.student_id, result.room_id, result.bed_id)
        {
            release_slot(state, result.room_id, result.bed_id);
        }
        Ok(result)
    }

    async fn create_transfer(&self, new: NewTransfer) -> Result<TransferRequest> {
        let mut state = self.state.lock();

        let registration = state
            .registrations
            .get(&new.registration_id)
            .ok_or_else(|| AppError::NotFound("registration".into()))?
            .clone();
        if !matches!(
            registration.status,
            RegistrationStatus::Confirmed | RegistrationStatus::Paid
        ) {
            return Err(AppError::Validation(format!(
                "only a confirmed or paid registration can be transferred, found {:?}",
                registration.status
            )));
        }

        if !state.rooms.contains_key(&new.to_room_id) {
            return Err(AppError::NotFound("destination room".into()));
        }
        if let Some(bed_id) = new.to_bed_id {
            let bed = state
                .beds
                .get(&bed_id)
                .ok_or_else(|| AppError::NotFound("destination bed".into()))?;
            if bed.room_id != new.to_room_id {
                return Err(AppError::Validation(
                    "destination bed does not belong to the destination room".into(),
                ));
            }
        }
        if new.to_room_id == registration.room_id && new.to_bed_id == registration.bed_id {
            return Err(AppError::Validation(
                "transfer destination equals the current allocation".into(),
            ));
        }

        let transfer = TransferRequest::new(
            registration.student_id,
            registration.id,
            registration.room_id,
            registration.bed_id,
            new.to_room_id,
            new.to_bed_id,
            registration.semester,
            new.reason,
        );
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn transfer_request(&self, id: Uuid) -> Result<Option<TransferRequest>> {
        Ok(self.state.lock().transfers.get(&id).cloned())
    }

    async fn decide_transfer(&self, id: Uuid, approve: bool) -> Result<TransferRequest> {
        let mut state = self.state.lock();
        let transfer = state
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("transfer request".into()))?;
        let to = if approve {
            TransferStatus::Approved
        } else {
            TransferStatus::Rejected
        };
        ensure_transfer_transition(transfer.status, to)?;
        transfer.status = to;
        transfer.decided_at = Some(Utc::now());
        Ok(transfer.clone())
    }

    async fn complete_transfer(&self, id: Uuid) -> Result<TransferRequest> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let transfer = state
            .transfers
            .get(&id)
            .ok_or_else(|| AppError::NotFound("transfer request".into()))?
            .clone();
        ensure_transfer_transition(transfer.status, TransferStatus::Completed)?;

        let registration = state
            .registrations
            .get(&transfer.registration_id)
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        if !registration.status.holds_slot() {
            return Err(AppError::Validation(
                "the underlying registration no longer holds a slot".into(),
            ));
        }
        let sibling_holds_source = sibling_holds_slot(
            state,
            registration.id,
            registration.student_id,
            transfer.from_room_id,
            transfer.from_bed_id,
        );

        let same_room = transfer.to_room_id == transfer.from_room_id;
        if same_room {
            // A bed move within one room: occupancy is unchanged, only the
            // bed statuses flip.
            if let Some(bed_id) = transfer.to_bed_id {
                let bed = state
                    .beds
                    .get(&bed_id)
                    .ok_or_else(|| AppError::NotFound("destination bed".into()))?;
                if !bed.is_available() {
                    return Err(AppError::BedTaken);
                }
            }
            if let Some(bed) = transfer.to_bed_id.and_then(|id| state.beds.get_mut(&id)) {
                bed.status = BedStatus::Occupied;
            }
            if !sibling_holds_source {
                if let Some(bed) = transfer.from_bed_id.and_then(|id| state.beds.get_mut(&id)) {
                    bed.status = BedStatus::Available;
                }
            }
        } else {
            // Reserve the destination first; a failure here leaves the
            // source allocation untouched.
            let to_room = state
                .rooms
                .get(&transfer.to_room_id)
                .ok_or_else(|| AppError::NotFound("destination room".into()))?;
            let to_bed = match transfer.to_bed_id {
                Some(id) => Some(
                    state
                        .beds
                        .get(&id)
                        .ok_or_else(|| AppError::NotFound("destination bed".into()))?,
                ),
                None => None,
            };
            ledger::check_reserve(to_room, to_bed)?;

            let to_room = state
                .rooms
                .get_mut(&transfer.to_room_id)
                .ok_or_else(|| AppError::NotFound("destination room".into()))?;
            ledger::apply_reserve(
                to_room,
                transfer.to_bed_id.and_then(|id| state.beds.get_mut(&id)),
            );
            if !sibling_holds_source {
                release_slot(state, transfer.from_room_id, transfer.from_bed_id);
            }
        }

        let registration = state
            .registrations
            .get_mut(&transfer.registration_id)
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        registration.room_id = transfer.to_room_id;
        registration.bed_id = transfer.to_bed_id;

        let transfer = state
            .transfers
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("transfer request".into()))?;
        transfer.status = TransferStatus::Completed;
        transfer.completed_at = Some(Utc::now());
        Ok(transfer.clone())
    }

    async fn insert_rate(&self, rate: UtilityRate) -> Result<UtilityRate> {
        self.state.lock().rates.push(rate.clone());
        Ok(rate)
    }

    async fn rate_effective_at(&self, at: DateTime<Utc>) -> Result<Option<UtilityRate>> {
        Ok(self
            .state
            .lock()
            .rates
            .iter()
            .filter(|r| r.effective_from <= at)
            .max_by_key(|r| r.effective_from)
            .cloned())
    }

    async fn record_reading(&self, reading: MeterReading) -> Result<MeterReading> {
        let mut state = self.state.lock();
        let key = (reading.room_id, reading.month, reading.year);
        if state.readings.contains_key(&key) {
            return Err(AppError::DuplicateReading);
        }
        state.readings.insert(key, reading.clone());
        Ok(reading)
    }

    async fn reading(&self, room_id: Uuid, month: i32, year: i32) -> Result<Option<MeterReading>> {
        Ok(self
            .state
            .lock()
            .readings
            .get(&(room_id, month, year))
            .cloned())
    }

    async fn create_bill(&self, bill: UtilityBill) -> Result<UtilityBill> {
        let mut state = self.state.lock();
        let duplicate = state
            .bills
            .values()
            .any(|b| b.room_id == bill.room_id && b.month == bill.month && b.year == bill.year);
        if duplicate {
            return Err(AppError::Validation(format!(
                "a bill for this room and period {}/{} already exists",
                bill.month, bill.year
            )));
        }
        state.bills.insert(bill.id, bill.clone());
        Ok(bill)
    }

    async fn bill(&self, id: Uuid) -> Result<Option<UtilityBill>> {
        Ok(self.state.lock().bills.get(&id).cloned())
    }

    async fn mark_bills_overdue(&self, as_of: NaiveDate) -> Result<u64> {
        let mut state = self.state.lock();
        let mut flipped = 0;
        for bill in state.bills.values_mut() {
            if bill.status == BillStatus::Pending && bill.due_date < as_of {
                bill.status = BillStatus::Overdue;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn cancel_bill(&self, id: Uuid) -> Result<UtilityBill> {
        let mut state = self.state.lock();
        let bill = state
            .bills
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
        ensure_bill_transition(bill.status, BillStatus::Cancelled)?;
        bill.status = BillStatus::Cancelled;
        Ok(bill.clone())
    }

    async fn create_payment(&self, payment: Payment) -> Result<Payment> {
        let mut state = self.state.lock();
        if state.payments_by_ref.contains_key(&payment.order_ref) {
            return Err(AppError::Validation(format!(
                "order reference '{}' already exists",
                payment.order_ref
            )));
        }
        state
            .payments_by_ref
            .insert(payment.order_ref.clone(), payment.id);
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().payments.get(&id).cloned())
    }

    async fn payment_by_order_ref(&self, order_ref: &str) -> Result<Option<Payment>> {
        let state = self.state.lock();
        Ok(state
            .payments_by_ref
            .get(order_ref)
            .and_then(|id| state.payments.get(id))
            .cloned())
    }

    async fn mark_payment_pending(&self, id: Uuid) -> Result<Payment> {
        let mut state = self.state.lock();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("payment".into()))?;
        ensure_payment_transition(payment.status, PaymentStatus::PendingGateway)?;
        payment.status = PaymentStatus::PendingGateway;
        Ok(payment.clone())
    }

    async fn apply_gateway_callback(&self, apply: CallbackApply) -> Result<CallbackOutcome> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(&payment_id) = state.payments_by_ref.get(&apply.order_ref) else {
            return Ok(CallbackOutcome::NotFound);
        };
        let payment = state
            .payments
            .get(&payment_id)
            .ok_or_else(|| AppError::NotFound("payment".into()))?
            .clone();

        match decide_callback(
            payment.status,
            payment.amount,
            apply.amount,
            apply.gateway_success,
        ) {
            CallbackDecision::AlreadyFinal => Ok(CallbackOutcome::AlreadyFinal(payment)),
            CallbackDecision::NeverIssued => Ok(CallbackOutcome::Contract(
                "payment was never handed to the gateway".into(),
            )),
            CallbackDecision::AmountMismatch => Ok(CallbackOutcome::AmountMismatch {
                expected: payment.amount,
                received: apply.amount,
            }),
            CallbackDecision::ApplyFailure => {
                let payment = state
                    .payments
                    .get_mut(&payment_id)
                    .ok_or_else(|| AppError::NotFound("payment".into()))?;
                payment.status = PaymentStatus::Failed;
                payment.gateway_txn_id = Some(apply.txn_id);
                payment.completed_at = Some(Utc::now());
                Ok(CallbackOutcome::Applied(payment.clone()))
            }
            CallbackDecision::ApplySuccess => {
                // Check the dependent entity before touching anything so a
                // contract violation mutates nothing at all.
                match (payment.registration_id, payment.bill_id) {
                    (Some(reg_id), None) => {
                        let registration = state
                            .registrations
                            .get(&reg_id)
                            .ok_or_else(|| AppError::NotFound("registration".into()))?;
                        if registration.status != RegistrationStatus::Confirmed {
                            return Ok(CallbackOutcome::Contract(format!(
                                "registration must be CONFIRMED to accept payment, found {:?}",
                                registration.status
                            )));
                        }
                        let registration = state
                            .registrations
                            .get_mut(&reg_id)
                            .ok_or_else(|| AppError::NotFound("registration".into()))?;
                        registration.status = RegistrationStatus::Paid;
                        registration.paid_at = Some(Utc::now());
                    }
                    (None, Some(bill_id)) => {
                        let bill = state
                            .bills
                            .get(&bill_id)
                            .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
                        if !bill.status.is_payable() {
                            return Ok(CallbackOutcome::Contract(format!(
                                "bill is not payable in status {:?}",
                                bill.status
                            )));
                        }
                        let bill = state
                            .bills
                            .get_mut(&bill_id)
                            .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
                        bill.status = BillStatus::Paid;
                        bill.paid_at = Some(Utc::now());
                    }
                    _ => {
                        return Ok(CallbackOutcome::Contract(
                            "payment references neither a registration nor a bill".into(),
                        ))
                    }
                }

                let payment = state
                    .payments
                    .get_mut(&payment_id)
                    .ok_or_else(|| AppError::NotFound("payment".into()))?;
                payment.status = PaymentStatus::Success;
                payment.gateway_txn_id = Some(apply.txn_id);
                payment.completed_at = Some(Utc::now());
                Ok(CallbackOutcome::Applied(payment.clone()))
            }
        }
    }

    async fn refund_payment(&self, id: Uuid, amount: Decimal) -> Result<Payment> {
        let mut state = self.state.lock();
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("payment".into()))?;

        if payment.status != PaymentStatus::Success {
            return Err(AppError::NotRefundable(format!("{:?}", payment.status)));
        }
        if amount > payment.amount {
            return Err(AppError::AmountExceedsOriginal {
                requested: amount,
                original: payment.amount,
            });
        }

        payment.status = PaymentStatus::Refunded;
        payment.refund_amount = Some(amount);
        payment.refunded_at = Some(Utc::now());
        Ok(payment.clone())
    }
}
