//! Postgres store backend.
//!
//! Compound operations run inside a transaction and take `FOR UPDATE` row
//! locks on the rows they mutate: the room (and bed) rows are the
//! serialization point for occupancy, the payment row keyed by order
//! reference is the serialization point for reconciliation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
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

const ROOM_COLS: &str = "id, dormitory_id, name, capacity, occupied, active, price_per_term";
const BED_COLS: &str = "id, room_id, label, status";
const REGISTRATION_COLS: &str =
    "id, student_id, room_id, bed_id, semester, status, note, created_at, confirmed_at, paid_at, closed_at";
const TRANSFER_COLS: &str = "id, student_id, registration_id, from_room_id, from_bed_id, \
     to_room_id, to_bed_id, semester, status, reason, created_at, decided_at, completed_at";
const BILL_COLS: &str = "id, room_id, month, year, electricity_usage, water_usage, \
     electricity_amount, water_amount, total_amount, rate_id, status, due_date, created_at, paid_at";
const PAYMENT_COLS: &str = "id, order_ref, registration_id, bill_id, amount, method, status, \
     gateway_txn_id, refund_amount, created_at, completed_at, refunded_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn room_for_update(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Room> {
    sqlx::query_as::<_, Room>(&format!(
        "SELECT {ROOM_COLS} FROM rooms WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("room".into()))
}

async fn bed_for_update(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Bed> {
    sqlx::query_as::<_, Bed>(&format!(
        "SELECT {BED_COLS} FROM beds WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("bed".into()))
}

async fn registration_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Registration> {
    sqlx::query_as::<_, Registration>(&format!(
        "SELECT {REGISTRATION_COLS} FROM registrations WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound("registration".into()))
}

async fn write_occupied(tx: &mut Transaction<'_, Postgres>, room: &Room) -> Result<()> {
    sqlx::query("UPDATE rooms SET occupied = $2 WHERE id = $1")
        .bind(room.id)
        .bind(room.occupied)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn write_bed_status(
    tx: &mut Transaction<'_, Postgres>,
    bed_id: Uuid,
    status: BedStatus,
) -> Result<()> {
    sqlx::query("UPDATE beds SET status = $2 WHERE id = $1")
        .bind(bed_id)
        .bind(status)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Whether another active registration of the same student holds the same
/// slot, as a contract extension does across semesters. Pass `Uuid::nil()`
/// when there is no row to exclude yet.
async fn sibling_holds_slot(
    tx: &mut Transaction<'_, Postgres>,
    registration_id: Uuid,
    student_id: Uuid,
    room_id: Uuid,
    bed_id: Option<Uuid>,
) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM registrations
            WHERE id <> $1 AND student_id = $2 AND room_id = $3
              AND bed_id IS NOT DISTINCT FROM $4
              AND status IN ('PENDING', 'CONFIRMED', 'PAID')
        )
        "#,
    )
    .bind(registration_id)
    .bind(student_id)
    .bind(room_id)
    .bind(bed_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

#[async_trait]
impl DormStore for PgStore {
    async fn room(&self, id: Uuid) -> Result<Option<Room>> {
        Ok(sqlx::query_as::<_, Room>(&format!(
            "SELECT {ROOM_COLS} FROM rooms WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn bed(&self, id: Uuid) -> Result<Option<Bed>> {
        Ok(sqlx::query_as::<_, Bed>(&format!(
            "SELECT {BED_COLS} FROM beds WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn beds_in_room(&self, room_id: Uuid) -> Result<Vec<Bed>> {
        Ok(sqlx::query_as::<_, Bed>(&format!(
            "SELECT {BED_COLS} FROM beds WHERE room_id = $1 ORDER BY label"
        ))
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn occupancy_snapshot(&self, room_id: Uuid) -> Result<OccupancySnapshot> {
        let mut tx = self.pool.begin().await?;
        let room = room_for_update(&mut tx, room_id).await?;
        let beds = sqlx::query_as::<_, Bed>(&format!(
            "SELECT {BED_COLS} FROM beds WHERE room_id = $1"
        ))
        .bind(room_id)
        .fetch_all(&mut *tx)
        .await?;
        let registrations = sqlx::query_as::<_, Registration>(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations WHERE room_id = $1"
        ))
        .bind(room_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(snapshot_from_parts(&room, &beds, registrations.into_iter()))
    }

    async fn create_registration(&self, new: NewRegistration) -> Result<Registration> {
        let mut tx = self.pool.begin().await?;

        let mut room = room_for_update(&mut tx, new.room_id).await?;
        let bed = match new.bed_id {
            Some(id) => Some(bed_for_update(&mut tx, id).await?),
            None => None,
        };

        let (duplicate,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM registrations
                WHERE student_id = $1 AND semester = $2
                  AND status IN ('PENDING', 'CONFIRMED', 'PAID')
            )
            "#,
        )
        .bind(new.student_id)
        .bind(new.semester.to_string())
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Err(AppError::AlreadyRegistered);
        }

        // A registration sharing the student's own current slot (an
        // extension into another semester) reserves nothing; the ledger
        // already counts that slot.
        let shares_own_slot =
            sibling_holds_slot(&mut tx, Uuid::nil(), new.student_id, new.room_id, new.bed_id)
                .await?;
        if !shares_own_slot {
            ledger::check_reserve(&room, bed.as_ref())?;
            ledger::apply_reserve(&mut room, None);
            write_occupied(&mut tx, &room).await?;
            if let Some(bed_id) = new.bed_id {
                write_bed_status(&mut tx, bed_id, BedStatus::Occupied).await?;
            }
        }

        let mut registration =
            Registration::new(new.student_id, new.room_id, new.bed_id, new.semester);
        registration.note = new.note;

        let registration = sqlx::query_as::<_, Registration>(&format!(
            r#"
            INSERT INTO registrations
                (id, student_id, room_id, bed_id, semester, status, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {REGISTRATION_COLS}
            "#
        ))
        .bind(registration.id)
        .bind(registration.student_id)
        .bind(registration.room_id)
        .bind(registration.bed_id)
        .bind(registration.semester.to_string())
        .bind(registration.status)
        .bind(&registration.note)
        .bind(registration.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            // The partial unique index catches a same-student insert that
            // raced past the EXISTS check on a different room's lock.
            sqlx::Error::Database(db)
                if db.constraint() == Some("uniq_active_registration_per_semester") =>
            {
                AppError::AlreadyRegistered
            }
            _ => e.into(),
        })?;

        tx.commit().await?;
        Ok(registration)
    }

    async fn registration(&self, id: Uuid) -> Result<Option<Registration>> {
        Ok(sqlx::query_as::<_, Registration>(&format!(
            "SELECT {REGISTRATION_COLS} FROM registrations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn active_registration_for(
        &self,
        student_id: Uuid,
        semester: Semester,
    ) -> Result<Option<Registration>> {
        Ok(sqlx::query_as::<_, Registration>(&format!(
            r#"
            SELECT {REGISTRATION_COLS} FROM registrations
            WHERE student_id = $1 AND semester = $2
              AND status IN ('PENDING', 'CONFIRMED', 'PAID')
            "#
        ))
        .bind(student_id)
        .bind(semester.to_string())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn confirm_registration(&self, id: Uuid) -> Result<Registration> {
        let mut tx = self.pool.begin().await?;
        let registration = registration_for_update(&mut tx, id).await?;
        ensure_registration_transition(registration.status, RegistrationStatus::Confirmed)?;

        let registration = sqlx::query_as::<_, Registration>(&format!(
            r#"
            UPDATE registrations SET status = 'CONFIRMED', confirmed_at = NOW()
            WHERE id = $1
            RETURNING {REGISTRATION_COLS}
            "#
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(registration)
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

        let mut tx = self.pool.begin().await?;
        let registration = registration_for_update(&mut tx, id).await?;
        ensure_registration_transition(registration.status, to)?;
        let releases = registration.status.releases_slot_on(to);

        let registration = sqlx::query_as::<_, Registration>(&format!(
            r#"
            UPDATE registrations
            SET status = $2, closed_at = NOW(), note = COALESCE($3, note)
            WHERE id = $1
            RETURNING {REGISTRATION_COLS}
            "#
        ))
        .bind(id)
        .bind(to)
        .bind(note)
        .fetch_one(&mut *tx)
        .await?;

        // While a sharing sibling (an extension or its predecessor) still
        // holds the slot, closing this registration must not free it. The
        // sibling check runs under the room lock so it cannot race a
        // concurrent insert sharing the slot.
        if releases {
            let mut room = room_for_update(&mut tx, registration.room_id).await?;
            let shared = sibling_holds_slot(
                &mut tx,
                registration.id,
                registration.student_id,
                registration.room_id,
                registration.bed_id,
            )
            .await?;
            if !shared {
                ledger::apply_release(&mut room, None);
                write_occupied(&mut tx, &room).await?;
                if let Some(bed_id) = registration.bed_id {
                    write_bed_status(&mut tx, bed_id, BedStatus::Available).await?;
                }
            }
        }

        tx.commit().await?;
        Ok(registration)
    }

    async fn create_transfer(&self, new: NewTransfer) -> Result<TransferRequest> {
        let mut tx = self.pool.begin().await?;

        let registration = registration_for_update(&mut tx, new.registration_id).await?;
        if !matches!(
            registration.status,
            RegistrationStatus::Confirmed | RegistrationStatus::Paid
        ) {
            return Err(AppError::Validation(format!(
                "only a confirmed or paid registration can be transferred, found {:?}",
                registration.status
            )));
        }
        if new.to_room_id == registration.room_id && new.to_bed_id == registration.bed_id {
            return Err(AppError::Validation(
                "transfer destination equals the current allocation".into(),
            ));
        }

        // Existence checks only; no locks are held on the destination
        // until completion.
        let _ = sqlx::query_as::<_, Room>(&format!(
            "SELECT {ROOM_COLS} FROM rooms WHERE id = $1"
        ))
        .bind(new.to_room_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("destination room".into()))?;
        if let Some(bed_id) = new.to_bed_id {
            let bed = sqlx::query_as::<_, Bed>(&format!(
                "SELECT {BED_COLS} FROM beds WHERE id = $1"
            ))
            .bind(bed_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("destination bed".into()))?;
            if bed.room_id != new.to_room_id {
                return Err(AppError::Validation(
                    "destination bed does not belong to the destination room".into(),
                ));
            }
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

        let transfer = sqlx::query_as::<_, TransferRequest>(&format!(
            r#"
            INSERT INTO transfer_requests
                (id, student_id, registration_id, from_room_id, from_bed_id,
                 to_room_id, to_bed_id, semester, status, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {TRANSFER_COLS}
            "#
        ))
        .bind(transfer.id)
        .bind(transfer.student_id)
        .bind(transfer.registration_id)
        .bind(transfer.from_room_id)
        .bind(transfer.from_bed_id)
        .bind(transfer.to_room_id)
        .bind(transfer.to_bed_id)
        .bind(transfer.semester.to_string())
        .bind(transfer.status)
        .bind(&transfer.reason)
        .bind(transfer.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transfer)
    }

    async fn transfer_request(&self, id: Uuid) -> Result<Option<TransferRequest>> {
        Ok(sqlx::query_as::<_, TransferRequest>(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn decide_transfer(&self, id: Uuid, approve: bool) -> Result<TransferRequest> {
        let to = if approve {
            TransferStatus::Approved
        } else {
            TransferStatus::Rejected
        };

        let mut tx = self.pool.begin().await?;
        let transfer = sqlx::query_as::<_, TransferRequest>(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("transfer request".into()))?;
        ensure_transfer_transition(transfer.status, to)?;

        let transfer = sqlx::query_as::<_, TransferRequest>(&format!(
            r#"
            UPDATE transfer_requests SET status = $2, decided_at = NOW()
            WHERE id = $1
            RETURNING {TRANSFER_COLS}
            "#
        ))
        .bind(id)
        .bind(to)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transfer)
    }

    async fn complete_transfer(&self, id: Uuid) -> Result<TransferRequest> {
        let mut tx = self.pool.begin().await?;

        let transfer = sqlx::query_as::<_, TransferRequest>(&format!(
            "SELECT {TRANSFER_COLS} FROM transfer_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("transfer request".into()))?;
        ensure_transfer_transition(transfer.status, TransferStatus::Completed)?;

        let registration = registration_for_update(&mut tx, transfer.registration_id).await?;
        if !registration.status.holds_slot() {
            return Err(AppError::Validation(
                "the underlying registration no longer holds a slot".into(),
            ));
        }
        if transfer.to_room_id == transfer.from_room_id {
            // Bed move within one room: occupancy unchanged.
            let _ = room_for_update(&mut tx, transfer.from_room_id).await?;
            let sibling_holds_source = sibling_holds_slot(
                &mut tx,
                registration.id,
                registration.student_id,
                transfer.from_room_id,
                transfer.from_bed_id,
            )
            .await?;
            if let Some(bed_id) = transfer.to_bed_id {
                let bed = bed_for_update(&mut tx, bed_id).await?;
                if !bed.is_available() {
                    return Err(AppError::BedTaken);
                }
                write_bed_status(&mut tx, bed_id, BedStatus::Occupied).await?;
            }
            if let Some(bed_id) = transfer.from_bed_id {
                if !sibling_holds_source {
                    write_bed_status(&mut tx, bed_id, BedStatus::Available).await?;
                }
            }
        } else {
            // Lock rooms in a stable order so two opposing transfers
            // cannot deadlock, then reserve the destination before
            // releasing the source.
            let mut order = [transfer.from_room_id, transfer.to_room_id];
            order.sort();
            let mut first = room_for_update(&mut tx, order[0]).await?;
            let mut second = room_for_update(&mut tx, order[1]).await?;
            let (from_room, to_room) = if first.id == transfer.from_room_id {
                (&mut first, &mut second)
            } else {
                (&mut second, &mut first)
            };
            let sibling_holds_source = sibling_holds_slot(
                &mut tx,
                registration.id,
                registration.student_id,
                transfer.from_room_id,
                transfer.from_bed_id,
            )
            .await?;

            let to_bed = match transfer.to_bed_id {
                Some(id) => Some(bed_for_update(&mut tx, id).await?),
                None => None,
            };
            ledger::check_reserve(to_room, to_bed.as_ref())?;

            ledger::apply_reserve(to_room, None);
            if !sibling_holds_source {
                ledger::apply_release(from_room, None);
            }
            write_occupied(&mut tx, to_room).await?;
            write_occupied(&mut tx, from_room).await?;
            if let Some(bed_id) = transfer.to_bed_id {
                write_bed_status(&mut tx, bed_id, BedStatus::Occupied).await?;
            }
            if let Some(bed_id) = transfer.from_bed_id {
                if !sibling_holds_source {
                    write_bed_status(&mut tx, bed_id, BedStatus::Available).await?;
                }
            }
        }

        sqlx::query("UPDATE registrations SET room_id = $2, bed_id = $3 WHERE id = $1")
            .bind(transfer.registration_id)
            .bind(transfer.to_room_id)
            .bind(transfer.to_bed_id)
            .execute(&mut *tx)
            .await?;

        let transfer = sqlx::query_as::<_, TransferRequest>(&format!(
            r#"
            UPDATE transfer_requests SET status = 'COMPLETED', completed_at = NOW()
            WHERE id = $1
            RETURNING {TRANSFER_COLS}
            "#
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transfer)
    }

    async fn insert_rate(&self, rate: UtilityRate) -> Result<UtilityRate> {
        Ok(sqlx::query_as::<_, UtilityRate>(
            r#"
            INSERT INTO utility_rates (id, electricity_rate, water_rate, effective_from)
            VALUES ($1, $2, $3, $4)
            RETURNING id, electricity_rate, water_rate, effective_from
            "#,
        )
        .bind(rate.id)
        .bind(rate.electricity_rate)
        .bind(rate.water_rate)
        .bind(rate.effective_from)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn rate_effective_at(&self, at: DateTime<Utc>) -> Result<Option<UtilityRate>> {
        Ok(sqlx::query_as::<_, UtilityRate>(
            r#"
            SELECT id, electricity_rate, water_rate, effective_from
            FROM utility_rates
            WHERE effective_from <= $1
            ORDER BY effective_from DESC
            LIMIT 1
            "#,
        )
        .bind(at)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn record_reading(&self, reading: MeterReading) -> Result<MeterReading> {
        let inserted = sqlx::query_as::<_, MeterReading>(
            r#"
            INSERT INTO meter_readings (id, room_id, month, year, electricity, water, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (room_id, month, year) DO NOTHING
            RETURNING id, room_id, month, year, electricity, water, recorded_at
            "#,
        )
        .bind(reading.id)
        .bind(reading.room_id)
        .bind(reading.month)
        .bind(reading.year)
        .bind(reading.electricity)
        .bind(reading.water)
        .bind(reading.recorded_at)
        .fetch_optional(&self.pool)
        .await?;

        inserted.ok_or(AppError::DuplicateReading)
    }

    async fn reading(&self, room_id: Uuid, month: i32, year: i32) -> Result<Option<MeterReading>> {
        Ok(sqlx::query_as::<_, MeterReading>(
            r#"
            SELECT id, room_id, month, year, electricity, water, recorded_at
            FROM meter_readings
            WHERE room_id = $1 AND month = $2 AND year = $3
            "#,
        )
        .bind(room_id)
        .bind(month)
        .bind(year)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn create_bill(&self, bill: UtilityBill) -> Result<UtilityBill> {
        Ok(sqlx::query_as::<_, UtilityBill>(&format!(
            r#"
            INSERT INTO utility_bills
                (id, room_id, month, year, electricity_usage, water_usage,
                 electricity_amount, water_amount, total_amount, rate_id, status,
                 due_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {BILL_COLS}
            "#
        ))
        .bind(bill.id)
        .bind(bill.room_id)
        .bind(bill.month)
        .bind(bill.year)
        .bind(bill.electricity_usage)
        .bind(bill.water_usage)
        .bind(bill.electricity_amount)
        .bind(bill.water_amount)
        .bind(bill.total_amount)
        .bind(bill.rate_id)
        .bind(bill.status)
        .bind(bill.due_date)
        .bind(bill.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn bill(&self, id: Uuid) -> Result<Option<UtilityBill>> {
        Ok(sqlx::query_as::<_, UtilityBill>(&format!(
            "SELECT {BILL_COLS} FROM utility_bills WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_bills_overdue(&self, as_of: NaiveDate) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE utility_bills SET status = 'OVERDUE' WHERE status = 'PENDING' AND due_date < $1",
        )
        .bind(as_of)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel_bill(&self, id: Uuid) -> Result<UtilityBill> {
        let mut tx = self.pool.begin().await?;
        let bill = sqlx::query_as::<_, UtilityBill>(&format!(
            "SELECT {BILL_COLS} FROM utility_bills WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
        ensure_bill_transition(bill.status, BillStatus::Cancelled)?;

        let bill = sqlx::query_as::<_, UtilityBill>(&format!(
            r#"
            UPDATE utility_bills SET status = 'CANCELLED'
            WHERE id = $1
            RETURNING {BILL_COLS}
            "#
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(bill)
    }

    async fn create_payment(&self, payment: Payment) -> Result<Payment> {
        Ok(sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments
                (id, order_ref, registration_id, bill_id, amount, method, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PAYMENT_COLS}
            "#
        ))
        .bind(payment.id)
        .bind(&payment.order_ref)
        .bind(payment.registration_id)
        .bind(payment.bill_id)
        .bind(payment.amount)
        .bind(payment.method)
        .bind(payment.status)
        .bind(payment.created_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn payment_by_order_ref(&self, order_ref: &str) -> Result<Option<Payment>> {
        Ok(sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE order_ref = $1"
        ))
        .bind(order_ref)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_payment_pending(&self, id: Uuid) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("payment".into()))?;
        ensure_payment_transition(payment.status, PaymentStatus::PendingGateway)?;

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments SET status = 'PENDING_GATEWAY'
            WHERE id = $1
            RETURNING {PAYMENT_COLS}
            "#
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(payment)
    }

    async fn apply_gateway_callback(&self, apply: CallbackApply) -> Result<CallbackOutcome> {
        let mut tx = self.pool.begin().await?;

        // The order-reference row is the serialization point: the
        // terminal-status check and the status write happen under the same
        // lock.
        let Some(payment) = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE order_ref = $1 FOR UPDATE"
        ))
        .bind(&apply.order_ref)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(CallbackOutcome::NotFound);
        };

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
                let payment = sqlx::query_as::<_, Payment>(&format!(
                    r#"
                    UPDATE payments
                    SET status = 'FAILED', gateway_txn_id = $2, completed_at = NOW()
                    WHERE id = $1
                    RETURNING {PAYMENT_COLS}
                    "#
                ))
                .bind(payment.id)
                .bind(&apply.txn_id)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(CallbackOutcome::Applied(payment))
            }
            CallbackDecision::ApplySuccess => {
                match (payment.registration_id, payment.bill_id) {
                    (Some(reg_id), None) => {
                        let registration = registration_for_update(&mut tx, reg_id).await?;
                        if registration.status != RegistrationStatus::Confirmed {
                            return Ok(CallbackOutcome::Contract(format!(
                                "registration must be CONFIRMED to accept payment, found {:?}",
                                registration.status
                            )));
                        }
                        sqlx::query(
                            "UPDATE registrations SET status = 'PAID', paid_at = NOW() WHERE id = $1",
                        )
                        .bind(reg_id)
                        .execute(&mut *tx)
                        .await?;
                    }
                    (None, Some(bill_id)) => {
                        let bill = sqlx::query_as::<_, UtilityBill>(&format!(
                            "SELECT {BILL_COLS} FROM utility_bills WHERE id = $1 FOR UPDATE"
                        ))
                        .bind(bill_id)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
                        if !bill.status.is_payable() {
                            return Ok(CallbackOutcome::Contract(format!(
                                "bill is not payable in status {:?}",
                                bill.status
                            )));
                        }
                        sqlx::query(
                            "UPDATE utility_bills SET status = 'PAID', paid_at = NOW() WHERE id = $1",
                        )
                        .bind(bill_id)
                        .execute(&mut *tx)
                        .await?;
                    }
                    _ => {
                        return Ok(CallbackOutcome::Contract(
                            "payment references neither a registration nor a bill".into(),
                        ))
                    }
                }

                let payment = sqlx::query_as::<_, Payment>(&format!(
                    r#"
                    UPDATE payments
                    SET status = 'SUCCESS', gateway_txn_id = $2, completed_at = NOW()
                    WHERE id = $1
                    RETURNING {PAYMENT_COLS}
                    "#
                ))
                .bind(payment.id)
                .bind(&apply.txn_id)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(CallbackOutcome::Applied(payment))
            }
        }
    }

    async fn refund_payment(&self, id: Uuid, amount: Decimal) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {PAYMENT_COLS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
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

        let payment = sqlx::query_as::<_, Payment>(&format!(
            r#"
            UPDATE payments
            SET status = 'REFUNDED', refund_amount = $2, refunded_at = NOW()
            WHERE id = $1
            RETURNING {PAYMENT_COLS}
            "#
        ))
        .bind(id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(payment)
    }
}
