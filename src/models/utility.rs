use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Unit prices for metered utilities. The applicable rate for a billing
/// period is the one with the latest `effective_from` at or before the
/// period start.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UtilityRate {
    pub id: Uuid,
    pub electricity_rate: Decimal,
    pub water_rate: Decimal,
    pub effective_from: DateTime<Utc>,
}

impl UtilityRate {
    pub fn new(electricity_rate: Decimal, water_rate: Decimal, effective_from: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            electricity_rate,
            water_rate,
            effective_from,
        }
    }
}

/// Cumulative meter readings for one room and period; unique per
/// (room, month, year).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MeterReading {
    pub id: Uuid,
    pub room_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub electricity: Decimal,
    pub water: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl MeterReading {
    pub fn new(room_id: Uuid, month: i32, year: i32, electricity: Decimal, water: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            month,
            year,
            electricity,
            water,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bill_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl BillStatus {
    pub fn valid_transitions(self) -> &'static [BillStatus] {
        match self {
            BillStatus::Pending => &[BillStatus::Paid, BillStatus::Overdue, BillStatus::Cancelled],
            BillStatus::Overdue => &[BillStatus::Paid, BillStatus::Cancelled],
            BillStatus::Paid | BillStatus::Cancelled => &[],
        }
    }

    pub fn can_transition(self, to: BillStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// A bill can be paid while pending or overdue.
    pub fn is_payable(self) -> bool {
        self.can_transition(BillStatus::Paid)
    }
}

pub fn ensure_bill_transition(from: BillStatus, to: BillStatus) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            entity: "utility bill",
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// A utility bill derived from two consecutive meter readings for the same
/// room.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UtilityBill {
    pub id: Uuid,
    pub room_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub electricity_usage: Decimal,
    pub water_usage: Decimal,
    pub electricity_amount: Decimal,
    pub water_amount: Decimal,
    pub total_amount: Decimal,
    pub rate_id: Uuid,
    pub status: BillStatus,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}
