use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Occupancy status of a single bed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bed_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BedStatus {
    Available,
    Occupied,
}

/// A dormitory room. `occupied` is maintained exclusively by the inventory
/// ledger; no other code path mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Room {
    pub id: Uuid,
    pub dormitory_id: Uuid,
    pub name: String,
    pub capacity: i32,
    pub occupied: i32,
    pub active: bool,
    pub price_per_term: Decimal,
}

impl Room {
    pub fn new(dormitory_id: Uuid, name: impl Into<String>, capacity: i32, price_per_term: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            dormitory_id,
            name: name.into(),
            capacity,
            occupied: 0,
            active: true,
            price_per_term,
        }
    }

    pub fn has_vacancy(&self) -> bool {
        self.occupied < self.capacity
    }
}

/// A bed inside a room. At most one active registration references a bed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bed {
    pub id: Uuid,
    pub room_id: Uuid,
    pub label: String,
    pub status: BedStatus,
}

impl Bed {
    pub fn new(room_id: Uuid, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            label: label.into(),
            status: BedStatus::Available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == BedStatus::Available
    }
}
