//! Inventory ledger policy: the only code allowed to touch room occupancy
//! counters and bed status.
//!
//! The functions here are pure checks and in-place mutations. Callers (the
//! store implementations) are responsible for executing a check/apply pair
//! as one atomic unit (a `FOR UPDATE` row lock in Postgres, a state mutex
//! in memory) so that two concurrent reserves on the last slot are
//! linearized and exactly one wins.

use crate::error::{AppError, Result};
use crate::models::{Bed, BedStatus, Room};

/// Checks that a slot can be reserved: the room must be active with spare
/// capacity, and the requested bed (if any) must belong to the room and be
/// available.
pub fn check_reserve(room: &Room, bed: Option<&Bed>) -> Result<()> {
    if !room.active {
        return Err(AppError::Validation(format!(
            "room '{}' is not active",
            room.name
        )));
    }
    if !room.has_vacancy() {
        return Err(AppError::NoCapacity);
    }
    if let Some(bed) = bed {
        if bed.room_id != room.id {
            return Err(AppError::Validation(format!(
                "bed '{}' does not belong to room '{}'",
                bed.label, room.name
            )));
        }
        if !bed.is_available() {
            return Err(AppError::BedTaken);
        }
    }
    Ok(())
}

/// Takes the slot. Only valid after `check_reserve` passed under the same
/// lock.
pub fn apply_reserve(room: &mut Room, bed: Option<&mut Bed>) {
    room.occupied += 1;
    if let Some(bed) = bed {
        bed.status = BedStatus::Occupied;
    }
}

/// Gives a slot back. The counter never goes below zero even if called
/// against inconsistent data.
pub fn apply_release(room: &mut Room, bed: Option<&mut Bed>) {
    if room.occupied > 0 {
        room.occupied -= 1;
    }
    if let Some(bed) = bed {
        bed.status = BedStatus::Available;
    }
}
