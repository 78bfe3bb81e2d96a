use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::Semester;

/// Lifecycle status of a room registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "registration_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Confirmed,
    Paid,
    Cancelled,
    Rejected,
}

impl RegistrationStatus {
    /// Valid next states from the current state.
    pub fn valid_transitions(self) -> &'static [RegistrationStatus] {
        match self {
            RegistrationStatus::Pending => &[
                RegistrationStatus::Confirmed,
                RegistrationStatus::Cancelled,
                RegistrationStatus::Rejected,
            ],
            RegistrationStatus::Confirmed => {
                &[RegistrationStatus::Paid, RegistrationStatus::Cancelled]
            }
            // Terminal states
            RegistrationStatus::Paid
            | RegistrationStatus::Cancelled
            | RegistrationStatus::Rejected => &[],
        }
    }

    pub fn can_transition(self, to: RegistrationStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Whether a registration in this status still holds its room/bed
    /// slot. Pending and confirmed registrations hold it from creation;
    /// a paid one keeps it for the term.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            RegistrationStatus::Pending
                | RegistrationStatus::Confirmed
                | RegistrationStatus::Paid
        )
    }

    /// Whether leaving this status for `to` must release the reserved slot.
    /// The slot is held from creation, so any close before payment gives it
    /// back; a paid registration keeps it until the contract ends.
    pub fn releases_slot_on(self, to: RegistrationStatus) -> bool {
        matches!(
            to,
            RegistrationStatus::Cancelled | RegistrationStatus::Rejected
        ) && self.can_transition(to)
    }
}

pub fn ensure_registration_transition(
    from: RegistrationStatus,
    to: RegistrationStatus,
) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            entity: "registration",
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// A student's registration for a room (and optionally a specific bed)
/// during one semester. The slot is reserved at creation time; if the
/// reserve fails the registration is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub student_id: Uuid,
    pub room_id: Uuid,
    pub bed_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub semester: Semester,
    pub status: RegistrationStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Registration {
    pub fn new(student_id: Uuid, room_id: Uuid, bed_id: Option<Uuid>, semester: Semester) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            room_id,
            bed_id,
            semester,
            status: RegistrationStatus::Pending,
            note: None,
            created_at: Utc::now(),
            confirmed_at: None,
            paid_at: None,
            closed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_be_confirmed_rejected_or_cancelled() {
        assert!(RegistrationStatus::Pending.can_transition(RegistrationStatus::Confirmed));
        assert!(RegistrationStatus::Pending.can_transition(RegistrationStatus::Rejected));
        assert!(RegistrationStatus::Pending.can_transition(RegistrationStatus::Cancelled));
        assert!(!RegistrationStatus::Pending.can_transition(RegistrationStatus::Paid));
    }

    #[test]
    fn paid_is_unreachable_except_from_confirmed() {
        assert!(RegistrationStatus::Confirmed.can_transition(RegistrationStatus::Paid));
        assert!(!RegistrationStatus::Paid.can_transition(RegistrationStatus::Cancelled));
        assert!(!RegistrationStatus::Paid.can_transition(RegistrationStatus::Rejected));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for s in [
            RegistrationStatus::Paid,
            RegistrationStatus::Cancelled,
            RegistrationStatus::Rejected,
        ] {
            assert!(s.is_terminal());
            assert!(s.valid_transitions().is_empty());
        }
    }

    #[test]
    fn closing_before_payment_releases_the_slot() {
        assert!(RegistrationStatus::Pending.releases_slot_on(RegistrationStatus::Rejected));
        assert!(RegistrationStatus::Confirmed.releases_slot_on(RegistrationStatus::Cancelled));
        assert!(!RegistrationStatus::Confirmed.releases_slot_on(RegistrationStatus::Paid));
    }
}
