use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::Semester;

/// Lifecycle status of a transfer request. Approval alone moves no
/// occupancy; only completion runs the ledger transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl TransferStatus {
    pub fn valid_transitions(self) -> &'static [TransferStatus] {
        match self {
            TransferStatus::Pending => &[TransferStatus::Approved, TransferStatus::Rejected],
            TransferStatus::Approved => &[TransferStatus::Completed],
            TransferStatus::Rejected | TransferStatus::Completed => &[],
        }
    }

    pub fn can_transition(self, to: TransferStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }
}

pub fn ensure_transfer_transition(from: TransferStatus, to: TransferStatus) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            entity: "transfer request",
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

/// A request to move a registration from one room/bed to another within a
/// semester.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransferRequest {
    pub id: Uuid,
    pub student_id: Uuid,
    pub registration_id: Uuid,
    pub from_room_id: Uuid,
    pub from_bed_id: Option<Uuid>,
    pub to_room_id: Uuid,
    pub to_bed_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub semester: Semester,
    pub status: TransferStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        student_id: Uuid,
        registration_id: Uuid,
        from_room_id: Uuid,
        from_bed_id: Option<Uuid>,
        to_room_id: Uuid,
        to_bed_id: Option<Uuid>,
        semester: Semester,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            registration_id,
            from_room_id,
            from_bed_id,
            to_room_id,
            to_bed_id,
            semester,
            status: TransferStatus::Pending,
            reason,
            created_at: Utc::now(),
            decided_at: None,
            completed_at: None,
        }
    }
}
