use std::sync::Arc;

use metrics::counter;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Principal, TransferRequest};
use crate::store::{DormStore, NewTransfer};

pub struct TransferService {
    store: Arc<dyn DormStore>,
}

impl TransferService {
    pub fn new(store: Arc<dyn DormStore>) -> Self {
        Self { store }
    }

    pub async fn request(
        &self,
        principal: &Principal,
        registration_id: Uuid,
        to_room_id: Uuid,
        to_bed_id: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<TransferRequest> {
        let registration = self
            .store
            .registration(registration_id)
            .await?
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        if !principal.can_act_for(registration.student_id) {
            return Err(AppError::Forbidden(
                "only the owner or an administrator can request a transfer".into(),
            ));
        }

        let transfer = self
            .store
            .create_transfer(NewTransfer {
                registration_id,
                to_room_id,
                to_bed_id,
                reason,
            })
            .await?;

        counter!("transfers_total", "action" => "requested").increment(1);
        tracing::info!(
            transfer_id = %transfer.id,
            registration_id = %registration_id,
            to_room_id = %to_room_id,
            "transfer requested"
        );
        Ok(transfer)
    }

    /// Approval records the decision only; occupancy moves at completion.
    pub async fn approve(&self, principal: &Principal, id: Uuid) -> Result<TransferRequest> {
        principal.require_admin()?;
        let transfer = self.store.decide_transfer(id, true).await?;
        counter!("transfers_total", "action" => "approved").increment(1);
        tracing::info!(transfer_id = %id, "transfer approved");
        Ok(transfer)
    }

    pub async fn reject(&self, principal: &Principal, id: Uuid) -> Result<TransferRequest> {
        principal.require_admin()?;
        let transfer = self.store.decide_transfer(id, false).await?;
        counter!("transfers_total", "action" => "rejected").increment(1);
        tracing::info!(transfer_id = %id, "transfer rejected");
        Ok(transfer)
    }

    /// Runs the ledger move. A capacity conflict at the destination leaves
    /// the source allocation and the request untouched.
    pub async fn complete(&self, principal: &Principal, id: Uuid) -> Result<TransferRequest> {
        principal.require_admin()?;
        let transfer = self.store.complete_transfer(id).await?;
        counter!("transfers_total", "action" => "completed").increment(1);
        tracing::info!(
            transfer_id = %id,
            from_room_id = %transfer.from_room_id,
            to_room_id = %transfer.to_room_id,
            "transfer completed"
        );
        Ok(transfer)
    }
}
