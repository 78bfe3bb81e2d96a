use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Lifecycle status of a payment. SUCCESS, FAILED and REFUNDED are
/// terminal for gateway callbacks: a callback that finds the payment in
/// one of these states is acknowledged without re-mutating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Created,
    PendingGateway,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn valid_transitions(self) -> &'static [PaymentStatus] {
        match self {
            PaymentStatus::Created => &[PaymentStatus::PendingGateway],
            PaymentStatus::PendingGateway => &[PaymentStatus::Success, PaymentStatus::Failed],
            PaymentStatus::Success => &[PaymentStatus::Refunded],
            PaymentStatus::Failed | PaymentStatus::Refunded => &[],
        }
    }

    pub fn can_transition(self, to: PaymentStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Terminal with respect to gateway callbacks. A refund is an admin
    /// action, not a callback transition, so SUCCESS counts as terminal
    /// here even though REFUNDED is still reachable from it.
    pub fn is_callback_terminal(self) -> bool {
        matches!(
            self,
            PaymentStatus::Success | PaymentStatus::Failed | PaymentStatus::Refunded
        )
    }
}

pub fn ensure_payment_transition(from: PaymentStatus, to: PaymentStatus) -> Result<()> {
    if from.can_transition(to) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition {
            entity: "payment",
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Gateway,
    Cash,
    BankTransfer,
}

/// What a payment settles: exactly one of a registration or a utility
/// bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentTarget {
    Registration(Uuid),
    UtilityBill(Uuid),
}

impl PaymentTarget {
    pub fn registration_id(&self) -> Option<Uuid> {
        match self {
            PaymentTarget::Registration(id) => Some(*id),
            PaymentTarget::UtilityBill(_) => None,
        }
    }

    pub fn bill_id(&self) -> Option<Uuid> {
        match self {
            PaymentTarget::Registration(_) => None,
            PaymentTarget::UtilityBill(id) => Some(*id),
        }
    }
}

/// A payment against a registration or a utility bill. `order_ref` is the
/// unique reference the gateway echoes back in callbacks; it is the
/// serialization point for reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_ref: String,
    pub registration_id: Option<Uuid>,
    pub bill_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub gateway_txn_id: Option<String>,
    pub refund_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(order_ref: String, target: PaymentTarget, amount: Decimal, method: PaymentMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_ref,
            registration_id: target.registration_id(),
            bill_id: target.bill_id(),
            amount,
            method,
            status: PaymentStatus::Created,
            gateway_txn_id: None,
            refund_amount: None,
            created_at: Utc::now(),
            completed_at: None,
            refunded_at: None,
        }
    }

    pub fn target(&self) -> Option<PaymentTarget> {
        match (self.registration_id, self.bill_id) {
            (Some(id), None) => Some(PaymentTarget::Registration(id)),
            (None, Some(id)) => Some(PaymentTarget::UtilityBill(id)),
            _ => None,
        }
    }
}
