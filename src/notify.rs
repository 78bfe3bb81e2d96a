//! Outbound notifications. Delivery is fire-and-forget: a failed or slow
//! notification never rolls back the state change that triggered it.

use async_trait::async_trait;

use crate::models::{Payment, UtilityBill};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn bill_created(&self, bill: &UtilityBill);
    async fn payment_confirmed(&self, payment: &Payment);
}

/// Default notifier: writes structured log events. A mail or push backend
/// implements the same trait.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn bill_created(&self, bill: &UtilityBill) {
        tracing::info!(
            bill_id = %bill.id,
            room_id = %bill.room_id,
            period = format!("{}/{}", bill.month, bill.year),
            total = %bill.total_amount,
            due_date = %bill.due_date,
            "utility bill issued"
        );
    }

    async fn payment_confirmed(&self, payment: &Payment) {
        tracing::info!(
            payment_id = %payment.id,
            order_ref = %payment.order_ref,
            amount = %payment.amount,
            "payment confirmed"
        );
    }
}
