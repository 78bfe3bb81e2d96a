use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::gateway::{self, GatewayConfig};
use crate::models::{
    Payment, PaymentMethod, PaymentStatus, PaymentTarget, Principal, RegistrationStatus,
};
use crate::store::DormStore;

pub struct PaymentService {
    store: Arc<dyn DormStore>,
    gateway: GatewayConfig,
}

impl PaymentService {
    pub fn new(store: Arc<dyn DormStore>, gateway: GatewayConfig) -> Self {
        Self { store, gateway }
    }

    /// Creates a payment for a confirmed registration. The amount is the
    /// room's per-term price; callers never supply it.
    pub async fn create_for_registration(
        &self,
        principal: &Principal,
        registration_id: Uuid,
        method: PaymentMethod,
    ) -> Result<Payment> {
        let registration = self
            .store
            .registration(registration_id)
            .await?
            .ok_or_else(|| AppError::NotFound("registration".into()))?;
        if !principal.can_act_for(registration.student_id) {
            return Err(AppError::Forbidden(
                "only the owner or an administrator can pay for a registration".into(),
            ));
        }
        if registration.status != RegistrationStatus::Confirmed {
            return Err(AppError::Validation(format!(
                "only a confirmed registration can be paid, found {:?}",
                registration.status
            )));
        }

        let room = self
            .store
            .room(registration.room_id)
            .await?
            .ok_or_else(|| AppError::NotFound("room".into()))?;

        let payment = self
            .store
            .create_payment(Payment::new(
                new_order_ref(),
                PaymentTarget::Registration(registration.id),
                room.price_per_term,
                method,
            ))
            .await?;

        counter!("payments_total", "action" => "created").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            order_ref = %payment.order_ref,
            registration_id = %registration_id,
            amount = %payment.amount,
            "payment created for registration"
        );
        Ok(payment)
    }

    /// Creates a payment for a payable utility bill, amount taken from the
    /// bill total.
    pub async fn create_for_bill(
        &self,
        _principal: &Principal,
        bill_id: Uuid,
        method: PaymentMethod,
    ) -> Result<Payment> {
        let bill = self
            .store
            .bill(bill_id)
            .await?
            .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
        if !bill.status.is_payable() {
            return Err(AppError::Validation(format!(
                "bill is not payable in status {:?}",
                bill.status
            )));
        }

        let payment = self
            .store
            .create_payment(Payment::new(
                new_order_ref(),
                PaymentTarget::UtilityBill(bill.id),
                bill.total_amount,
                method,
            ))
            .await?;

        counter!("payments_total", "action" => "created").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            order_ref = %payment.order_ref,
            bill_id = %bill_id,
            amount = %payment.amount,
            "payment created for bill"
        );
        Ok(payment)
    }

    /// Hands the payment to the gateway: moves it to PENDING_GATEWAY and
    /// returns the signed redirect URL. Registration payments belong to
    /// their student; only the owner or an administrator gets the URL.
    pub async fn issue_redirect(
        &self,
        principal: &Principal,
        payment_id: Uuid,
        order_info: &str,
        client_ip: &str,
    ) -> Result<String> {
        let payment = self
            .store
            .payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("payment".into()))?;
        if let Some(registration_id) = payment.registration_id {
            let registration = self
                .store
                .registration(registration_id)
                .await?
                .ok_or_else(|| AppError::NotFound("registration".into()))?;
            if !principal.can_act_for(registration.student_id) {
                return Err(AppError::Forbidden(
                    "only the owner or an administrator can request the redirect".into(),
                ));
            }
        }

        let payment = self.store.mark_payment_pending(payment_id).await?;
        let url = gateway::build_redirect(&self.gateway, &payment, order_info, client_ip, Utc::now())?;

        counter!("payments_total", "action" => "redirected").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            order_ref = %payment.order_ref,
            "payment handed to gateway"
        );
        Ok(url)
    }

    /// Refunds a successful payment, full or partial. Admin only.
    pub async fn refund(
        &self,
        principal: &Principal,
        payment_id: Uuid,
        amount: Decimal,
    ) -> Result<Payment> {
        principal.require_admin()?;
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(
                "refund amount must be positive".into(),
            ));
        }

        let payment = self.store.refund_payment(payment_id, amount).await?;
        debug_assert_eq!(payment.status, PaymentStatus::Refunded);

        counter!("payments_total", "action" => "refunded").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            order_ref = %payment.order_ref,
            refund = %amount,
            "payment refunded"
        );
        Ok(payment)
    }
}

fn new_order_ref() -> String {
    format!("DORM{}", Uuid::new_v4().simple())
}
