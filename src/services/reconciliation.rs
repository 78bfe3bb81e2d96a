//! Payment reconciliation: turns verified gateway callbacks into payment
//! state, exactly once per order reference.
//!
//! The IPN handler never returns an error across the HTTP boundary; every
//! path reduces to a two-character response code the gateway retries on or
//! accepts.

use std::sync::Arc;

use metrics::counter;

use crate::error::{AppError, Result};
use crate::gateway::{self, GatewayConfig, IpnResponseCode};
use crate::models::{Payment, PaymentStatus};
use crate::notify::Notifier;
use crate::store::{CallbackApply, CallbackOutcome, CallbackParams, DormStore};

pub struct ReconciliationService {
    store: Arc<dyn DormStore>,
    gateway: GatewayConfig,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn DormStore>,
        gateway: GatewayConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Processes an IPN delivery. Signature verification comes first: a
    /// tampered callback is rejected with `97` before any state is read.
    /// Redelivery of an already-settled order is acknowledged with `02`
    /// without touching anything.
    pub async fn handle_ipn(&self, params: &CallbackParams) -> IpnResponseCode {
        let code = self.process_ipn(params).await;
        counter!("ipn_callbacks_total", "code" => code.as_str()).increment(1);
        code
    }

    async fn process_ipn(&self, params: &CallbackParams) -> IpnResponseCode {
        if let Err(err) = gateway::verify_callback(&self.gateway, params) {
            tracing::warn!(error = %err, "IPN rejected: bad signature");
            return IpnResponseCode::InvalidSignature;
        }

        let data = match gateway::parse_callback(&self.gateway, params) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "IPN rejected: malformed callback");
                return IpnResponseCode::Failure;
            }
        };

        let outcome = self
            .store
            .apply_gateway_callback(CallbackApply {
                order_ref: data.order_ref.clone(),
                amount: data.amount,
                txn_id: data.txn_id.clone(),
                gateway_success: data.is_success(),
            })
            .await;

        match outcome {
            Ok(CallbackOutcome::Applied(payment)) => {
                tracing::info!(
                    order_ref = %payment.order_ref,
                    status = ?payment.status,
                    txn_id = %data.txn_id,
                    "IPN applied"
                );
                if payment.status == PaymentStatus::Success {
                    self.notifier.payment_confirmed(&payment).await;
                }
                IpnResponseCode::Ok
            }
            Ok(CallbackOutcome::AlreadyFinal(payment)) => {
                tracing::info!(
                    order_ref = %payment.order_ref,
                    status = ?payment.status,
                    "IPN redelivery acknowledged"
                );
                IpnResponseCode::AlreadyConfirmed
            }
            Ok(CallbackOutcome::NotFound) => {
                tracing::warn!(order_ref = %data.order_ref, "IPN for unknown order");
                IpnResponseCode::OrderNotFound
            }
            Ok(CallbackOutcome::AmountMismatch { expected, received }) => {
                tracing::warn!(
                    order_ref = %data.order_ref,
                    %expected,
                    %received,
                    "IPN amount mismatch"
                );
                IpnResponseCode::AmountMismatch
            }
            Ok(CallbackOutcome::Contract(reason)) => {
                tracing::error!(order_ref = %data.order_ref, %reason, "IPN contract violation");
                IpnResponseCode::Failure
            }
            Err(err) => {
                tracing::error!(order_ref = %data.order_ref, error = %err, "IPN processing failed");
                IpnResponseCode::Failure
            }
        }
    }

    /// Handles the browser return leg: verifies the signature and returns
    /// the payment's current state. The IPN channel is authoritative; this
    /// never mutates anything.
    pub async fn handle_return(&self, params: &CallbackParams) -> Result<Payment> {
        gateway::verify_callback(&self.gateway, params)?;
        let data = gateway::parse_callback(&self.gateway, params)?;
        self.store
            .payment_by_order_ref(&data.order_ref)
            .await?
            .ok_or_else(|| AppError::NotFound("payment".into()))
    }
}
