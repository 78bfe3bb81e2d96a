use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::gateway::GatewayConfig;
use crate::notify::Notifier;
use crate::services::{
    BillingService, PaymentService, ReconciliationService, RegistrationService, TransferService,
};
use crate::store::DormStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DormStore>,
    pub registrations: Arc<RegistrationService>,
    pub transfers: Arc<TransferService>,
    pub billing: Arc<BillingService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DormStore>,
        gateway: GatewayConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registrations: Arc::new(RegistrationService::new(store.clone())),
            transfers: Arc::new(TransferService::new(store.clone())),
            billing: Arc::new(BillingService::new(
                store.clone(),
                notifier.clone(),
                gateway.currency_decimals,
            )),
            payments: Arc::new(PaymentService::new(store.clone(), gateway.clone())),
            reconciliation: Arc::new(ReconciliationService::new(
                store.clone(),
                gateway,
                notifier,
            )),
            store,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Inventory
        .route("/rooms/:id", get(handlers::get_room))
        .route("/rooms/:id/beds", get(handlers::get_room_beds))
        // Registrations
        .route("/registrations", post(handlers::create_registration))
        .route("/registrations/:id", get(handlers::get_registration))
        .route("/registrations/:id/confirm", post(handlers::confirm_registration))
        .route("/registrations/:id/reject", post(handlers::reject_registration))
        .route("/registrations/:id/cancel", post(handlers::cancel_registration))
        .route("/registrations/:id/extend", post(handlers::extend_registration))
        .route("/registrations/:id/payments", post(handlers::create_registration_payment))
        // Transfers
        .route("/transfers", post(handlers::create_transfer))
        .route("/transfers/:id", get(handlers::get_transfer))
        .route("/transfers/:id/approve", post(handlers::approve_transfer))
        .route("/transfers/:id/reject", post(handlers::reject_transfer))
        .route("/transfers/:id/complete", post(handlers::complete_transfer))
        // Utility billing
        .route("/rates", post(handlers::set_rate))
        .route("/rooms/:id/readings", post(handlers::record_reading))
        .route("/rooms/:id/bills", post(handlers::compute_bill))
        .route("/bills/overdue", post(handlers::mark_bills_overdue))
        .route("/bills/:id", get(handlers::get_bill))
        .route("/bills/:id/cancel", post(handlers::cancel_bill))
        .route("/bills/:id/payments", post(handlers::create_bill_payment))
        // Payments and gateway legs
        .route("/payments/:id", get(handlers::get_payment))
        .route("/payments/:id/redirect", post(handlers::issue_redirect))
        .route("/payments/:id/refund", post(handlers::refund_payment))
        .route("/payments/ipn", get(handlers::gateway_ipn))
        .route("/payments/return", get(handlers::gateway_return))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
