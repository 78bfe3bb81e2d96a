//! Orchestration layer. Services compose the atomic store operations,
//! enforce who may call what, and emit logs, metrics and notifications.
//! They never mutate occupancy or payment state outside the store.

mod billing_service;
mod payment_service;
mod reconciliation;
mod registration_service;
mod transfer_service;

pub use billing_service::BillingService;
pub use payment_service::PaymentService;
pub use reconciliation::ReconciliationService;
pub use registration_service::RegistrationService;
pub use transfer_service::TransferService;
