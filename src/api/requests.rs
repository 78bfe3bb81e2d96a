use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::PaymentMethod;

/// Request to register a student for a room. `semester` uses the wire form
/// (`HK1-2025`); when absent the semester is derived from today's date.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRegistrationRequest {
    pub student_id: Uuid,
    pub room_id: Uuid,
    pub bed_id: Option<Uuid>,
    pub semester: Option<String>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RejectRegistrationRequest {
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTransferRequest {
    pub registration_id: Uuid,
    pub to_room_id: Uuid,
    pub to_bed_id: Option<Uuid>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetRateRequest {
    pub electricity_rate: Decimal,
    pub water_rate: Decimal,
    pub effective_from: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordReadingRequest {
    #[validate(range(min = 1, max = 12))]
    pub month: i32,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    pub electricity: Decimal,
    pub water: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ComputeBillRequest {
    #[validate(range(min = 1, max = 12))]
    pub month: i32,
    #[validate(range(min = 2000, max = 2100))]
    pub year: i32,
    pub due_date: NaiveDate,
}

/// Defaults to today when `as_of` is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkOverdueRequest {
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IssueRedirectRequest {
    #[validate(length(min = 1, max = 255))]
    pub order_info: String,
    #[validate(length(min = 1, max = 45))]
    pub client_ip: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
}
