use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::api::requests::{
    ComputeBillRequest, CreatePaymentRequest, CreateRegistrationRequest, CreateTransferRequest,
    IssueRedirectRequest, MarkOverdueRequest, RecordReadingRequest, RefundRequest,
    RejectRegistrationRequest, SetRateRequest,
};
use crate::api::responses::{
    ApiResponse, HealthResponse, OverdueSweepResponse, RedirectResponse,
};
use crate::error::{AppError, Result};
use crate::gateway::{self, IpnResponseCode};
use crate::models::{
    Bed, MeterReading, Payment, Principal, Registration, Room, Semester, TransferRequest,
    UtilityBill, UtilityRate,
};
use crate::store::CallbackParams;

use super::routes::AppState;

/// Resolves the caller from the `x-role` / `x-student-id` headers. Session
/// issuance lives outside this service; the headers carry the already
/// authenticated identity.
fn principal(headers: &HeaderMap) -> Result<Principal> {
    let role = headers
        .get("x-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("student");
    match role {
        "admin" => Ok(Principal::admin()),
        "student" => {
            let raw = headers
                .get("x-student-id")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AppError::Forbidden("the x-student-id header is required".into())
                })?;
            let student_id = Uuid::parse_str(raw)
                .map_err(|_| AppError::Validation("malformed x-student-id header".into()))?;
            Ok(Principal::student(student_id))
        }
        other => Err(AppError::Validation(format!("unknown role '{other}'"))),
    }
}

fn validated<T: Validate>(request: &T) -> Result<()> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}

/// Health check endpoint.
pub async fn health_check() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    }))
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> std::result::Result<String, StatusCode> {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}

// ============================================================================
// Inventory
// ============================================================================

pub async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Room>>> {
    let room = state
        .store
        .room(id)
        .await?
        .ok_or_else(|| AppError::NotFound("room".into()))?;
    Ok(Json(ApiResponse::success(room)))
}

pub async fn get_room_beds(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Bed>>>> {
    let beds = state.store.beds_in_room(id).await?;
    Ok(Json(ApiResponse::success(beds)))
}

// ============================================================================
// Registrations
// ============================================================================

pub async fn create_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Registration>>)> {
    validated(&request)?;
    let caller = principal(&headers)?;

    let semester = match request.semester {
        Some(raw) => raw.parse::<Semester>().map_err(AppError::Validation)?,
        None => Semester::for_date(Utc::now().date_naive()),
    };

    let registration = state
        .registrations
        .register(
            &caller,
            request.student_id,
            request.room_id,
            request.bed_id,
            semester,
            request.note,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(registration))))
}

pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Registration>>> {
    let registration = state
        .store
        .registration(id)
        .await?
        .ok_or_else(|| AppError::NotFound("registration".into()))?;
    Ok(Json(ApiResponse::success(registration)))
}

pub async fn confirm_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Registration>>> {
    let caller = principal(&headers)?;
    let registration = state.registrations.confirm(&caller, id).await?;
    Ok(Json(ApiResponse::success(registration)))
}

pub async fn reject_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRegistrationRequest>,
) -> Result<Json<ApiResponse<Registration>>> {
    validated(&request)?;
    let caller = principal(&headers)?;
    let registration = state.registrations.reject(&caller, id, request.note).await?;
    Ok(Json(ApiResponse::success(registration)))
}

pub async fn cancel_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Registration>>> {
    let caller = principal(&headers)?;
    let registration = state.registrations.cancel(&caller, id).await?;
    Ok(Json(ApiResponse::success(registration)))
}

pub async fn extend_registration(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<Registration>>)> {
    let caller = principal(&headers)?;
    let registration = state.registrations.extend(&caller, id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(registration))))
}

// ============================================================================
// Transfers
// ============================================================================

pub async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TransferRequest>>)> {
    validated(&request)?;
    let caller = principal(&headers)?;
    let transfer = state
        .transfers
        .request(
            &caller,
            request.registration_id,
            request.to_room_id,
            request.to_bed_id,
            request.reason,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(transfer))))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransferRequest>>> {
    let transfer = state
        .store
        .transfer_request(id)
        .await?
        .ok_or_else(|| AppError::NotFound("transfer request".into()))?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn approve_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransferRequest>>> {
    let caller = principal(&headers)?;
    let transfer = state.transfers.approve(&caller, id).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn reject_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransferRequest>>> {
    let caller = principal(&headers)?;
    let transfer = state.transfers.reject(&caller, id).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

pub async fn complete_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransferRequest>>> {
    let caller = principal(&headers)?;
    let transfer = state.transfers.complete(&caller, id).await?;
    Ok(Json(ApiResponse::success(transfer)))
}

// ============================================================================
// Utility billing
// ============================================================================

pub async fn set_rate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetRateRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UtilityRate>>)> {
    let caller = principal(&headers)?;
    let rate = state
        .billing
        .set_rate(
            &caller,
            request.electricity_rate,
            request.water_rate,
            request.effective_from,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(rate))))
}

pub async fn record_reading(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Json(request): Json<RecordReadingRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MeterReading>>)> {
    validated(&request)?;
    let caller = principal(&headers)?;
    let reading = state
        .billing
        .record_reading(
            &caller,
            room_id,
            request.month,
            request.year,
            request.electricity,
            request.water,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(reading))))
}

pub async fn compute_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Json(request): Json<ComputeBillRequest>,
) -> Result<(StatusCode, Json<ApiResponse<UtilityBill>>)> {
    validated(&request)?;
    let caller = principal(&headers)?;
    let bill = state
        .billing
        .compute_bill(&caller, room_id, request.month, request.year, request.due_date)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(bill))))
}

pub async fn mark_bills_overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<MarkOverdueRequest>,
) -> Result<Json<ApiResponse<OverdueSweepResponse>>> {
    let caller = principal(&headers)?;
    let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());
    let updated = state.billing.mark_overdue(&caller, as_of).await?;
    Ok(Json(ApiResponse::success(OverdueSweepResponse { updated })))
}

pub async fn get_bill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<UtilityBill>>> {
    let bill = state
        .store
        .bill(id)
        .await?
        .ok_or_else(|| AppError::NotFound("utility bill".into()))?;
    Ok(Json(ApiResponse::success(bill)))
}

pub async fn cancel_bill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<UtilityBill>>> {
    let caller = principal(&headers)?;
    let bill = state.billing.cancel_bill(&caller, id).await?;
    Ok(Json(ApiResponse::success(bill)))
}

// ============================================================================
// Payments
// ============================================================================

pub async fn create_registration_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(registration_id): Path<Uuid>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Payment>>)> {
    let caller = principal(&headers)?;
    let payment = state
        .payments
        .create_for_registration(&caller, registration_id, request.method)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

pub async fn create_bill_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(bill_id): Path<Uuid>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Payment>>)> {
    let caller = principal(&headers)?;
    let payment = state
        .payments
        .create_for_bill(&caller, bill_id, request.method)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payment))))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Payment>>> {
    let payment = state
        .store
        .payment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("payment".into()))?;
    Ok(Json(ApiResponse::success(payment)))
}

pub async fn issue_redirect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<IssueRedirectRequest>,
) -> Result<Json<ApiResponse<RedirectResponse>>> {
    validated(&request)?;
    let caller = principal(&headers)?;
    let redirect_url = state
        .payments
        .issue_redirect(&caller, id, &request.order_info, &request.client_ip)
        .await?;
    Ok(Json(ApiResponse::success(RedirectResponse { redirect_url })))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<ApiResponse<Payment>>> {
    let caller = principal(&headers)?;
    let payment = state.payments.refund(&caller, id, request.amount).await?;
    Ok(Json(ApiResponse::success(payment)))
}

// ============================================================================
// Gateway legs
// ============================================================================

/// IPN endpoint. Always replies HTTP 200 with the two-character response
/// code as the raw body; the gateway retries on anything else. The query
/// is taken raw and parsed by hand so that a malformed request cannot
/// trip an extractor rejection into a non-200 answer.
pub async fn gateway_ipn(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> (StatusCode, &'static str) {
    let params: CallbackParams = match gateway::parse_query(query.as_deref().unwrap_or("")) {
        Ok(params) => params,
        Err(_) => return (StatusCode::OK, IpnResponseCode::Failure.as_str()),
    };
    let code = state.reconciliation.handle_ipn(&params).await;
    (StatusCode::OK, code.as_str())
}

/// Browser return leg. Verifies the signature and shows the payment's
/// current state; the IPN channel stays authoritative for mutations.
pub async fn gateway_return(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<ApiResponse<Payment>>> {
    let payment = state.reconciliation.handle_return(&params).await?;
    Ok(Json(ApiResponse::success(payment)))
}
