//! Client-facing registration endpoints.

use super::RegistrationView;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use exam_registration_core::types::{
    RegistrationCode, RegistrationId, RoomId, ScheduleId, SeatId, SubjectId,
};
use serde::Deserialize;
use uuid::Uuid;

/// Body of `POST /api/registrations`.
#[derive(Debug, Deserialize)]
pub struct CreateRegistrationRequest {
    /// Candidate registering
    pub subject_id: Uuid,
    /// Exam sitting
    pub schedule_id: Uuid,
    /// Requested room
    #[serde(default)]
    pub room_id: Option<Uuid>,
    /// Requested seat; requires `room_id`
    #[serde(default)]
    pub seat_id: Option<Uuid>,
}

/// Body of `POST /api/registrations/:id/payment-info`.
#[derive(Debug, Deserialize)]
pub struct PaymentInfoRequest {
    /// Payment method, such as "bank transfer"
    pub payment_method: String,
    /// Reference printed on the payment
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// `POST /api/registrations`: register and hold a place.
///
/// # Errors
///
/// 404 unknown schedule, 409 closed schedule or no capacity or seat taken,
/// 422 invalid placement, 503 storage unavailable.
pub async fn create_registration(
    State(state): State<AppState>,
    Json(request): Json<CreateRegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationView>), AppError> {
    let registration = state
        .engine
        .register(
            SubjectId::from_uuid(request.subject_id),
            ScheduleId::from_uuid(request.schedule_id),
            request.room_id.map(RoomId::from_uuid),
            request.seat_id.map(SeatId::from_uuid),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(registration.into())))
}

/// `GET /api/registrations/:id`
///
/// # Errors
///
/// 404 when no registration has this id.
pub async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RegistrationView>, AppError> {
    let registration = state.engine.get(RegistrationId::from_uuid(id)).await?;
    Ok(Json(registration.into()))
}

/// `GET /api/registrations/code/:code`
///
/// # Errors
///
/// 422 malformed code, 404 unknown code.
pub async fn get_registration_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RegistrationView>, AppError> {
    let code = RegistrationCode::parse(&code).map_err(|e| AppError::validation(e.to_string()))?;
    let registration = state.engine.get_by_code(&code).await?;
    Ok(Json(registration.into()))
}

/// `POST /api/registrations/:id/payment-info`: record the candidate's
/// payment details.
///
/// # Errors
///
/// 422 invalid method or reference, 404 unknown id, 409 cancelled.
pub async fn submit_payment_info(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PaymentInfoRequest>,
) -> Result<Json<RegistrationView>, AppError> {
    let registration = state
        .engine
        .submit_payment_info(
            RegistrationId::from_uuid(id),
            &request.payment_method,
            request.payment_reference.as_deref(),
        )
        .await?;
    Ok(Json(registration.into()))
}

/// `POST /api/registrations/:id/cancel`
///
/// # Errors
///
/// 404 unknown id, 409 already cancelled or modified concurrently.
pub async fn cancel_registration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RegistrationView>, AppError> {
    let registration = state.engine.cancel(RegistrationId::from_uuid(id)).await?;
    Ok(Json(registration.into()))
}
