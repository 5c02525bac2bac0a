//! Operator endpoints, guarded by [`AdminAuth`].

use super::RegistrationView;
use crate::error::AppError;
use crate::extractors::AdminAuth;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use exam_registration_core::engine::validate_payment_reference;
use exam_registration_core::types::{RegistrationCode, RegistrationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /api/admin/payments/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyPaymentRequest {
    /// Code of the registration whose payment was checked
    pub registration_code: String,
    /// Reference found on the settled payment
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Result of a manual verification.
#[derive(Debug, Serialize)]
pub struct VerifyPaymentResponse {
    /// `false` when the payment was already marked paid
    pub applied: bool,
    /// Registration after the call
    pub registration: RegistrationView,
}

/// Result of a hold release.
#[derive(Debug, Serialize)]
pub struct ReleaseHoldResponse {
    /// `false` when no hold was left to release
    pub released: bool,
}

/// `POST /api/admin/payments/verify`: mark a payment as settled by hand.
///
/// # Errors
///
/// 401/403 admin auth, 422 malformed code or reference, 404 unknown code,
/// 409 cancelled registration or illegal transition.
pub async fn verify_payment(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, AppError> {
    let code = RegistrationCode::parse(&request.registration_code)
        .map_err(|e| AppError::validation(e.to_string()))?;
    let reference = request
        .payment_reference
        .as_deref()
        .map(validate_payment_reference)
        .transpose()?;

    let outcome = state.engine.verify_payment_manually(&code, reference).await?;
    Ok(Json(VerifyPaymentResponse {
        applied: outcome.is_applied(),
        registration: outcome.into_registration().into(),
    }))
}

/// `POST /api/admin/registrations/:id/release-hold`: re-drive the hold
/// release of a cancelled registration.
///
/// # Errors
///
/// 401/403 admin auth, 404 unknown id, 409 registration still active.
pub async fn release_hold(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReleaseHoldResponse>, AppError> {
    let released = state
        .engine
        .release_hold(RegistrationId::from_uuid(id))
        .await?;
    Ok(Json(ReleaseHoldResponse { released }))
}
