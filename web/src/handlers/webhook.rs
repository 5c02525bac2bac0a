//! Payment provider webhook.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use exam_registration_core::reconciler::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use exam_registration_core::types::{PaymentStatus, RegistrationStatus};
use serde::Serialize;

/// Acknowledgement sent back to the provider.
///
/// Carries the public code only; internal ids never leave through this route.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Always `true` on a 200
    pub received: bool,
    /// Whether the delivery changed the registration
    pub applied: bool,
    /// Code the delivery referred to
    pub registration_code: String,
    /// Admission status after the delivery
    pub status: RegistrationStatus,
    /// Payment status after the delivery
    pub payment_status: PaymentStatus,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Handle a payment notification.
///
/// The body is taken as raw bytes; the signature covers exactly what was
/// received.
///
/// # Endpoint
///
/// ```text
/// POST /webhooks/payment
/// X-Webhook-Signature: <hex hmac-sha256>
/// X-Webhook-Timestamp: <unix seconds>
/// ```
///
/// # Errors
///
/// 400 invalid payload, 401 authentication failure, 404 unknown code,
/// 409 cancelled registration or rejected transition, 500 transient failure.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let outcome = state
        .reconciler
        .reconcile(
            header(&headers, SIGNATURE_HEADER),
            header(&headers, TIMESTAMP_HEADER),
            &body,
        )
        .await?;

    Ok(Json(WebhookAck {
        received: true,
        applied: outcome.applied,
        registration_code: outcome.registration.registration_code.into(),
        status: outcome.registration.registration_status,
        payment_status: outcome.registration.payment_status,
    }))
}
