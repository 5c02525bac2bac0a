//! Custom Axum extractors.
//!
//! - `AdminAuth`: bearer-token guard for operator routes

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use secrecy::ExposeSecret;

/// Proof that the request carried the configured admin token.
///
/// Rejects with 403 when no admin token is configured and with 401 when the
/// `Authorization: Bearer <token>` header is missing or wrong. The comparison
/// runs in constant time.
///
/// # Example
///
/// ```ignore
/// async fn handler(_admin: AdminAuth, State(state): State<AppState>) -> StatusCode {
///     StatusCode::NO_CONTENT
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token() else {
            return Err(AppError::forbidden("Admin API is disabled."));
        };

        let provided = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match provided {
            Some(token)
                if constant_time_eq::constant_time_eq(
                    token.as_bytes(),
                    expected.expose_secret().as_bytes(),
                ) =>
            {
                Ok(Self)
            }
            _ => {
                tracing::warn!(
                    security_event = true,
                    path = %parts.uri.path(),
                    "Rejected admin request with missing or invalid token"
                );
                Err(AppError::unauthorized("Invalid admin credentials."))
            }
        }
    }
}
