//! Axum HTTP surface for the exam registration engine.
//!
//! # Routes
//!
//! ```text
//! POST    /webhooks/payment                         payment provider notifications
//! OPTIONS *                                         answered by the CORS layer
//! POST    /api/registrations                        register (201)
//! GET     /api/registrations/:id
//! GET     /api/registrations/code/:code
//! POST    /api/registrations/:id/payment-info
//! POST    /api/registrations/:id/cancel
//! POST    /api/admin/payments/verify                bearer admin token
//! POST    /api/admin/registrations/:id/release-hold bearer admin token
//! GET     /health                                   liveness
//! GET     /ready                                    storage ping
//! ```
//!
//! # Example
//!
//! ```ignore
//! use exam_registration_web::{AppState, RouterConfig, build_router};
//!
//! let state = AppState::new(engine, reconciler, admin_token);
//! let app = build_router(state, &RouterConfig::default());
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    routing::{get, post},
};
use exam_registration_core::reconciler::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::AdminAuth;
pub use state::AppState;

/// Cross-cutting HTTP settings.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Requests running longer are answered with 408
    pub request_timeout: Duration,
    /// Allowed CORS origins; empty allows any origin
    pub cors_allowed_origins: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderName::from_static(TIMESTAMP_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
}

/// Build the application router with its middleware stack.
///
/// Every response carries an `x-request-id` header, taken from the request
/// or generated.
pub fn build_router(state: AppState, config: &RouterConfig) -> Router {
    let api = Router::new()
        .route("/registrations", post(handlers::registrations::create_registration))
        .route("/registrations/:id", get(handlers::registrations::get_registration))
        .route(
            "/registrations/code/:code",
            get(handlers::registrations::get_registration_by_code),
        )
        .route(
            "/registrations/:id/payment-info",
            post(handlers::registrations::submit_payment_info),
        )
        .route(
            "/registrations/:id/cancel",
            post(handlers::registrations::cancel_registration),
        )
        .route("/admin/payments/verify", post(handlers::admin::verify_payment))
        .route(
            "/admin/registrations/:id/release-hold",
            post(handlers::admin::release_hold),
        );

    Router::new()
        .route("/webhooks/payment", post(handlers::webhook::payment_webhook))
        .nest("/api", api)
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(&config.cors_allowed_origins))
                .layer(TimeoutLayer::new(config.request_timeout)),
        )
        .with_state(state)
}
