//! Payment webhook reconciliation.
//!
//! A delivery is handled in a fixed order:
//!
//! 1. Authenticate: HMAC-SHA-256 over `"{timestamp}.{raw_body}"` with the
//!    shared secret, compared in constant time.
//! 2. Freshness: the timestamp must lie within the tolerance window
//!    (5 minutes by default) of the engine clock.
//! 3. Parse and validate the payload.
//! 4. Apply it through [`RegistrationEngine::transition_payment`], which is
//!    idempotent on the payment status, so at-least-once redelivery needs no
//!    extra deduplication state.
//!
//! Without a configured secret the reconciler still works but runs in
//! [`TrustMode::Unauthenticated`], which is logged at `warn` on construction
//! and on every delivery, and exported as a gauge.

use crate::engine::RegistrationEngine;
use crate::error::{ErrorClass, RegistrationError};
use crate::metrics as names;
use crate::types::{PaymentStatus, Registration, RegistrationCode};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{Duration, Instant};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Header carrying the Unix timestamp (seconds) the signature covers.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
/// Default replay window.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);
/// Longest accepted `payment_reference` / `transaction_id`, in characters.
pub const MAX_REFERENCE_LEN: usize = 100;

/// Why a delivery failed authentication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No signature header
    #[error("missing webhook signature")]
    MissingSignature,
    /// No timestamp header
    #[error("missing webhook timestamp")]
    MissingTimestamp,
    /// Timestamp is not an integer number of seconds
    #[error("malformed webhook timestamp")]
    MalformedTimestamp,
    /// Signature is not hex
    #[error("malformed webhook signature")]
    MalformedSignature,
    /// Signature does not match the body
    #[error("webhook signature mismatch")]
    SignatureMismatch,
    /// Timestamp outside the replay window
    #[error("webhook timestamp outside tolerance ({skew_secs}s skew)")]
    StaleTimestamp {
        /// Distance between the sender's timestamp and our clock
        skew_secs: u64,
    },
}

impl AuthError {
    /// Metric label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::MissingTimestamp => "missing_timestamp",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::MalformedSignature => "malformed_signature",
            Self::SignatureMismatch => "signature_mismatch",
            Self::StaleTimestamp { .. } => "stale_timestamp",
        }
    }
}

/// How much a verified delivery can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustMode {
    /// Signature and freshness were checked
    Verified,
    /// No secret is configured; nothing was checked
    Unauthenticated,
}

/// Checks signature and freshness of deliveries.
#[derive(Clone, Debug)]
pub struct WebhookVerifier {
    secret: Option<SecretString>,
    tolerance: Duration,
}

impl WebhookVerifier {
    /// Create a verifier. An absent or empty secret selects
    /// [`TrustMode::Unauthenticated`].
    #[must_use]
    pub fn new(secret: Option<SecretString>, tolerance: Duration) -> Self {
        let secret = secret.filter(|s| !s.expose_secret().trim().is_empty());

        if secret.is_none() {
            tracing::warn!(
                security_event = true,
                "PAYMENT_WEBHOOK_SECRET not set: webhooks are accepted WITHOUT authentication"
            );
            metrics::gauge!(names::WEBHOOK_UNAUTHENTICATED).set(1.0);
        } else {
            metrics::gauge!(names::WEBHOOK_UNAUTHENTICATED).set(0.0);
        }

        Self { secret, tolerance }
    }

    /// Current trust mode.
    #[must_use]
    pub const fn trust_mode(&self) -> TrustMode {
        if self.secret.is_some() {
            TrustMode::Verified
        } else {
            TrustMode::Unauthenticated
        }
    }

    /// Configured replay window.
    #[must_use]
    pub const fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Authenticate a delivery.
    ///
    /// The signature is checked before the timestamp, so a forged request
    /// learns nothing about the accepted window.
    ///
    /// # Errors
    ///
    /// An [`AuthError`] describing the first failed check.
    pub fn verify(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<TrustMode, AuthError> {
        let Some(secret) = &self.secret else {
            return Ok(TrustMode::Unauthenticated);
        };

        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingSignature)?;
        let timestamp = timestamp
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingTimestamp)?;
        let sent_at: i64 = timestamp
            .parse()
            .map_err(|_| AuthError::MalformedTimestamp)?;

        let hex_tag = signature.strip_prefix("sha256=").unwrap_or(signature);
        let tag = hex::decode(hex_tag).map_err(|_| AuthError::MalformedSignature)?;

        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| AuthError::SignatureMismatch)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&tag)
            .map_err(|_| AuthError::SignatureMismatch)?;

        let skew_secs = now.timestamp().saturating_sub(sent_at).unsigned_abs();
        if skew_secs > self.tolerance.as_secs() {
            return Err(AuthError::StaleTimestamp { skew_secs });
        }

        Ok(TrustMode::Verified)
    }
}

/// A validated payment notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentNotification {
    /// Registration the payment is for
    pub registration_code: RegistrationCode,
    /// Asserted payment outcome
    pub payment_status: PaymentStatus,
    /// Provider payment reference
    pub payment_reference: Option<String>,
    /// Provider transaction id
    pub transaction_id: Option<String>,
}

#[derive(Deserialize)]
struct RawNotification {
    registration_code: Option<String>,
    payment_status: Option<String>,
    payment_reference: Option<String>,
    transaction_id: Option<String>,
}

/// Malformed webhook body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PayloadError(pub String);

impl PaymentNotification {
    /// Parse and validate a raw JSON body. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// [`PayloadError`] naming the first invalid field.
    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let raw: RawNotification = serde_json::from_slice(body)
            .map_err(|e| PayloadError(format!("body is not a valid notification: {e}")))?;

        let registration_code = raw
            .registration_code
            .as_deref()
            .ok_or_else(|| PayloadError("registration_code is required".into()))
            .and_then(|c| {
                RegistrationCode::parse(c).map_err(|e| PayloadError(e.to_string()))
            })?;

        let payment_status = raw
            .payment_status
            .as_deref()
            .ok_or_else(|| PayloadError("payment_status is required".into()))
            .and_then(|s| {
                PaymentStatus::parse(s).ok_or_else(|| {
                    PayloadError(
                        "payment_status must be one of pending, paid, failed, refunded".into(),
                    )
                })
            })?;

        Ok(Self {
            registration_code,
            payment_status,
            payment_reference: bounded_field("payment_reference", raw.payment_reference)?,
            transaction_id: bounded_field("transaction_id", raw.transaction_id)?,
        })
    }

    /// Reference recorded on the registration: the payment reference, or the
    /// transaction id when none was sent.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.payment_reference
            .as_deref()
            .or(self.transaction_id.as_deref())
    }
}

fn bounded_field(name: &str, value: Option<String>) -> Result<Option<String>, PayloadError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > MAX_REFERENCE_LEN {
        return Err(PayloadError(format!(
            "{name} must be at most {MAX_REFERENCE_LEN} characters"
        )));
    }
    Ok(Some(value.to_string()))
}

/// A successfully reconciled delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Registration after the call
    pub registration: Registration,
    /// Whether the delivery changed anything
    pub applied: bool,
    /// How the delivery was authenticated
    pub trust: TrustMode,
}

/// Why a delivery was not applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Authentication failed; do not retry with the same credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// The body is malformed; do not retry.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// No registration carries the code; permanent.
    #[error("registration not found")]
    NotFound,

    /// The registration is cancelled or the move is not legal; permanent.
    #[error("conflict: {0}")]
    Conflict(RegistrationError),

    /// Storage failed or timed out; retry with backoff.
    #[error("transient failure: {0}")]
    Transient(RegistrationError),
}

impl ReconcileError {
    /// Error class of this failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthorized(_) => ErrorClass::Authorization,
            Self::InvalidPayload(_) => ErrorClass::Validation,
            Self::NotFound => ErrorClass::NotFound,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::Transient(e) => e.class(),
        }
    }

    /// Only transient failures are worth redelivering.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Metric label.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Transient(_) => "transient",
        }
    }
}

impl From<RegistrationError> for ReconcileError {
    fn from(error: RegistrationError) -> Self {
        match error.class() {
            ErrorClass::NotFound => Self::NotFound,
            ErrorClass::Conflict => Self::Conflict(error),
            ErrorClass::Validation => Self::InvalidPayload(error.public_message()),
            ErrorClass::Authorization | ErrorClass::Transient | ErrorClass::Internal => {
                Self::Transient(error)
            }
        }
    }
}

/// Maps authenticated payment notifications onto the engine.
#[derive(Clone)]
pub struct Reconciler {
    engine: RegistrationEngine,
    verifier: WebhookVerifier,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub const fn new(engine: RegistrationEngine, verifier: WebhookVerifier) -> Self {
        Self { engine, verifier }
    }

    /// The verifier in use.
    #[must_use]
    pub const fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Handle one delivery: `signature` and `timestamp` are the raw header
    /// values, `body` the raw request body exactly as received.
    ///
    /// # Errors
    ///
    /// A [`ReconcileError`] distinguishing authentication, payload, not-found,
    /// conflict and transient failures. No state changes on error.
    pub async fn reconcile(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let started = Instant::now();
        let result = self.try_reconcile(signature, timestamp, body).await;

        let outcome = match &result {
            Ok(o) if o.applied => "applied",
            Ok(_) => "unchanged",
            Err(e) => e.outcome(),
        };
        metrics::counter!(names::WEBHOOKS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(names::WEBHOOK_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_reconcile(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &[u8],
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let now = self.engine.clock().now();
        let trust = match self.verifier.verify(signature, timestamp, body, now) {
            Ok(trust) => trust,
            Err(e) => {
                metrics::counter!(names::WEBHOOK_AUTH_FAILURES_TOTAL, "reason" => e.reason())
                    .increment(1);
                tracing::warn!(
                    security_event = true,
                    reason = e.reason(),
                    error = %e,
                    "payment webhook rejected"
                );
                return Err(e.into());
            }
        };
        if trust == TrustMode::Unauthenticated {
            tracing::warn!(
                security_event = true,
                "processing payment webhook without signature verification"
            );
        }

        let notification = PaymentNotification::parse(body).map_err(|e| {
            tracing::info!(error = %e, "payment webhook payload rejected");
            ReconcileError::InvalidPayload(e.0)
        })?;

        let outcome = self
            .engine
            .transition_payment(
                &notification.registration_code,
                notification.payment_status,
                notification.reference().map(str::to_string),
            )
            .await
            .map_err(|e| {
                let error = ReconcileError::from(e);
                if error.is_retryable() {
                    tracing::error!(
                        registration_code = %notification.registration_code,
                        error = %error,
                        "payment webhook failed"
                    );
                } else {
                    tracing::info!(
                        registration_code = %notification.registration_code,
                        error = %error,
                        "payment webhook not applied"
                    );
                }
                error
            })?;

        let applied = outcome.is_applied();
        tracing::info!(
            registration_code = %notification.registration_code,
            payment_status = %notification.payment_status,
            applied,
            "payment webhook reconciled"
        );

        Ok(ReconcileOutcome {
            registration: outcome.into_registration(),
            applied,
            trust,
        })
    }
}
