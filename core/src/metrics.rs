//! Metric names and descriptions.
//!
//! Components record through the `metrics` facade; whichever recorder the
//! binary installs (Prometheus in production, none in tests) receives them.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// `Register` attempts, labelled by `outcome`.
pub const REGISTRATIONS_TOTAL: &str = "registration_register_total";
/// Code collisions reported by storage.
pub const CODE_COLLISIONS_TOTAL: &str = "registration_code_collisions_total";
/// Payment transitions, labelled by `to`, `source` and `outcome`.
pub const PAYMENT_TRANSITIONS_TOTAL: &str = "registration_payment_transitions_total";
/// Committed cancellations.
pub const CANCELLATIONS_TOTAL: &str = "registration_cancellations_total";
/// Hold releases that failed after a committed cancellation.
pub const HOLD_RELEASE_FAILURES_TOTAL: &str = "registration_hold_release_failures_total";
/// Storage calls that exceeded their bound.
pub const STORAGE_TIMEOUTS_TOTAL: &str = "registration_storage_timeouts_total";
/// Optimistic concurrency retries inside the engine.
pub const TRANSITION_RETRIES_TOTAL: &str = "registration_transition_retries_total";
/// Webhook deliveries, labelled by `outcome`.
pub const WEBHOOKS_TOTAL: &str = "registration_webhooks_total";
/// Webhook authentication failures, labelled by `reason`.
pub const WEBHOOK_AUTH_FAILURES_TOTAL: &str = "registration_webhook_auth_failures_total";
/// 1 when the reconciler runs without a shared secret.
pub const WEBHOOK_UNAUTHENTICATED: &str = "registration_webhook_unauthenticated";
/// End-to-end webhook handling time.
pub const WEBHOOK_DURATION_SECONDS: &str = "registration_webhook_duration_seconds";

/// Register all metric descriptions.
///
/// Call once after installing a recorder.
pub fn register_metrics() {
    // Registration engine
    describe_counter!(REGISTRATIONS_TOTAL, "Register attempts by outcome");
    describe_counter!(
        CODE_COLLISIONS_TOTAL,
        "Generated registration codes rejected as duplicates by storage"
    );
    describe_counter!(
        PAYMENT_TRANSITIONS_TOTAL,
        "Payment transitions by target status, source and outcome"
    );
    describe_counter!(CANCELLATIONS_TOTAL, "Registrations cancelled");
    describe_counter!(
        HOLD_RELEASE_FAILURES_TOTAL,
        "Capacity holds that could not be released after cancellation"
    );
    describe_counter!(
        STORAGE_TIMEOUTS_TOTAL,
        "Storage calls that did not complete within the configured timeout"
    );
    describe_counter!(
        TRANSITION_RETRIES_TOTAL,
        "Conditional updates retried after a concurrent write"
    );

    // Webhook reconciler
    describe_counter!(WEBHOOKS_TOTAL, "Payment webhook deliveries by outcome");
    describe_counter!(
        WEBHOOK_AUTH_FAILURES_TOTAL,
        "Payment webhooks rejected during authentication"
    );
    describe_gauge!(
        WEBHOOK_UNAUTHENTICATED,
        "1 when payment webhooks are accepted without signature verification"
    );
    describe_histogram!(
        WEBHOOK_DURATION_SECONDS,
        "Time taken to reconcile a payment webhook"
    );
}
