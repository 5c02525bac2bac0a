//! Registration lifecycle engine.
//!
//! Owns the registration state machine. Every write after creation is a
//! read, a pure decision, and a [`RegistrationStore::conditional_update`]
//! against the version that was read. A lost race either re-evaluates against
//! the fresh record (payment transitions, payment info) or surfaces as
//! [`RegistrationError::RegistrationChanged`] (cancellation), so concurrent
//! writers never silently overwrite each other.
//!
//! ```text
//!   (pending, pending) ──paid──▶ (confirmed, paid) ──refunded──▶ (cancelled, refunded)
//!        │    ▲                        │
//!     failed  └───paid─── (pending, failed)
//!        │                             │
//!        └──────────cancel─────────────┴──▶ (cancelled, *)   terminal
//! ```

use crate::allocator::CapacityAllocator;
use crate::code::{CodeGenerator, MAX_CODE_ATTEMPTS};
use crate::environment::Clock;
use crate::error::{RegistrationError, Result, StoreError};
use crate::metrics as names;
use crate::store::{RegistrationStore, ReservationToken, ScheduleDirectory, bounded};
use crate::types::{
    PaymentStatus, Registration, RegistrationCode, RegistrationId, RegistrationStatus, RoomId,
    ScheduleId, SeatId, SubjectId,
};
use std::sync::Arc;
use std::time::Duration;

/// Longest accepted payment method label, in characters.
pub const MAX_PAYMENT_METHOD_LEN: usize = 50;
/// Shortest accepted client-submitted payment reference.
pub const MIN_PAYMENT_REFERENCE_LEN: usize = 6;
/// Longest accepted payment reference, in characters.
pub const MAX_PAYMENT_REFERENCE_LEN: usize = 100;

/// Engine tuning.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on every storage and directory call.
    pub storage_timeout: Duration,
    /// Re-reads allowed after a concurrent write before giving up.
    pub max_transition_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(5),
            max_transition_retries: 3,
        }
    }
}

/// Result of a payment transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was committed.
    Applied(Registration),
    /// The registration already had the requested payment status.
    Unchanged(Registration),
}

impl TransitionOutcome {
    /// The registration as stored after the call.
    #[must_use]
    pub const fn registration(&self) -> &Registration {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }

    /// Consume the outcome, keeping the registration.
    #[must_use]
    pub fn into_registration(self) -> Registration {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }

    /// Whether anything was written.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Who asserted a payment outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentSource {
    /// A provider notification through the webhook reconciler
    Webhook,
    /// An operator confirming settlement by hand
    Manual,
}

impl PaymentSource {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Manual => "manual",
        }
    }
}

/// The registration engine.
#[derive(Clone)]
pub struct RegistrationEngine {
    store: Arc<dyn RegistrationStore>,
    directory: Arc<dyn ScheduleDirectory>,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    allocator: CapacityAllocator,
    config: EngineConfig,
}

impl RegistrationEngine {
    /// Wire an engine from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        directory: Arc<dyn ScheduleDirectory>,
        codes: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let allocator = CapacityAllocator::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            config.storage_timeout,
        );
        Self {
            store,
            directory,
            codes,
            clock,
            allocator,
            config,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The clock the engine stamps transitions with.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// The allocator holding capacity for this engine.
    #[must_use]
    pub const fn allocator(&self) -> &CapacityAllocator {
        &self.allocator
    }

    /// Create a `(pending, pending)` registration holding capacity on `schedule_id`.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::ScheduleNotFound`] / [`RegistrationError::ScheduleClosed`]
    /// - placement and capacity errors from [`CapacityAllocator::reserve`]
    /// - [`RegistrationError::CodeSpaceExhausted`] after [`MAX_CODE_ATTEMPTS`] collisions
    /// - storage failures
    #[tracing::instrument(skip(self))]
    pub async fn register(
        &self,
        subject_id: SubjectId,
        schedule_id: ScheduleId,
        room_id: Option<RoomId>,
        seat_id: Option<SeatId>,
    ) -> Result<Registration> {
        let result = self
            .try_register(subject_id, schedule_id, room_id, seat_id)
            .await;

        let outcome = match &result {
            Ok(_) => "created",
            Err(e) => e.class().as_str(),
        };
        metrics::counter!(names::REGISTRATIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn try_register(
        &self,
        subject_id: SubjectId,
        schedule_id: ScheduleId,
        room_id: Option<RoomId>,
        seat_id: Option<SeatId>,
    ) -> Result<Registration> {
        let schedule = self
            .bounded(self.directory.schedule(schedule_id))
            .await?
            .ok_or(RegistrationError::ScheduleNotFound)?;

        let now = self.clock.now();
        if !schedule.is_open(now) {
            return Err(RegistrationError::ScheduleClosed);
        }

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let registration = Registration::new_pending(
                self.codes.generate(),
                subject_id,
                schedule_id,
                room_id,
                seat_id,
                now,
            );

            match self.allocator.reserve(&schedule, registration.clone()).await {
                Ok(_) => {
                    tracing::info!(
                        registration_id = %registration.id,
                        registration_code = %registration.registration_code,
                        "registration created"
                    );
                    return Ok(registration);
                }
                Err(RegistrationError::Storage(StoreError::DuplicateCode)) => {
                    metrics::counter!(names::CODE_COLLISIONS_TOTAL).increment(1);
                    tracing::debug!(attempt, "registration code collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(
            attempts = MAX_CODE_ATTEMPTS,
            "registration code space exhausted; check code length configuration"
        );
        Err(RegistrationError::CodeSpaceExhausted {
            attempts: MAX_CODE_ATTEMPTS,
        })
    }

    /// Drive the payment status of the registration identified by `code`.
    ///
    /// Re-applying the current payment status is a no-op reported as
    /// [`TransitionOutcome::Unchanged`], which makes duplicate webhook
    /// deliveries harmless.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::RegistrationNotFound`]
    /// - [`RegistrationError::RegistrationTerminal`] for a cancelled registration
    /// - [`RegistrationError::InvalidPaymentTransition`] for an illegal move
    /// - [`RegistrationError::RegistrationChanged`] if concurrent writers kept
    ///   winning past the retry bound
    /// - storage failures
    pub async fn transition_payment(
        &self,
        code: &RegistrationCode,
        to: PaymentStatus,
        payment_reference: Option<String>,
    ) -> Result<TransitionOutcome> {
        self.apply_payment(code, to, payment_reference, PaymentSource::Webhook)
            .await
    }

    /// Operator confirmation of a payment, by registration code.
    ///
    /// Same semantics as [`Self::transition_payment`] towards `paid`.
    ///
    /// # Errors
    ///
    /// As [`Self::transition_payment`].
    pub async fn verify_payment_manually(
        &self,
        code: &RegistrationCode,
        payment_reference: Option<String>,
    ) -> Result<TransitionOutcome> {
        self.apply_payment(code, PaymentStatus::Paid, payment_reference, PaymentSource::Manual)
            .await
    }

    #[tracing::instrument(
        skip_all,
        fields(registration_code = %code, to = %to, source = source.as_str())
    )]
    async fn apply_payment(
        &self,
        code: &RegistrationCode,
        to: PaymentStatus,
        payment_reference: Option<String>,
        source: PaymentSource,
    ) -> Result<TransitionOutcome> {
        let result = self.try_apply_payment(code, to, payment_reference).await;

        let outcome = match &result {
            Ok(TransitionOutcome::Applied(_)) => "applied",
            Ok(TransitionOutcome::Unchanged(_)) => "unchanged",
            Err(e) => e.class().as_str(),
        };
        metrics::counter!(
            names::PAYMENT_TRANSITIONS_TOTAL,
            "to" => to.as_str(),
            "source" => source.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn try_apply_payment(
        &self,
        code: &RegistrationCode,
        to: PaymentStatus,
        payment_reference: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut current = self.load_by_code(code).await?;
        let mut retries = 0;

        loop {
            // A repeated refund for the registration it cancelled stays a no-op.
            let duplicate = current.payment_status == to
                && (!current.is_terminal() || to == PaymentStatus::Refunded);
            if duplicate {
                tracing::debug!(registration_id = %current.id, "payment status already applied");
                return Ok(TransitionOutcome::Unchanged(current));
            }
            if current.is_terminal() {
                return Err(RegistrationError::RegistrationTerminal(current.id));
            }
            if !current.payment_status.can_transition_to(to) {
                return Err(RegistrationError::InvalidPaymentTransition {
                    from: current.payment_status,
                    to,
                });
            }

            let next = self.settle(&current, to, payment_reference.clone());
            match self
                .bounded(self.store.conditional_update(next, current.version))
                .await
            {
                Ok(updated) => {
                    tracing::info!(
                        registration_id = %updated.id,
                        from = %current.payment_status,
                        registration_status = %updated.registration_status,
                        "payment transition applied"
                    );
                    if updated.is_terminal() {
                        self.release_after_cancel(&updated).await;
                    }
                    return Ok(TransitionOutcome::Applied(updated));
                }
                Err(StoreError::ConcurrencyConflict { .. })
                    if retries < self.config.max_transition_retries =>
                {
                    retries += 1;
                    metrics::counter!(names::TRANSITION_RETRIES_TOTAL).increment(1);
                    current = self.load_by_code(code).await?;
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    return Err(RegistrationError::RegistrationChanged(current.id));
                }
                Err(StoreError::NotFound) => return Err(RegistrationError::RegistrationNotFound),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn settle(
        &self,
        current: &Registration,
        to: PaymentStatus,
        payment_reference: Option<String>,
    ) -> Registration {
        let mut next = current.clone();
        next.payment_status = to;
        match to {
            PaymentStatus::Paid => next.registration_status = RegistrationStatus::Confirmed,
            PaymentStatus::Refunded => next.registration_status = RegistrationStatus::Cancelled,
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }
        if payment_reference.is_some() {
            next.payment_reference = payment_reference;
        }
        next.updated_at = self.clock.now();
        next
    }

    /// Cancel a registration and give its capacity back.
    ///
    /// `payment_status` is left untouched. If a concurrent write commits
    /// between the read and the cancellation, the cancellation is rejected
    /// rather than re-applied over it.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::RegistrationNotFound`]
    /// - [`RegistrationError::RegistrationTerminal`] if already cancelled
    /// - [`RegistrationError::RegistrationChanged`] on a lost race
    /// - storage failures
    #[tracing::instrument(skip_all, fields(registration_id = %id))]
    pub async fn cancel(&self, id: RegistrationId) -> Result<Registration> {
        let current = self.load(id).await?;
        if current.is_terminal() {
            return Err(RegistrationError::RegistrationTerminal(id));
        }

        let mut next = current.clone();
        next.registration_status = RegistrationStatus::Cancelled;
        next.updated_at = self.clock.now();

        let updated = match self
            .bounded(self.store.conditional_update(next, current.version))
            .await
        {
            Ok(updated) => updated,
            Err(StoreError::ConcurrencyConflict { expected, actual }) => {
                tracing::info!(expected, actual, "cancellation lost a race with another write");
                return Err(RegistrationError::RegistrationChanged(id));
            }
            Err(StoreError::NotFound) => return Err(RegistrationError::RegistrationNotFound),
            Err(e) => return Err(e.into()),
        };

        metrics::counter!(names::CANCELLATIONS_TOTAL).increment(1);
        tracing::info!(
            registration_code = %updated.registration_code,
            payment_status = %updated.payment_status,
            "registration cancelled"
        );
        self.release_after_cancel(&updated).await;
        Ok(updated)
    }

    /// Release the hold of a cancelled registration again.
    ///
    /// Recovery path for a cancellation whose release failed. Returns whether
    /// a hold was still present.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::RegistrationNotFound`]
    /// - [`RegistrationError::RegistrationActive`] if the registration is not cancelled
    /// - storage failures
    pub async fn release_hold(&self, id: RegistrationId) -> Result<bool> {
        let current = self.load(id).await?;
        if !current.is_terminal() {
            return Err(RegistrationError::RegistrationActive(id));
        }

        let released = self
            .allocator
            .release(&ReservationToken::for_registration(&current))
            .await?;
        tracing::info!(registration_id = %id, released, "hold release re-driven");
        Ok(released)
    }

    async fn release_after_cancel(&self, registration: &Registration) {
        let token = ReservationToken::for_registration(registration);
        if let Err(e) = self.allocator.release(&token).await {
            metrics::counter!(names::HOLD_RELEASE_FAILURES_TOTAL).increment(1);
            tracing::error!(
                registration_id = %registration.id,
                schedule_id = %registration.schedule_id,
                error = %e,
                "capacity hold not released after cancellation; re-drive with release_hold"
            );
        }
    }

    /// Record the candidate's self-reported payment method and reference.
    ///
    /// Never changes `payment_status`. Once payment has left `pending` the
    /// call is a no-op returning the stored record.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::InvalidInput`] for a bad method or reference
    /// - [`RegistrationError::RegistrationNotFound`]
    /// - [`RegistrationError::RegistrationTerminal`] for a cancelled registration
    /// - [`RegistrationError::RegistrationChanged`] past the retry bound
    /// - storage failures
    #[tracing::instrument(skip_all, fields(registration_id = %id))]
    pub async fn submit_payment_info(
        &self,
        id: RegistrationId,
        method: &str,
        payment_reference: Option<&str>,
    ) -> Result<Registration> {
        let method = validate_payment_method(method)?;
        let reference = payment_reference
            .map(validate_payment_reference)
            .transpose()?;

        let mut retries = 0;
        loop {
            let current = self.load(id).await?;
            if current.is_terminal() {
                return Err(RegistrationError::RegistrationTerminal(id));
            }
            if current.payment_status != PaymentStatus::Pending {
                tracing::debug!(
                    payment_status = %current.payment_status,
                    "payment info ignored; payment no longer pending"
                );
                return Ok(current);
            }

            let mut next = current.clone();
            next.payment_method = Some(method.clone());
            if reference.is_some() {
                next.payment_reference.clone_from(&reference);
            }
            next.updated_at = self.clock.now();

            match self
                .bounded(self.store.conditional_update(next, current.version))
                .await
            {
                Ok(updated) => {
                    tracing::info!(payment_method = %method, "payment info recorded");
                    return Ok(updated);
                }
                Err(StoreError::ConcurrencyConflict { .. })
                    if retries < self.config.max_transition_retries =>
                {
                    retries += 1;
                    metrics::counter!(names::TRANSITION_RETRIES_TOTAL).increment(1);
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    return Err(RegistrationError::RegistrationChanged(id));
                }
                Err(StoreError::NotFound) => return Err(RegistrationError::RegistrationNotFound),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fetch a registration by id.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::RegistrationNotFound`] or storage failures.
    pub async fn get(&self, id: RegistrationId) -> Result<Registration> {
        self.load(id).await
    }

    /// Fetch a registration by its public code.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::RegistrationNotFound`] or storage failures.
    pub async fn get_by_code(&self, code: &RegistrationCode) -> Result<Registration> {
        self.load_by_code(code).await
    }

    /// Active holds against a schedule.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn reserved_count(&self, schedule_id: ScheduleId) -> Result<u32> {
        self.allocator.reserved_count(schedule_id).await
    }

    /// Storage connectivity probe.
    ///
    /// # Errors
    ///
    /// Storage failures.
    pub async fn ping(&self) -> Result<()> {
        Ok(self.bounded(self.store.ping()).await?)
    }

    async fn load(&self, id: RegistrationId) -> Result<Registration> {
        self.bounded(self.store.get(id))
            .await?
            .ok_or(RegistrationError::RegistrationNotFound)
    }

    async fn load_by_code(&self, code: &RegistrationCode) -> Result<Registration> {
        self.bounded(self.store.get_by_code(code))
            .await?
            .ok_or(RegistrationError::RegistrationNotFound)
    }

    async fn bounded<T>(
        &self,
        fut: crate::store::StoreFuture<'_, T>,
    ) -> std::result::Result<T, StoreError> {
        bounded(self.config.storage_timeout, fut).await
    }
}

/// Validate a self-reported payment method: 1 to 50 characters after trimming.
///
/// # Errors
///
/// [`RegistrationError::InvalidInput`] when out of range.
pub fn validate_payment_method(method: &str) -> Result<String> {
    let method = method.trim();
    let len = method.chars().count();
    if len == 0 || len > MAX_PAYMENT_METHOD_LEN {
        return Err(RegistrationError::InvalidInput(format!(
            "payment method must be 1-{MAX_PAYMENT_METHOD_LEN} characters"
        )));
    }
    Ok(method.to_string())
}

/// Validate a client-submitted payment reference: 6 to 100 ASCII alphanumerics.
///
/// # Errors
///
/// [`RegistrationError::InvalidInput`] when malformed.
pub fn validate_payment_reference(reference: &str) -> Result<String> {
    let reference = reference.trim();
    let well_formed = (MIN_PAYMENT_REFERENCE_LEN..=MAX_PAYMENT_REFERENCE_LEN)
        .contains(&reference.len())
        && reference.bytes().all(|b| b.is_ascii_alphanumeric());
    if !well_formed {
        return Err(RegistrationError::InvalidInput(format!(
            "payment reference must be \
             {MIN_PAYMENT_REFERENCE_LEN}-{MAX_PAYMENT_REFERENCE_LEN} letters or digits"
        )));
    }
    Ok(reference.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_method_bounds() {
        assert_eq!(
            validate_payment_method("  bank transfer ").ok().as_deref(),
            Some("bank transfer")
        );
        assert!(validate_payment_method("   ").is_err());
        assert!(validate_payment_method(&"x".repeat(50)).is_ok());
        assert!(validate_payment_method(&"x".repeat(51)).is_err());
    }

    #[test]
    fn payment_reference_rules() {
        assert!(validate_payment_reference("TRX123").is_ok());
        assert!(validate_payment_reference("TRX12").is_err());
        assert!(validate_payment_reference("TRX-123456").is_err());
        assert!(validate_payment_reference(&"9".repeat(101)).is_err());
    }

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.storage_timeout, Duration::from_secs(5));
        assert_eq!(config.max_transition_retries, 3);
    }
}
