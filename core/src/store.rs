//! Storage abstractions the engine is built on.
//!
//! The engine never holds an in-process lock across a check-then-act sequence.
//! The races that matter span processes, so the serialization points live in
//! the storage layer:
//!
//! - [`RegistrationStore::reserve`] is a single atomic write that checks the
//!   capacity limit, the seat hold and code uniqueness, then persists the
//!   registration together with its hold.
//! - [`RegistrationStore::conditional_update`] is a compare-and-swap on the
//!   registration's `version`.
//!
//! # Implementations
//!
//! - `PostgresRegistrationStore` (in `exam-registration-postgres`): production
//! - `InMemoryRegistrationStore` (in `exam-registration-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
//! engine can hold `Arc<dyn RegistrationStore>`.

use crate::error::StoreError;
use crate::types::{
    Registration, RegistrationCode, RegistrationId, RoomId, Schedule, ScheduleId, Seat, SeatId,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by storage traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Run a storage future under a deadline; expiry becomes [`StoreError::Timeout`].
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if let Ok(result) = tokio::time::timeout(limit, fut).await {
        result
    } else {
        metrics::counter!(crate::metrics::STORAGE_TIMEOUTS_TOTAL).increment(1);
        tracing::warn!(timeout_ms = limit.as_millis(), "storage call timed out");
        Err(StoreError::Timeout)
    }
}

/// Proof that capacity (and possibly a seat) is held for a registration.
///
/// A token identifies the hold by its registration, so releasing it twice, or
/// releasing a token whose hold never committed, is harmless.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationToken {
    /// Registration owning the hold
    pub registration_id: RegistrationId,
    /// Schedule whose capacity is held
    pub schedule_id: ScheduleId,
    /// Room, when the sitting is room-based
    pub room_id: Option<RoomId>,
    /// Seat, when the room is seat-based
    pub seat_id: Option<SeatId>,
}

impl ReservationToken {
    /// The token describing the hold a registration was created with.
    #[must_use]
    pub const fn for_registration(registration: &Registration) -> Self {
        Self {
            registration_id: registration.id,
            schedule_id: registration.schedule_id,
            room_id: registration.room_id,
            seat_id: registration.seat_id,
        }
    }
}

/// Persistence for registrations and their capacity holds.
pub trait RegistrationStore: Send + Sync {
    /// Atomically reserve capacity for `registration` and persist it.
    ///
    /// In one indivisible step the store must reject with
    ///
    /// - [`StoreError::CapacityExhausted`] if `limit` is `Some(n)` and the
    ///   schedule already has `n` active holds,
    /// - [`StoreError::SeatTaken`] if the registration names a seat already
    ///   held by an active registration for the same schedule,
    /// - [`StoreError::DuplicateCode`] if any registration ever stored carries
    ///   the same code,
    ///
    /// and otherwise record the hold and insert the registration. On rejection
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// The rejections above, plus `Unavailable`/`Database` for backend failures.
    fn reserve(&self, registration: Registration, limit: Option<u32>)
    -> StoreFuture<'_, ReservationToken>;

    /// Drop the hold identified by `token`.
    ///
    /// Returns `true` if a hold was removed, `false` if none existed. Never an
    /// error for an unknown or already released token.
    ///
    /// # Errors
    ///
    /// Only backend failures.
    fn release(&self, token: &ReservationToken) -> StoreFuture<'_, bool>;

    /// Fetch a registration by id.
    ///
    /// # Errors
    ///
    /// Only backend failures; a missing row is `Ok(None)`.
    fn get(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>>;

    /// Fetch a registration by its public code.
    ///
    /// # Errors
    ///
    /// Only backend failures; a missing row is `Ok(None)`.
    fn get_by_code(&self, code: &RegistrationCode) -> StoreFuture<'_, Option<Registration>>;

    /// Replace a registration if, and only if, its stored version still equals
    /// `expected_version`. The stored version becomes `expected_version + 1`.
    ///
    /// `id`, `registration_code`, `subject_id`, `schedule_id`, room, seat and
    /// `created_at` are immutable and are not written.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the registration does not exist
    /// - `ConcurrencyConflict` if another write landed first
    fn conditional_update(
        &self,
        registration: Registration,
        expected_version: i64,
    ) -> StoreFuture<'_, Registration>;

    /// Number of active holds against a schedule.
    ///
    /// # Errors
    ///
    /// Only backend failures.
    fn reserved_count(&self, schedule_id: ScheduleId) -> StoreFuture<'_, u32>;

    /// Cheap connectivity probe for readiness checks.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the backend cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Read-only view of the schedule and venue data the engine consumes.
///
/// The engine does not own these records; the surrounding management layer
/// writes them.
pub trait ScheduleDirectory: Send + Sync {
    /// Look up an exam sitting.
    ///
    /// # Errors
    ///
    /// Only backend failures; an unknown schedule is `Ok(None)`.
    fn schedule(&self, id: ScheduleId) -> StoreFuture<'_, Option<Schedule>>;

    /// Look up a seat.
    ///
    /// # Errors
    ///
    /// Only backend failures; an unknown seat is `Ok(None)`.
    fn seat(&self, id: SeatId) -> StoreFuture<'_, Option<Seat>>;
}
