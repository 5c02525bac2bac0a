//! In-memory storage for fast, deterministic tests.
//!
//! - [`InMemoryRegistrationStore`]: `HashMap`-based [`RegistrationStore`]
//! - [`InMemoryScheduleDirectory`]: `HashMap`-based [`ScheduleDirectory`]
//!
//! Every store operation runs under a single mutex, which gives `reserve` and
//! `conditional_update` the same atomicity the `PostgreSQL` store gets from
//! its transaction.

use exam_registration_core::error::StoreError;
use exam_registration_core::store::{
    RegistrationStore, ReservationToken, ScheduleDirectory, StoreFuture,
};
use exam_registration_core::types::{
    Registration, RegistrationCode, RegistrationId, Schedule, ScheduleId, Seat, SeatId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

#[derive(Debug, Default)]
struct StoreState {
    registrations: HashMap<RegistrationId, Registration>,
    codes: HashMap<RegistrationCode, RegistrationId>,
    holds: HashMap<RegistrationId, ReservationToken>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    fail_releases: bool,
}

/// In-memory registration store.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// engine owns another.
///
/// # Example
///
/// ```
/// use exam_registration_testing::InMemoryRegistrationStore;
/// use exam_registration_core::store::RegistrationStore;
/// use exam_registration_core::types::ScheduleId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRegistrationStore::new();
/// assert_eq!(store.reserved_count(ScheduleId::new()).await?, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistrationStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults().unavailable {
            Err(StoreError::Unavailable("in-memory store switched off".into()))
        } else {
            Ok(())
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults().unavailable = unavailable;
    }

    /// Make `release` fail with [`StoreError::Unavailable`], leaving holds in place.
    pub fn fail_releases(&self, fail: bool) {
        self.faults().fail_releases = fail;
    }

    /// Snapshot of every registration ever stored.
    #[must_use]
    pub fn registrations(&self) -> Vec<Registration> {
        self.state().registrations.values().cloned().collect()
    }

    /// Number of stored registrations that are not cancelled.
    #[must_use]
    pub fn active_count(&self, schedule_id: ScheduleId) -> usize {
        self.state()
            .registrations
            .values()
            .filter(|r| r.schedule_id == schedule_id && r.is_active())
            .count()
    }

    /// The hold currently recorded for a registration, if any.
    #[must_use]
    pub fn hold_for(&self, id: RegistrationId) -> Option<ReservationToken> {
        self.state().holds.get(&id).cloned()
    }

    /// Registrations currently holding `seat_id` on `schedule_id`.
    #[must_use]
    pub fn seat_holders(&self, schedule_id: ScheduleId, seat_id: SeatId) -> Vec<RegistrationId> {
        self.state()
            .holds
            .values()
            .filter(|h| h.schedule_id == schedule_id && h.seat_id == Some(seat_id))
            .map(|h| h.registration_id)
            .collect()
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn reserve(
        &self,
        registration: Registration,
        limit: Option<u32>,
    ) -> StoreFuture<'_, ReservationToken> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state();

            if let Some(limit) = limit {
                let held = state
                    .holds
                    .values()
                    .filter(|h| h.schedule_id == registration.schedule_id)
                    .count();
                if held >= usize::try_from(limit).unwrap_or(usize::MAX) {
                    return Err(StoreError::CapacityExhausted);
                }
            }

            if let Some(seat_id) = registration.seat_id {
                let taken = state.holds.values().any(|h| {
                    h.schedule_id == registration.schedule_id && h.seat_id == Some(seat_id)
                });
                if taken {
                    return Err(StoreError::SeatTaken);
                }
            }

            if state.codes.contains_key(&registration.registration_code) {
                return Err(StoreError::DuplicateCode);
            }

            let token = ReservationToken::for_registration(&registration);
            state.holds.insert(registration.id, token.clone());
            state
                .codes
                .insert(registration.registration_code.clone(), registration.id);
            state.registrations.insert(registration.id, registration);
            Ok(token)
        })
    }

    fn release(&self, token: &ReservationToken) -> StoreFuture<'_, bool> {
        let id = token.registration_id;
        Box::pin(async move {
            self.check_available()?;
            if self.faults().fail_releases {
                return Err(StoreError::Unavailable("release failure injected".into()));
            }
            Ok(self.state().holds.remove(&id).is_some())
        })
    }

    fn get(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.state().registrations.get(&id).cloned())
        })
    }

    fn get_by_code(&self, code: &RegistrationCode) -> StoreFuture<'_, Option<Registration>> {
        let code = code.clone();
        Box::pin(async move {
            self.check_available()?;
            let state = self.state();
            Ok(state
                .codes
                .get(&code)
                .and_then(|id| state.registrations.get(id))
                .cloned())
        })
    }

    fn conditional_update(
        &self,
        registration: Registration,
        expected_version: i64,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state();
            let stored = state
                .registrations
                .get_mut(&registration.id)
                .ok_or(StoreError::NotFound)?;

            if stored.version != expected_version {
                return Err(StoreError::ConcurrencyConflict {
                    expected: expected_version,
                    actual: stored.version,
                });
            }

            stored.registration_status = registration.registration_status;
            stored.payment_status = registration.payment_status;
            stored.payment_method = registration.payment_method;
            stored.payment_reference = registration.payment_reference;
            stored.updated_at = registration.updated_at;
            stored.version = expected_version + 1;
            Ok(stored.clone())
        })
    }

    fn reserved_count(&self, schedule_id: ScheduleId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            self.check_available()?;
            let held = self
                .state()
                .holds
                .values()
                .filter(|h| h.schedule_id == schedule_id)
                .count();
            Ok(u32::try_from(held).unwrap_or(u32::MAX))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }
}

/// In-memory schedule and seat data.
#[derive(Clone, Debug, Default)]
pub struct InMemoryScheduleDirectory {
    schedules: Arc<RwLock<HashMap<ScheduleId, Schedule>>>,
    seats: Arc<RwLock<HashMap<SeatId, Seat>>>,
}

impl InMemoryScheduleDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a schedule.
    pub fn put_schedule(&self, schedule: Schedule) {
        self.schedules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schedule.id, schedule);
    }

    /// Add or replace a seat.
    pub fn put_seat(&self, seat: Seat) {
        self.seats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seat.id, seat);
    }
}

impl ScheduleDirectory for InMemoryScheduleDirectory {
    fn schedule(&self, id: ScheduleId) -> StoreFuture<'_, Option<Schedule>> {
        Box::pin(async move {
            Ok(self
                .schedules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .cloned())
        })
    }

    fn seat(&self, id: SeatId) -> StoreFuture<'_, Option<Seat>> {
        Box::pin(async move {
            Ok(self
                .seats
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&id)
                .cloned())
        })
    }
}
