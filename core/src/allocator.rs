//! Capacity allocation against a schedule's limits.
//!
//! The allocator validates a requested placement against the venue data and
//! then delegates the actual hold to [`RegistrationStore::reserve`], which
//! performs the capacity check, the seat check and the registration insert as
//! one atomic write.

use crate::error::{RegistrationError, Result, StoreError};
use crate::store::{RegistrationStore, ReservationToken, ScheduleDirectory, bounded};
use crate::types::{Registration, Schedule, ScheduleId};
use std::sync::Arc;
use std::time::Duration;

/// Reserves and releases capacity for registrations.
#[derive(Clone)]
pub struct CapacityAllocator {
    store: Arc<dyn RegistrationStore>,
    directory: Arc<dyn ScheduleDirectory>,
    timeout: Duration,
}

impl CapacityAllocator {
    /// Create an allocator over the given storage and venue data.
    #[must_use]
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        directory: Arc<dyn ScheduleDirectory>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            timeout,
        }
    }

    /// Hold capacity for `registration` and persist it.
    ///
    /// The placement named by the registration's `room_id` / `seat_id` is
    /// checked first: a seat needs its room, the room must host the schedule,
    /// and the seat must belong to the room and be in service.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::SeatWithoutRoom`], [`RegistrationError::RoomNotInSchedule`],
    ///   [`RegistrationError::SeatNotInRoom`] for an inconsistent placement
    /// - [`RegistrationError::SeatUnavailable`] if the seat is unknown, out of
    ///   service or held by another active registration
    /// - [`RegistrationError::CapacityExhausted`] once `max_candidates` holds exist
    /// - `Storage(DuplicateCode)` when the code is taken; the caller regenerates
    pub async fn reserve(
        &self,
        schedule: &Schedule,
        registration: Registration,
    ) -> Result<ReservationToken> {
        self.check_placement(schedule, &registration).await?;

        let limit = schedule.max_candidates;
        match bounded(self.timeout, self.store.reserve(registration, limit)).await {
            Ok(token) => Ok(token),
            Err(StoreError::CapacityExhausted) => Err(RegistrationError::CapacityExhausted),
            Err(StoreError::SeatTaken) => Err(RegistrationError::SeatUnavailable),
            Err(other) => Err(other.into()),
        }
    }

    async fn check_placement(
        &self,
        schedule: &Schedule,
        registration: &Registration,
    ) -> Result<()> {
        let room = match (registration.room_id, registration.seat_id) {
            (None, Some(_)) => return Err(RegistrationError::SeatWithoutRoom),
            (None, None) => return Ok(()),
            (Some(room), _) => room,
        };

        if !schedule.hosts_room(room) {
            return Err(RegistrationError::RoomNotInSchedule);
        }

        let Some(seat_id) = registration.seat_id else {
            return Ok(());
        };

        let seat = bounded(self.timeout, self.directory.seat(seat_id))
            .await?
            .ok_or(RegistrationError::SeatUnavailable)?;

        if seat.room_id != room {
            return Err(RegistrationError::SeatNotInRoom);
        }
        if !seat.is_available {
            return Err(RegistrationError::SeatUnavailable);
        }
        Ok(())
    }

    /// Release a hold. Idempotent; returns whether a hold was actually dropped.
    ///
    /// # Errors
    ///
    /// Only transient storage failures. Unknown or already released tokens
    /// return `Ok(false)`.
    pub async fn release(&self, token: &ReservationToken) -> Result<bool> {
        let released = bounded(self.timeout, self.store.release(token)).await?;
        tracing::debug!(
            registration_id = %token.registration_id,
            schedule_id = %token.schedule_id,
            released,
            "capacity hold release"
        );
        Ok(released)
    }

    /// Active holds against a schedule.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn reserved_count(&self, schedule_id: ScheduleId) -> Result<u32> {
        Ok(bounded(self.timeout, self.store.reserved_count(schedule_id)).await?)
    }
}
