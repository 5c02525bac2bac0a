//! Read-only view of schedules, their rooms and room seats.

use crate::{column, store_error};
use exam_registration_core::error::StoreError;
use exam_registration_core::store::{ScheduleDirectory, StoreFuture};
use exam_registration_core::types::{RoomId, Schedule, ScheduleId, ScheduleStatus, Seat, SeatId};
use sqlx::PgPool;
use uuid::Uuid;

/// Schedule directory backed by the `exam_schedules`, `exam_schedule_rooms`
/// and `room_seats` tables.
#[derive(Clone, Debug)]
pub struct PostgresScheduleDirectory {
    pool: PgPool,
}

impl PostgresScheduleDirectory {
    /// Create a directory reading through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SCHEDULES: &str = "exam_schedules";
const SEATS: &str = "room_seats";

/// Negative limits are treated as zero capacity.
fn candidate_limit(value: Option<i32>) -> Option<u32> {
    value.map(|v| u32::try_from(v).unwrap_or(0))
}

impl ScheduleDirectory for PostgresScheduleDirectory {
    fn schedule(&self, id: ScheduleId) -> StoreFuture<'_, Option<Schedule>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, title, registration_deadline, status, max_candidates, min_candidates
                 FROM exam_schedules
                 WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load schedule", &e))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let status: String = column(&row, SCHEDULES, "status")?;
            let status = ScheduleStatus::parse(&status).ok_or_else(|| {
                StoreError::Database(format!("Unknown schedule status '{status}' on {id}"))
            })?;

            let rooms: Vec<Uuid> = sqlx::query_scalar(
                "SELECT room_id FROM exam_schedule_rooms WHERE exam_schedule_id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load schedule rooms", &e))?;

            Ok(Some(Schedule {
                id: ScheduleId::from_uuid(column(&row, SCHEDULES, "id")?),
                title: column(&row, SCHEDULES, "title")?,
                registration_deadline: column(&row, SCHEDULES, "registration_deadline")?,
                status,
                max_candidates: candidate_limit(column(&row, SCHEDULES, "max_candidates")?),
                min_candidates: candidate_limit(column(&row, SCHEDULES, "min_candidates")?),
                rooms: rooms.into_iter().map(RoomId::from_uuid).collect(),
            }))
        })
    }

    fn seat(&self, id: SeatId) -> StoreFuture<'_, Option<Seat>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, room_id, row_number, column_number, label, is_available
                 FROM room_seats
                 WHERE id = $1",
            )
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load seat", &e))?;

            let Some(row) = row else {
                return Ok(None);
            };

            Ok(Some(Seat {
                id: SeatId::from_uuid(column(&row, SEATS, "id")?),
                room_id: RoomId::from_uuid(column(&row, SEATS, "room_id")?),
                row_number: column(&row, SEATS, "row_number")?,
                column_number: column(&row, SEATS, "column_number")?,
                label: column(&row, SEATS, "label")?,
                is_available: column(&row, SEATS, "is_available")?,
            }))
        })
    }
}
