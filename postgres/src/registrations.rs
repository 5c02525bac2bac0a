//! Registrations and their capacity holds.

use crate::{column, store_error};
use exam_registration_core::error::StoreError;
use exam_registration_core::store::{RegistrationStore, ReservationToken, StoreFuture};
use exam_registration_core::types::{
    PaymentStatus, Registration, RegistrationCode, RegistrationId, RegistrationStatus, RoomId,
    ScheduleId, SeatId, SubjectId,
};
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use uuid::Uuid;

const REGISTRATION_COLUMNS: &str = "id, registration_code, user_id, exam_schedule_id, room_id, \
     seat_id, status, payment_status, payment_method, payment_reference, created_at, \
     updated_at, version";

const CODE_CONSTRAINT: &str = "registrations_code_key";
const SEAT_CONSTRAINT: &str = "capacity_holds_seat_key";

/// Registration store backed by the `registrations` and `capacity_holds`
/// tables.
#[derive(Clone, Debug)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Create a store writing through `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const TABLE: &str = "registrations";

fn registration_from_row(row: &PgRow) -> Result<Registration, StoreError> {
    let code: String = column(row, TABLE, "registration_code")?;
    let registration_code = RegistrationCode::parse(&code)
        .map_err(|_| StoreError::Database(format!("Malformed registration code '{code}'")))?;

    let status: String = column(row, TABLE, "status")?;
    let registration_status = RegistrationStatus::parse(&status)
        .ok_or_else(|| StoreError::Database(format!("Unknown registration status '{status}'")))?;

    let payment: String = column(row, TABLE, "payment_status")?;
    let payment_status = PaymentStatus::parse(&payment)
        .ok_or_else(|| StoreError::Database(format!("Unknown payment status '{payment}'")))?;

    let room_id: Option<Uuid> = column(row, TABLE, "room_id")?;
    let seat_id: Option<Uuid> = column(row, TABLE, "seat_id")?;

    Ok(Registration {
        id: RegistrationId::from_uuid(column(row, TABLE, "id")?),
        registration_code,
        subject_id: SubjectId::from_uuid(column(row, TABLE, "user_id")?),
        schedule_id: ScheduleId::from_uuid(column(row, TABLE, "exam_schedule_id")?),
        room_id: room_id.map(RoomId::from_uuid),
        seat_id: seat_id.map(SeatId::from_uuid),
        registration_status,
        payment_status,
        payment_method: column(row, TABLE, "payment_method")?,
        payment_reference: column(row, TABLE, "payment_reference")?,
        created_at: column(row, TABLE, "created_at")?,
        updated_at: column(row, TABLE, "updated_at")?,
        version: column(row, TABLE, "version")?,
    })
}

/// Map a failed insert during reservation, recognising the unique indexes
/// that encode seat exclusivity and code uniqueness.
fn reserve_error(context: &str, error: &sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = error {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(CODE_CONSTRAINT) => return StoreError::DuplicateCode,
                Some(SEAT_CONSTRAINT) => return StoreError::SeatTaken,
                _ => {}
            }
        }
    }
    store_error(context, error)
}

impl RegistrationStore for PostgresRegistrationStore {
    fn reserve(
        &self,
        registration: Registration,
        limit: Option<u32>,
    ) -> StoreFuture<'_, ReservationToken> {
        Box::pin(async move {
            let schedule_id = *registration.schedule_id.as_uuid();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| store_error("Failed to begin reservation", &e))?;

            // Serializes reservations per schedule until commit or rollback.
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
                .bind(schedule_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error("Failed to lock schedule", &e))?;

            if let Some(limit) = limit {
                let held: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM capacity_holds WHERE exam_schedule_id = $1",
                )
                .bind(schedule_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| store_error("Failed to count holds", &e))?;

                if held >= i64::from(limit) {
                    tracing::debug!(
                        schedule_id = %registration.schedule_id,
                        held,
                        limit,
                        "Capacity exhausted"
                    );
                    return Err(StoreError::CapacityExhausted);
                }
            }

            let room_id: Option<Uuid> = registration.room_id.map(|r| *r.as_uuid());
            let seat_id: Option<Uuid> = registration.seat_id.map(|s| *s.as_uuid());

            sqlx::query(
                "INSERT INTO registrations (id, registration_code, user_id, exam_schedule_id,
                     room_id, seat_id, status, payment_status, payment_method,
                     payment_reference, created_at, updated_at, version)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(*registration.id.as_uuid())
            .bind(registration.registration_code.as_str())
            .bind(*registration.subject_id.as_uuid())
            .bind(schedule_id)
            .bind(room_id)
            .bind(seat_id)
            .bind(registration.registration_status.as_str())
            .bind(registration.payment_status.as_str())
            .bind(registration.payment_method.as_deref())
            .bind(registration.payment_reference.as_deref())
            .bind(registration.created_at)
            .bind(registration.updated_at)
            .bind(registration.version)
            .execute(&mut *tx)
            .await
            .map_err(|e| reserve_error("Failed to insert registration", &e))?;

            sqlx::query(
                "INSERT INTO capacity_holds (registration_id, exam_schedule_id, room_id, seat_id)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(*registration.id.as_uuid())
            .bind(schedule_id)
            .bind(room_id)
            .bind(seat_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| reserve_error("Failed to insert capacity hold", &e))?;

            tx.commit()
                .await
                .map_err(|e| store_error("Failed to commit reservation", &e))?;

            Ok(ReservationToken::for_registration(&registration))
        })
    }

    fn release(&self, token: &ReservationToken) -> StoreFuture<'_, bool> {
        let registration_id = *token.registration_id.as_uuid();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM capacity_holds WHERE registration_id = $1")
                .bind(registration_id)
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("Failed to release hold", &e))?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn get(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
            ))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load registration", &e))?;

            row.as_ref().map(registration_from_row).transpose()
        })
    }

    fn get_by_code(&self, code: &RegistrationCode) -> StoreFuture<'_, Option<Registration>> {
        let code = code.as_str().to_string();
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE registration_code = $1"
            ))
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load registration by code", &e))?;

            row.as_ref().map(registration_from_row).transpose()
        })
    }

    fn conditional_update(
        &self,
        registration: Registration,
        expected_version: i64,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE registrations
                 SET status = $3, payment_status = $4, payment_method = $5,
                     payment_reference = $6, updated_at = $7, version = version + 1
                 WHERE id = $1 AND version = $2
                 RETURNING {REGISTRATION_COLUMNS}"
            ))
            .bind(*registration.id.as_uuid())
            .bind(expected_version)
            .bind(registration.registration_status.as_str())
            .bind(registration.payment_status.as_str())
            .bind(registration.payment_method.as_deref())
            .bind(registration.payment_reference.as_deref())
            .bind(registration.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to update registration", &e))?;

            if let Some(row) = row {
                return registration_from_row(&row);
            }

            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM registrations WHERE id = $1")
                    .bind(*registration.id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to read registration version", &e))?;

            match actual {
                Some(actual) => Err(StoreError::ConcurrencyConflict {
                    expected: expected_version,
                    actual,
                }),
                None => Err(StoreError::NotFound),
            }
        })
    }

    fn reserved_count(&self, schedule_id: ScheduleId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let held: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM capacity_holds WHERE exam_schedule_id = $1",
            )
            .bind(*schedule_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("Failed to count holds", &e))?;

            Ok(u32::try_from(held).unwrap_or(u32::MAX))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Unavailable(format!("Ping failed: {e}")))?;
            Ok(())
        })
    }
}
