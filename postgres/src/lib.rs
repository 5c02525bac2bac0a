//! `PostgreSQL` storage for the exam registration engine.
//!
//! Implements [`RegistrationStore`](exam_registration_core::store::RegistrationStore)
//! and [`ScheduleDirectory`](exam_registration_core::store::ScheduleDirectory)
//! on top of a shared [`sqlx::PgPool`].
//!
//! - Capacity holds live in their own table. A reservation takes a
//!   transaction-scoped advisory lock on the schedule, counts holds and writes
//!   the hold and the registration before committing.
//! - Seat exclusivity and code uniqueness are backed by unique indexes, so
//!   they hold even for writers that bypass the lock.
//! - Conditional updates compare and bump the `version` column.
//!
//! # Example
//!
//! ```ignore
//! use exam_registration_postgres::{PostgresRegistrationStore, migrate};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/exams").await?;
//!     migrate(&pool).await?;
//!     let store = PostgresRegistrationStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use exam_registration_core::error::StoreError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};

mod directory;
mod registrations;

pub use directory::PostgresScheduleDirectory;
pub use registrations::PostgresRegistrationStore;

/// Apply the bundled migrations.
///
/// Creates the registration and hold tables, and the schedule/venue tables
/// when they do not exist yet.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if a migration fails to apply.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to run migrations: {e}")))
}

/// Translate a driver error into a storage error.
///
/// Connection-level failures are transient; everything else is a database
/// error.
pub(crate) fn store_error(context: &str, error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{context}: {error}"))
        }
        _ => StoreError::Database(format!("{context}: {error}")),
    }
}

/// Read `name` from a row of `table`.
///
/// A missing column or one whose SQL type does not match `T` is reported as
/// [`StoreError::Database`].
pub(crate) fn column<'r, T>(row: &'r PgRow, table: &str, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(|e| decode_error(table, name, &e))
}

fn decode_error(table: &str, name: &str, error: &sqlx::Error) -> StoreError {
    StoreError::Database(format!("Failed to decode {table}.{name}: {error}"))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use exam_registration_core::error::ErrorClass;

    #[test]
    fn decode_failures_are_database_errors() {
        let missing = sqlx::Error::ColumnNotFound("registration_deadline".into());
        let error = decode_error("exam_schedules", "registration_deadline", &missing);
        let StoreError::Database(message) = &error else {
            panic!("expected a database error, got {error:?}");
        };
        assert!(message.starts_with("Failed to decode exam_schedules.registration_deadline"));
        assert_eq!(error.class(), ErrorClass::Internal);
    }

    #[test]
    fn pool_exhaustion_is_unavailable() {
        assert!(matches!(
            store_error("Failed to load schedule", &sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }
}
