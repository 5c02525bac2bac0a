//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by domain.

pub mod admin;
pub mod health;
pub mod registrations;
pub mod webhook;

use chrono::{DateTime, Utc};
use exam_registration_core::types::{PaymentStatus, Registration, RegistrationStatus};
use serde::Serialize;
use uuid::Uuid;

// Re-export common handler utilities
pub use health::{health_check, readiness_check};

/// Registration as returned to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationView {
    /// Registration id
    pub id: Uuid,
    /// Public registration code
    pub registration_code: String,
    /// Owning candidate
    pub subject_id: Uuid,
    /// Exam sitting
    pub schedule_id: Uuid,
    /// Room, when allocated
    pub room_id: Option<Uuid>,
    /// Seat, when allocated
    pub seat_id: Option<Uuid>,
    /// Admission status
    pub status: RegistrationStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Self-reported payment method
    pub payment_method: Option<String>,
    /// Payment reference
    pub payment_reference: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last change
    pub updated_at: DateTime<Utc>,
}

impl From<Registration> for RegistrationView {
    fn from(r: Registration) -> Self {
        Self {
            id: *r.id.as_uuid(),
            registration_code: r.registration_code.into(),
            subject_id: *r.subject_id.as_uuid(),
            schedule_id: *r.schedule_id.as_uuid(),
            room_id: r.room_id.map(|id| *id.as_uuid()),
            seat_id: r.seat_id.map(|id| *id.as_uuid()),
            status: r.registration_status,
            payment_status: r.payment_status,
            payment_method: r.payment_method,
            payment_reference: r.payment_reference,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
