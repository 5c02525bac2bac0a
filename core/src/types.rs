//! Domain types for exam registration.
//!
//! Identifiers, the [`Registration`] entity with its two status axes, and the
//! read-only [`Schedule`] / [`Seat`] inputs consumed from the venue layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Internal identifier of a registration. Never shown to payment providers.
    RegistrationId
);
uuid_id!(
    /// Identifier of the candidate who owns a registration
    SubjectId
);
uuid_id!(
    /// Identifier of an exam sitting
    ScheduleId
);
uuid_id!(
    /// Identifier of a venue room
    RoomId
);
uuid_id!(
    /// Identifier of a seat inside a room
    SeatId
);

// ============================================================================
// Registration code
// ============================================================================

/// Longest code accepted from external callers.
pub const MAX_CODE_LEN: usize = 20;

/// Public correlation key of a registration.
///
/// Always uppercase ASCII alphanumerics, 1 to [`MAX_CODE_LEN`] characters.
/// Generated codes are 6 to 8 characters long (see [`crate::code`]); the wider
/// accepted range only applies to parsing inbound references.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistrationCode(String);

/// Raised when a string is not a well-formed registration code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("registration code must be 1-20 characters of A-Z or 0-9")]
pub struct InvalidCode;

impl RegistrationCode {
    /// Normalize (trim + uppercase) and validate a code.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCode`] if the normalized value is empty, longer than
    /// [`MAX_CODE_LEN`], or contains anything other than `A-Z` / `0-9`.
    pub fn parse(raw: &str) -> Result<Self, InvalidCode> {
        let normalized = raw.trim().to_ascii_uppercase();
        let well_formed = !normalized.is_empty()
            && normalized.len() <= MAX_CODE_LEN
            && normalized
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());

        if well_formed {
            Ok(Self(normalized))
        } else {
            Err(InvalidCode)
        }
    }

    /// Wrap a string already known to be drawn from the generator alphabet.
    pub(crate) const fn from_alphabet(raw: String) -> Self {
        Self(raw)
    }

    /// Borrow the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RegistrationCode {
    type Error = InvalidCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RegistrationCode> for String {
    fn from(code: RegistrationCode) -> Self {
        code.0
    }
}

impl fmt::Display for RegistrationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// Admission status of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Seat held, waiting for payment
    Pending,
    /// Payment settled; only reachable together with [`PaymentStatus::Paid`]
    Confirmed,
    /// Terminal; the hold has been (or is being) released
    Cancelled,
    /// Recorded by the surrounding system; holds no seat
    Waitlisted,
}

impl RegistrationStatus {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Waitlisted => "waitlisted",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "waitlisted" => Some(Self::Waitlisted),
            _ => None,
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Nothing settled yet
    Pending,
    /// Settlement confirmed by a verified notification or an operator
    Paid,
    /// The provider reported a failed attempt; payment may still be retried
    Failed,
    /// A settled payment was returned
    Refunded,
}

impl PaymentStatus {
    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal settlement step.
    ///
    /// Same-status moves are handled as no-ops by the engine and are not
    /// considered here.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid | Self::Failed)
                | (Self::Failed, Self::Paid)
                | (Self::Paid, Self::Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Registration entity
// ============================================================================

/// A candidate's claim on a place in an exam sitting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Internal identifier
    pub id: RegistrationId,
    /// Public correlation key, immutable
    pub registration_code: RegistrationCode,
    /// Owning candidate
    pub subject_id: SubjectId,
    /// Sitting registered for
    pub schedule_id: ScheduleId,
    /// Room, for room-based sittings
    pub room_id: Option<RoomId>,
    /// Seat, for seat-based rooms
    pub seat_id: Option<SeatId>,
    /// Admission status
    pub registration_status: RegistrationStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Self-reported payment method
    pub payment_method: Option<String>,
    /// Self-reported or provider-supplied payment reference
    pub payment_reference: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last committed transition
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by every committed write
    pub version: i64,
}

impl Registration {
    /// Build a fresh `(pending, pending)` registration.
    #[must_use]
    pub fn new_pending(
        code: RegistrationCode,
        subject_id: SubjectId,
        schedule_id: ScheduleId,
        room_id: Option<RoomId>,
        seat_id: Option<SeatId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegistrationId::new(),
            registration_code: code,
            subject_id,
            schedule_id,
            room_id,
            seat_id,
            registration_status: RegistrationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Active registrations count against capacity and hold their seat.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registration_status != RegistrationStatus::Cancelled
    }

    /// Cancelled registrations accept no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.registration_status == RegistrationStatus::Cancelled
    }
}

// ============================================================================
// Capacity inputs (owned by the venue/schedule layer)
// ============================================================================

/// Publication status of an exam sitting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    /// Not yet published
    Draft,
    /// Open for registration until the deadline
    Active,
    /// Called off
    Cancelled,
    /// Already held
    Completed,
}

impl ScheduleStatus {
    /// Parse the database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// An exam sitting as seen by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Sitting identifier
    pub id: ScheduleId,
    /// Display title
    pub title: String,
    /// Last instant at which registration is accepted
    pub registration_deadline: DateTime<Utc>,
    /// Publication status
    pub status: ScheduleStatus,
    /// Upper bound on active registrations; `None` means unlimited
    pub max_candidates: Option<u32>,
    /// Lower bound required for the sitting to go ahead (informational)
    pub min_candidates: Option<u32>,
    /// Rooms hosting this sitting; empty for sittings without room allocation
    pub rooms: Vec<RoomId>,
}

impl Schedule {
    /// Whether registration is accepted at `now`.
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Active && now <= self.registration_deadline
    }

    /// Whether `room` hosts this sitting.
    #[must_use]
    pub fn hosts_room(&self, room: RoomId) -> bool {
        self.rooms.contains(&room)
    }
}

/// A physical seat as seen by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Seat identifier
    pub id: SeatId,
    /// Room the seat belongs to
    pub room_id: RoomId,
    /// Row position
    pub row_number: i32,
    /// Column position
    pub column_number: i32,
    /// Optional printed label
    pub label: Option<String>,
    /// `false` when the venue layer has taken the seat out of service
    pub is_available: bool,
}
