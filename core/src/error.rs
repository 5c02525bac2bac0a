//! Error taxonomy.
//!
//! Storage failures ([`StoreError`]) and engine failures ([`RegistrationError`])
//! are kept apart so the engine can translate storage conditions (a unique-index
//! hit, a lost version race) into the domain conditions callers act on.
//!
//! Every error belongs to exactly one [`ErrorClass`]. The class decides how a
//! caller should react; only [`ErrorClass::Transient`] warrants a retry. The
//! `Display` text of an error may carry storage detail and is meant for logs;
//! callers outside the process receive [`RegistrationError::public_message`].

use crate::types::{PaymentStatus, RegistrationId};
use thiserror::Error;

/// How a caller should treat a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed input; never retried
    Validation,
    /// Bad or missing credentials, stale signature; never retried with the same credentials
    Authorization,
    /// The request is well-formed but conflicts with current state
    Conflict,
    /// The referenced registration or schedule does not exist
    NotFound,
    /// Storage unavailable or timed out; retry with backoff
    Transient,
    /// Misconfiguration or invariant breach; operator attention required
    Internal,
}

impl ErrorClass {
    /// Only transient failures should be retried by the caller.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Internal => "internal",
        }
    }
}

/// Errors raised by a [`crate::store::RegistrationStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The registration code is already taken (by any registration, ever).
    #[error("registration code already in use")]
    DuplicateCode,

    /// The schedule has no remaining slots.
    #[error("capacity exhausted")]
    CapacityExhausted,

    /// The seat is held by another active registration.
    #[error("seat already held")]
    SeatTaken,

    /// No registration with the given key.
    #[error("registration not found")]
    NotFound,

    /// Optimistic concurrency conflict on a conditional update.
    #[error("Concurrency conflict: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The version the caller based its write on
        expected: i64,
        /// The version currently stored
        actual: i64,
    },

    /// The call did not complete within the configured bound.
    #[error("storage call timed out")]
    Timeout,

    /// The backend cannot be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Any other backend failure (constraint, decode, protocol).
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Classification of a storage failure that escapes the engine untranslated.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateCode
            | Self::CapacityExhausted
            | Self::SeatTaken
            | Self::ConcurrencyConflict { .. } => ErrorClass::Conflict,
            Self::NotFound => ErrorClass::NotFound,
            Self::Timeout | Self::Unavailable(_) => ErrorClass::Transient,
            Self::Database(_) => ErrorClass::Internal,
        }
    }
}

/// Errors raised by the registration engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The requested schedule does not exist.
    #[error("schedule not found")]
    ScheduleNotFound,

    /// The schedule is past its deadline or not active.
    #[error("schedule is closed for registration")]
    ScheduleClosed,

    /// The schedule has no remaining slots.
    #[error("no remaining capacity for this schedule")]
    CapacityExhausted,

    /// The seat is held, out of service, or unknown.
    #[error("seat is not available")]
    SeatUnavailable,

    /// The seat is not part of the requested room.
    #[error("seat does not belong to the requested room")]
    SeatNotInRoom,

    /// The room does not host the requested schedule.
    #[error("room is not allocated to this schedule")]
    RoomNotInSchedule,

    /// A seat was requested without naming its room.
    #[error("a seat can only be requested together with its room")]
    SeatWithoutRoom,

    /// No registration matches the given id or code.
    #[error("registration not found")]
    RegistrationNotFound,

    /// The registration is cancelled and accepts no further transitions.
    #[error("registration {0} is cancelled")]
    RegistrationTerminal(RegistrationId),

    /// The operation requires a cancelled registration.
    #[error("registration {0} is still active")]
    RegistrationActive(RegistrationId),

    /// The payment move is not a legal settlement step (for example a stale
    /// `failed` notification arriving after `paid`).
    #[error("payment cannot move from {from} to {to}")]
    InvalidPaymentTransition {
        /// Current payment status
        from: PaymentStatus,
        /// Requested payment status
        to: PaymentStatus,
    },

    /// Another write landed between read and update; the caller should re-read.
    #[error("registration {0} was modified concurrently")]
    RegistrationChanged(RegistrationId),

    /// Client-supplied data failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Code generation kept colliding; the alphabet or length is misconfigured.
    #[error("could not generate a unique registration code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// How many codes were tried
        attempts: u32,
    },

    /// Storage failure not translated into a domain condition.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl RegistrationError {
    /// Classification used by every outer surface.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::SeatNotInRoom
            | Self::RoomNotInSchedule
            | Self::SeatWithoutRoom
            | Self::InvalidInput(_) => ErrorClass::Validation,
            Self::ScheduleClosed
            | Self::CapacityExhausted
            | Self::SeatUnavailable
            | Self::RegistrationTerminal(_)
            | Self::RegistrationActive(_)
            | Self::InvalidPaymentTransition { .. }
            | Self::RegistrationChanged(_) => ErrorClass::Conflict,
            Self::ScheduleNotFound | Self::RegistrationNotFound => ErrorClass::NotFound,
            Self::CodeSpaceExhausted { .. } => ErrorClass::Internal,
            Self::Storage(e) => e.class(),
        }
    }

    /// Stable machine-readable code for API clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ScheduleNotFound => "SCHEDULE_NOT_FOUND",
            Self::ScheduleClosed => "SCHEDULE_CLOSED",
            Self::CapacityExhausted => "CAPACITY_EXHAUSTED",
            Self::SeatUnavailable => "SEAT_UNAVAILABLE",
            Self::SeatNotInRoom => "SEAT_NOT_IN_ROOM",
            Self::RoomNotInSchedule => "ROOM_NOT_IN_SCHEDULE",
            Self::SeatWithoutRoom => "SEAT_WITHOUT_ROOM",
            Self::RegistrationNotFound => "REGISTRATION_NOT_FOUND",
            Self::RegistrationTerminal(_) => "REGISTRATION_TERMINAL",
            Self::RegistrationActive(_) => "REGISTRATION_ACTIVE",
            Self::InvalidPaymentTransition { .. } => "INVALID_PAYMENT_TRANSITION",
            Self::RegistrationChanged(_) => "REGISTRATION_CHANGED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::CodeSpaceExhausted { .. } => "INTERNAL_ERROR",
            Self::Storage(e) => match e.class() {
                ErrorClass::Transient => "SERVICE_UNAVAILABLE",
                _ => "INTERNAL_ERROR",
            },
        }
    }

    /// Sanitized message safe to return to callers outside the process.
    ///
    /// Storage and internal failures collapse to generic text; the full error is
    /// expected to be logged by whoever renders this message.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Transient => {
                "Service temporarily unavailable. Please try again later.".to_string()
            }
            ErrorClass::Internal => "An internal error occurred.".to_string(),
            _ => match self {
                Self::RegistrationTerminal(_) => {
                    "This registration has been cancelled.".to_string()
                }
                Self::RegistrationActive(_) => "This registration is still active.".to_string(),
                Self::RegistrationChanged(_) => {
                    "This registration was updated by another request. Reload and try again."
                        .to_string()
                }
                Self::Storage(_) => "This operation conflicts with existing data.".to_string(),
                other => {
                    let mut text = other.to_string();
                    if let Some(first) = text.get_mut(0..1) {
                        first.make_ascii_uppercase();
                    }
                    text.push('.');
                    text
                }
            },
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;
