//! # Exam Registration Core
//!
//! Registration lifecycle and payment reconciliation for exam sittings.
//!
//! A candidate registers for a schedule; the engine holds capacity (and
//! optionally a seat), issues a short public registration code and stores a
//! `(pending, pending)` registration. Payment providers later report the
//! outcome through a signed webhook, which the [`reconciler`] authenticates
//! and applies idempotently.
//!
//! ## Components
//!
//! - [`code`]: collision-resistant human-readable codes
//! - [`allocator`]: capacity and seat holds against a schedule
//! - [`engine`]: the registration state machine
//! - [`reconciler`]: webhook authentication and payment reconciliation
//! - [`store`]: storage and venue-data traits the above are built on
//!
//! ## Example
//!
//! ```ignore
//! use exam_registration_core::*;
//!
//! let engine = RegistrationEngine::new(store, directory, codes, clock, EngineConfig::default());
//! let registration = engine.register(subject, schedule, None, None).await?;
//!
//! let verifier = WebhookVerifier::new(Some(secret), DEFAULT_TOLERANCE);
//! let reconciler = Reconciler::new(engine, verifier);
//! let outcome = reconciler.reconcile(signature, timestamp, &body).await?;
//! ```

pub mod allocator;
pub mod code;
pub mod engine;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod reconciler;
pub mod store;
pub mod types;

pub use allocator::CapacityAllocator;
pub use code::{CodeGenerator, RandomCodeGenerator, DEFAULT_CODE_LENGTH, MAX_CODE_ATTEMPTS};
pub use engine::{EngineConfig, PaymentSource, RegistrationEngine, TransitionOutcome};
pub use environment::{Clock, SystemClock};
pub use error::{ErrorClass, RegistrationError, StoreError};
pub use reconciler::{
    AuthError, PaymentNotification, ReconcileError, ReconcileOutcome, Reconciler, TrustMode,
    WebhookVerifier, DEFAULT_TOLERANCE,
};
pub use store::{RegistrationStore, ReservationToken, ScheduleDirectory, StoreFuture};
pub use types::{
    PaymentStatus, Registration, RegistrationCode, RegistrationId, RegistrationStatus, RoomId,
    Schedule, ScheduleId, ScheduleStatus, Seat, SeatId, SubjectId,
};
