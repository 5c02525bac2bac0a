//! Fixtures: an engine wired to in-memory collaborators, schedule builders,
//! a scripted code generator and webhook signing.

use crate::memory::{InMemoryRegistrationStore, InMemoryScheduleDirectory};
use crate::mocks::{FixedClock, test_clock};
use chrono::Duration;
use exam_registration_core::code::{CodeGenerator, RandomCodeGenerator};
use exam_registration_core::engine::{EngineConfig, RegistrationEngine};
use exam_registration_core::environment::Clock;
use exam_registration_core::reconciler::{DEFAULT_TOLERANCE, Reconciler, WebhookVerifier};
use exam_registration_core::types::{
    RegistrationCode, RoomId, Schedule, ScheduleId, ScheduleStatus, Seat, SeatId,
};
use hmac::{Hmac, Mac};
use secrecy::SecretString;
use sha2::Sha256;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Code generator replaying a fixed list of codes.
///
/// Once the list is down to its last code, that code is returned forever,
/// which makes persistent collisions easy to provoke.
#[derive(Debug)]
pub struct ScriptedCodeGenerator {
    codes: Mutex<VecDeque<RegistrationCode>>,
}

impl ScriptedCodeGenerator {
    /// Create a generator replaying `codes` in order.
    ///
    /// # Panics
    ///
    /// If `codes` is empty or contains a malformed code.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(codes: &[&str]) -> Self {
        assert!(!codes.is_empty(), "at least one code is required");
        let codes = codes
            .iter()
            .map(|c| RegistrationCode::parse(c).expect("scripted codes must be well formed"))
            .collect();
        Self {
            codes: Mutex::new(codes),
        }
    }
}

impl CodeGenerator for ScriptedCodeGenerator {
    #[allow(clippy::expect_used)]
    fn generate(&self) -> RegistrationCode {
        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        if codes.len() > 1 {
            codes.pop_front().expect("length checked above")
        } else {
            codes.front().cloned().expect("never empty")
        }
    }
}

/// Hex HMAC-SHA-256 signature over `"{timestamp}.{body}"`, as a payment
/// provider would send it.
///
/// # Panics
///
/// Never in practice; HMAC accepts keys of any length.
#[must_use]
#[allow(clippy::expect_used)]
pub fn sign_webhook(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// An engine wired to in-memory storage and a fixed clock.
///
/// The public handles share state with the engine.
#[derive(Clone)]
pub struct TestHarness {
    /// Engine under test
    pub engine: RegistrationEngine,
    /// Storage backing the engine
    pub store: InMemoryRegistrationStore,
    /// Schedules and seats visible to the engine
    pub directory: InMemoryScheduleDirectory,
    /// Clock the engine reads
    pub clock: FixedClock,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Harness with random codes and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codes(Arc::new(RandomCodeGenerator::default()))
    }

    /// Harness with a specific code generator.
    #[must_use]
    pub fn with_codes(codes: Arc<dyn CodeGenerator>) -> Self {
        Self::build(codes, EngineConfig::default())
    }

    /// Harness with a specific engine configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(Arc::new(RandomCodeGenerator::default()), config)
    }

    fn build(codes: Arc<dyn CodeGenerator>, config: EngineConfig) -> Self {
        let store = InMemoryRegistrationStore::new();
        let directory = InMemoryScheduleDirectory::new();
        let clock = test_clock();
        let engine = RegistrationEngine::new(
            Arc::new(store.clone()),
            Arc::new(directory.clone()),
            codes,
            Arc::new(clock.clone()),
            config,
        );
        Self {
            engine,
            store,
            directory,
            clock,
        }
    }

    /// Reconciler over this harness's engine. `None` runs unauthenticated.
    #[must_use]
    pub fn reconciler(&self, secret: Option<&str>) -> Reconciler {
        Reconciler::new(
            self.engine.clone(),
            WebhookVerifier::new(
                secret.map(|s| SecretString::new(s.to_string())),
                DEFAULT_TOLERANCE,
            ),
        )
    }

    /// Publish an active schedule without rooms, open for a week.
    pub fn open_schedule(&self, max_candidates: Option<u32>) -> Schedule {
        let schedule = Schedule {
            id: ScheduleId::new(),
            title: "Written examination".to_string(),
            registration_deadline: self.clock.now() + Duration::days(7),
            status: ScheduleStatus::Active,
            max_candidates,
            min_candidates: None,
            rooms: vec![],
        };
        self.directory.put_schedule(schedule.clone());
        schedule
    }

    /// Publish an active schedule with one room of `seats` seats.
    pub fn seated_schedule(&self, max_candidates: Option<u32>, seats: usize) -> SeatedSchedule {
        let room_id = RoomId::new();
        let mut schedule = self.open_schedule(max_candidates);
        schedule.rooms = vec![room_id];
        self.directory.put_schedule(schedule.clone());

        let seats = (0..seats)
            .map(|n| {
                let column = i32::try_from(n).unwrap_or(i32::MAX) + 1;
                let seat = Seat {
                    id: SeatId::new(),
                    room_id,
                    row_number: 1,
                    column_number: column,
                    label: Some(format!("A{column}")),
                    is_available: true,
                };
                self.directory.put_seat(seat.clone());
                seat
            })
            .collect();

        SeatedSchedule {
            schedule,
            room_id,
            seats,
        }
    }
}

/// A schedule with one seated room, as built by [`TestHarness::seated_schedule`].
#[derive(Clone, Debug)]
pub struct SeatedSchedule {
    /// The schedule
    pub schedule: Schedule,
    /// Its only room
    pub room_id: RoomId,
    /// Seats of that room
    pub seats: Vec<Seat>,
}
