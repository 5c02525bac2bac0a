//! Registration engine behaviour against the in-memory store.
//!
//! Run with: `cargo test -p exam-registration-testing --test engine_tests`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use chrono::Duration;
use exam_registration_core::engine::{EngineConfig, RegistrationEngine, TransitionOutcome};
use exam_registration_core::environment::Clock;
use exam_registration_core::error::{ErrorClass, RegistrationError, StoreError};
use exam_registration_core::store::{
    RegistrationStore, ReservationToken, ScheduleDirectory, StoreFuture,
};
use exam_registration_core::types::{
    PaymentStatus, Registration, RegistrationCode, RegistrationId, RegistrationStatus, RoomId,
    Schedule, ScheduleId, ScheduleStatus, Seat, SeatId, SubjectId,
};
use exam_registration_testing::{
    InMemoryRegistrationStore, InMemoryScheduleDirectory, ScriptedCodeGenerator, TestHarness,
    test_clock,
};
use std::sync::{Arc, Mutex};

fn code(raw: &str) -> RegistrationCode {
    RegistrationCode::parse(raw).unwrap()
}

async fn register(harness: &TestHarness, schedule: &Schedule) -> Registration {
    harness
        .engine
        .register(SubjectId::new(), schedule.id, None, None)
        .await
        .expect("registration should succeed")
}

// ============================================================================
// Capacity
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_registers_never_exceed_capacity() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(Some(5));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let engine = harness.engine.clone();
            let schedule_id = schedule.id;
            tokio::spawn(async move {
                engine
                    .register(SubjectId::new(), schedule_id, None, None)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("task should not panic"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let exhausted = results
        .iter()
        .filter(|r| matches!(r, Err(RegistrationError::CapacityExhausted)))
        .count();

    assert_eq!(successes, 5);
    assert_eq!(exhausted, 35);
    assert_eq!(harness.store.active_count(schedule.id), 5);
    assert_eq!(harness.engine.reserved_count(schedule.id).await.unwrap(), 5);
}

#[tokio::test]
async fn unlimited_schedule_always_admits() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);

    for _ in 0..50 {
        register(&harness, &schedule).await;
    }
    assert_eq!(harness.store.active_count(schedule.id), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_registers_for_one_seat_admit_exactly_one() {
    let harness = TestHarness::new();
    let seated = harness.seated_schedule(None, 1);
    let seat_id = seated.seats[0].id;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = harness.engine.clone();
            let schedule_id = seated.schedule.id;
            let room_id = seated.room_id;
            tokio::spawn(async move {
                engine
                    .register(SubjectId::new(), schedule_id, Some(room_id), Some(seat_id))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == RegistrationError::SeatUnavailable)
    );
    assert_eq!(harness.store.seat_holders(seated.schedule.id, seat_id).len(), 1);
}

#[tokio::test]
async fn cancelling_a_confirmed_registration_frees_its_seat() {
    let harness = TestHarness::new();
    let seated = harness.seated_schedule(None, 1);
    let seat_id = seated.seats[0].id;

    let first = harness
        .engine
        .register(SubjectId::new(), seated.schedule.id, Some(seated.room_id), Some(seat_id))
        .await
        .unwrap();
    harness
        .engine
        .transition_payment(&first.registration_code, PaymentStatus::Paid, None)
        .await
        .unwrap();

    let blocked = harness
        .engine
        .register(SubjectId::new(), seated.schedule.id, Some(seated.room_id), Some(seat_id))
        .await;
    assert_eq!(blocked.unwrap_err(), RegistrationError::SeatUnavailable);

    let cancelled = harness.engine.cancel(first.id).await.unwrap();
    assert_eq!(cancelled.registration_status, RegistrationStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Paid);
    assert!(harness.store.hold_for(first.id).is_none());

    let second = harness
        .engine
        .register(SubjectId::new(), seated.schedule.id, Some(seated.room_id), Some(seat_id))
        .await
        .unwrap();
    assert_eq!(second.seat_id, Some(seat_id));
}

#[tokio::test]
async fn same_seat_on_different_schedules_is_independent() {
    let harness = TestHarness::new();
    let seated = harness.seated_schedule(None, 1);
    let seat_id = seated.seats[0].id;

    let mut other = harness.open_schedule(None);
    other.rooms = vec![seated.room_id];
    harness.directory.put_schedule(other.clone());

    for schedule_id in [seated.schedule.id, other.id] {
        harness
            .engine
            .register(SubjectId::new(), schedule_id, Some(seated.room_id), Some(seat_id))
            .await
            .unwrap();
    }
}

// ============================================================================
// Register preconditions
// ============================================================================

#[tokio::test]
async fn register_rejects_unknown_and_closed_schedules() {
    let harness = TestHarness::new();

    let unknown = harness
        .engine
        .register(SubjectId::new(), ScheduleId::new(), None, None)
        .await;
    assert_eq!(unknown.unwrap_err(), RegistrationError::ScheduleNotFound);

    let mut draft = harness.open_schedule(None);
    draft.status = ScheduleStatus::Draft;
    harness.directory.put_schedule(draft.clone());
    let result = harness
        .engine
        .register(SubjectId::new(), draft.id, None, None)
        .await;
    assert_eq!(result.unwrap_err(), RegistrationError::ScheduleClosed);

    let open = harness.open_schedule(None);
    harness.clock.advance(Duration::days(8));
    let late = harness
        .engine
        .register(SubjectId::new(), open.id, None, None)
        .await;
    assert_eq!(late.unwrap_err(), RegistrationError::ScheduleClosed);
}

#[tokio::test]
async fn register_validates_placement() {
    let harness = TestHarness::new();
    let seated = harness.seated_schedule(None, 2);
    let schedule_id = seated.schedule.id;
    let seat = seated.seats[0].id;

    let engine = &harness.engine;
    assert_eq!(
        engine
            .register(SubjectId::new(), schedule_id, None, Some(seat))
            .await
            .unwrap_err(),
        RegistrationError::SeatWithoutRoom
    );
    assert_eq!(
        engine
            .register(SubjectId::new(), schedule_id, Some(RoomId::new()), None)
            .await
            .unwrap_err(),
        RegistrationError::RoomNotInSchedule
    );

    let foreign = Seat {
        id: SeatId::new(),
        room_id: RoomId::new(),
        row_number: 9,
        column_number: 9,
        label: None,
        is_available: true,
    };
    harness.directory.put_seat(foreign.clone());
    assert_eq!(
        engine
            .register(SubjectId::new(), schedule_id, Some(seated.room_id), Some(foreign.id))
            .await
            .unwrap_err(),
        RegistrationError::SeatNotInRoom
    );

    let mut broken = seated.seats[1].clone();
    broken.is_available = false;
    harness.directory.put_seat(broken.clone());
    assert_eq!(
        engine
            .register(SubjectId::new(), schedule_id, Some(seated.room_id), Some(broken.id))
            .await
            .unwrap_err(),
        RegistrationError::SeatUnavailable
    );

    assert_eq!(
        engine
            .register(SubjectId::new(), schedule_id, Some(seated.room_id), Some(SeatId::new()))
            .await
            .unwrap_err(),
        RegistrationError::SeatUnavailable
    );

    // Room-based without a seat is fine.
    engine
        .register(SubjectId::new(), schedule_id, Some(seated.room_id), None)
        .await
        .unwrap();
    assert_eq!(harness.store.registrations().len(), 1);
}

#[tokio::test]
async fn new_registrations_start_pending() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    assert_eq!(registration.registration_status, RegistrationStatus::Pending);
    assert_eq!(registration.payment_status, PaymentStatus::Pending);
    assert_eq!(registration.created_at, harness.clock.now());
    assert_eq!(registration.registration_code.as_str().len(), 8);
    assert!(harness.store.hold_for(registration.id).is_some());
}

// ============================================================================
// Code generation
// ============================================================================

#[tokio::test]
async fn duplicate_code_is_regenerated() {
    let harness = TestHarness::with_codes(Arc::new(ScriptedCodeGenerator::new(&[
        "DUPE2345", "DUPE2345", "FRESH234",
    ])));
    let schedule = harness.open_schedule(None);

    let first = register(&harness, &schedule).await;
    let second = register(&harness, &schedule).await;

    assert_eq!(first.registration_code, code("DUPE2345"));
    assert_eq!(second.registration_code, code("FRESH234"));
}

#[tokio::test]
async fn persistent_collisions_exhaust_the_code_space() {
    let harness = TestHarness::with_codes(Arc::new(ScriptedCodeGenerator::new(&["SAME2345"])));
    let schedule = harness.open_schedule(None);
    register(&harness, &schedule).await;

    let err = harness
        .engine
        .register(SubjectId::new(), schedule.id, None, None)
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::CodeSpaceExhausted { attempts: 5 });
    assert_eq!(err.class(), ErrorClass::Internal);
    assert_eq!(harness.store.registrations().len(), 1);
    assert_eq!(harness.engine.reserved_count(schedule.id).await.unwrap(), 1);
}

#[tokio::test]
async fn cancelled_codes_are_never_reused() {
    let harness = TestHarness::with_codes(Arc::new(ScriptedCodeGenerator::new(&[
        "KEEP2345", "KEEP2345", "NEXT2345",
    ])));
    let schedule = harness.open_schedule(None);

    let first = register(&harness, &schedule).await;
    harness.engine.cancel(first.id).await.unwrap();

    let second = register(&harness, &schedule).await;
    assert_eq!(second.registration_code, code("NEXT2345"));
}

// ============================================================================
// Payment transitions
// ============================================================================

#[tokio::test]
async fn duplicate_paid_is_a_no_op() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;
    let code = registration.registration_code.clone();

    let first = harness
        .engine
        .transition_payment(&code, PaymentStatus::Paid, Some("TX1".into()))
        .await
        .unwrap();
    assert!(first.is_applied());
    assert_eq!(first.registration().registration_status, RegistrationStatus::Confirmed);
    assert_eq!(first.registration().payment_status, PaymentStatus::Paid);
    assert_eq!(first.registration().payment_reference.as_deref(), Some("TX1"));

    let second = harness
        .engine
        .transition_payment(&code, PaymentStatus::Paid, Some("TX1".into()))
        .await
        .unwrap();
    assert_eq!(second, TransitionOutcome::Unchanged(first.registration().clone()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_duplicate_deliveries_confirm_once() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = harness.engine.clone();
            let code = registration.registration_code.clone();
            tokio::spawn(async move {
                engine
                    .transition_payment(&code, PaymentStatus::Paid, None)
                    .await
            })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().expect("duplicate delivery must not error"))
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);

    let stored = harness.engine.get(registration.id).await.unwrap();
    assert_eq!(stored.registration_status, RegistrationStatus::Confirmed);
    assert_eq!(stored.version, registration.version + 1);
}

#[tokio::test]
async fn failed_payment_can_be_retried() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;
    let code = registration.registration_code.clone();

    let failed = harness
        .engine
        .transition_payment(&code, PaymentStatus::Failed, None)
        .await
        .unwrap()
        .into_registration();
    assert_eq!(failed.registration_status, RegistrationStatus::Pending);
    assert_eq!(failed.payment_status, PaymentStatus::Failed);

    let paid = harness
        .engine
        .transition_payment(&code, PaymentStatus::Paid, None)
        .await
        .unwrap()
        .into_registration();
    assert_eq!(paid.registration_status, RegistrationStatus::Confirmed);
}

#[tokio::test]
async fn stale_failure_never_demotes_a_settled_payment() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;
    let code = registration.registration_code.clone();

    harness
        .engine
        .transition_payment(&code, PaymentStatus::Paid, None)
        .await
        .unwrap();

    let err = harness
        .engine
        .transition_payment(&code, PaymentStatus::Failed, None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RegistrationError::InvalidPaymentTransition {
            from: PaymentStatus::Paid,
            to: PaymentStatus::Failed,
        }
    );
    assert_eq!(err.class(), ErrorClass::Conflict);

    let stored = harness.engine.get_by_code(&code).await.unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn paying_a_cancelled_registration_is_rejected() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;
    harness.engine.cancel(registration.id).await.unwrap();

    let err = harness
        .engine
        .transition_payment(&registration.registration_code, PaymentStatus::Paid, None)
        .await
        .unwrap_err();
    assert_eq!(err, RegistrationError::RegistrationTerminal(registration.id));

    let stored = harness.engine.get(registration.id).await.unwrap();
    assert_eq!(stored.registration_status, RegistrationStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn refund_cancels_and_releases_capacity() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(Some(1));
    let registration = register(&harness, &schedule).await;
    let code = registration.registration_code.clone();

    harness
        .engine
        .transition_payment(&code, PaymentStatus::Paid, None)
        .await
        .unwrap();
    let refunded = harness
        .engine
        .transition_payment(&code, PaymentStatus::Refunded, None)
        .await
        .unwrap();

    assert!(refunded.is_applied());
    assert_eq!(refunded.registration().registration_status, RegistrationStatus::Cancelled);
    assert_eq!(harness.engine.reserved_count(schedule.id).await.unwrap(), 0);

    let again = harness
        .engine
        .transition_payment(&code, PaymentStatus::Refunded, None)
        .await
        .unwrap();
    assert!(!again.is_applied());

    register(&harness, &schedule).await;
}

#[tokio::test]
async fn refund_requires_a_settled_payment() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    let err = harness
        .engine
        .transition_payment(&registration.registration_code, PaymentStatus::Refunded, None)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistrationError::InvalidPaymentTransition { .. }));
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .engine
        .transition_payment(&code("NOPE2345"), PaymentStatus::Paid, None)
        .await
        .unwrap_err();
    assert_eq!(err, RegistrationError::RegistrationNotFound);
    assert_eq!(err.class(), ErrorClass::NotFound);
}

#[tokio::test]
async fn manual_verification_confirms() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    let outcome = harness
        .engine
        .verify_payment_manually(&registration.registration_code, Some("BANK778899".into()))
        .await
        .unwrap();
    assert!(outcome.is_applied());
    assert_eq!(outcome.registration().registration_status, RegistrationStatus::Confirmed);
    assert_eq!(
        outcome.registration().payment_reference.as_deref(),
        Some("BANK778899")
    );
}

#[tokio::test]
async fn transitions_stamp_updated_at() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    harness.clock.advance(Duration::minutes(3));
    let paid = harness
        .engine
        .transition_payment(&registration.registration_code, PaymentStatus::Paid, None)
        .await
        .unwrap()
        .into_registration();

    assert_eq!(paid.created_at, registration.created_at);
    assert_eq!(paid.updated_at, registration.created_at + Duration::minutes(3));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_is_terminal() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    harness.engine.cancel(registration.id).await.unwrap();
    assert_eq!(
        harness.engine.cancel(registration.id).await.unwrap_err(),
        RegistrationError::RegistrationTerminal(registration.id)
    );
    assert_eq!(
        harness.engine.cancel(RegistrationId::new()).await.unwrap_err(),
        RegistrationError::RegistrationNotFound
    );
}

#[tokio::test]
async fn failed_release_is_recoverable() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(Some(1));
    let registration = register(&harness, &schedule).await;

    harness.store.fail_releases(true);
    let cancelled = harness.engine.cancel(registration.id).await.unwrap();
    assert_eq!(cancelled.registration_status, RegistrationStatus::Cancelled);
    assert!(harness.store.hold_for(registration.id).is_some());

    harness.store.fail_releases(false);
    assert!(harness.engine.release_hold(registration.id).await.unwrap());
    assert!(!harness.engine.release_hold(registration.id).await.unwrap());
    assert_eq!(harness.engine.reserved_count(schedule.id).await.unwrap(), 0);
}

#[tokio::test]
async fn release_hold_refuses_active_registrations() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    assert_eq!(
        harness.engine.release_hold(registration.id).await.unwrap_err(),
        RegistrationError::RegistrationActive(registration.id)
    );
    assert!(harness.store.hold_for(registration.id).is_some());
}

#[tokio::test]
async fn releasing_an_unknown_token_is_a_no_op() {
    let harness = TestHarness::new();
    let token = ReservationToken {
        registration_id: RegistrationId::new(),
        schedule_id: ScheduleId::new(),
        room_id: None,
        seat_id: None,
    };
    assert!(!harness.engine.allocator().release(&token).await.unwrap());
}

// ============================================================================
// Payment info
// ============================================================================

#[tokio::test]
async fn payment_info_is_recorded_without_confirming() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    let updated = harness
        .engine
        .submit_payment_info(registration.id, "bank transfer", Some("TRX123456"))
        .await
        .unwrap();

    assert_eq!(updated.payment_method.as_deref(), Some("bank transfer"));
    assert_eq!(updated.payment_reference.as_deref(), Some("TRX123456"));
    assert_eq!(updated.payment_status, PaymentStatus::Pending);
    assert_eq!(updated.registration_status, RegistrationStatus::Pending);
}

#[tokio::test]
async fn payment_info_is_validated() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    for (method, reference) in [("", None), ("card", Some("abc")), ("card", Some("TRX-12345"))] {
        let err = harness
            .engine
            .submit_payment_info(registration.id, method, reference)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidInput(_)));
        assert_eq!(err.class(), ErrorClass::Validation);
    }
}

#[tokio::test]
async fn payment_info_after_settlement_is_ignored() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;
    let paid = harness
        .engine
        .transition_payment(&registration.registration_code, PaymentStatus::Paid, None)
        .await
        .unwrap()
        .into_registration();

    let after = harness
        .engine
        .submit_payment_info(registration.id, "cash", Some("LATE123456"))
        .await
        .unwrap();
    assert_eq!(after, paid);
}

#[tokio::test]
async fn payment_info_on_cancelled_registration_is_rejected() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;
    harness.engine.cancel(registration.id).await.unwrap();

    assert_eq!(
        harness
            .engine
            .submit_payment_info(registration.id, "cash", None)
            .await
            .unwrap_err(),
        RegistrationError::RegistrationTerminal(registration.id)
    );
}

// ============================================================================
// Storage failures
// ============================================================================

#[tokio::test]
async fn unavailable_storage_is_transient() {
    let harness = TestHarness::new();
    let schedule = harness.open_schedule(None);
    let registration = register(&harness, &schedule).await;

    harness.store.set_unavailable(true);
    let err = harness.engine.get(registration.id).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transient);
    assert!(err.class().is_retryable());
    assert!(harness.engine.ping().await.is_err());
}

#[derive(Clone)]
struct SlowDirectory;

impl ScheduleDirectory for SlowDirectory {
    fn schedule(&self, _id: ScheduleId) -> StoreFuture<'_, Option<Schedule>> {
        Box::pin(async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(None)
        })
    }

    fn seat(&self, _id: SeatId) -> StoreFuture<'_, Option<Seat>> {
        Box::pin(async { Ok(None) })
    }
}

#[tokio::test]
async fn slow_storage_times_out() {
    let engine = RegistrationEngine::new(
        Arc::new(InMemoryRegistrationStore::new()),
        Arc::new(SlowDirectory),
        Arc::new(ScriptedCodeGenerator::new(&["SLOW2345"])),
        Arc::new(test_clock()),
        EngineConfig {
            storage_timeout: std::time::Duration::from_millis(50),
            max_transition_retries: 3,
        },
    );

    let err = engine
        .register(SubjectId::new(), ScheduleId::new(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err, RegistrationError::Storage(StoreError::Timeout));
    assert!(err.class().is_retryable());
}

// ============================================================================
// Cancel / payment races
// ============================================================================

/// Store that lets a competing write land just before the next conditional update.
struct RacingStore {
    inner: InMemoryRegistrationStore,
    interject: Mutex<Option<(RegistrationStatus, PaymentStatus)>>,
}

impl RacingStore {
    fn new(inner: InMemoryRegistrationStore) -> Self {
        Self {
            inner,
            interject: Mutex::new(None),
        }
    }

    fn race_next_update(
        &self,
        registration_status: RegistrationStatus,
        payment_status: PaymentStatus,
    ) {
        *self.interject.lock().unwrap() = Some((registration_status, payment_status));
    }
}

impl RegistrationStore for RacingStore {
    fn reserve(
        &self,
        registration: Registration,
        limit: Option<u32>,
    ) -> StoreFuture<'_, ReservationToken> {
        self.inner.reserve(registration, limit)
    }

    fn release(&self, token: &ReservationToken) -> StoreFuture<'_, bool> {
        self.inner.release(token)
    }

    fn get(&self, id: RegistrationId) -> StoreFuture<'_, Option<Registration>> {
        self.inner.get(id)
    }

    fn get_by_code(&self, code: &RegistrationCode) -> StoreFuture<'_, Option<Registration>> {
        self.inner.get_by_code(code)
    }

    fn conditional_update(
        &self,
        registration: Registration,
        expected_version: i64,
    ) -> StoreFuture<'_, Registration> {
        Box::pin(async move {
            let competing = self.interject.lock().unwrap().take();
            if let Some((registration_status, payment_status)) = competing {
                let mut current = self.inner.get(registration.id).await?.unwrap();
                let version = current.version;
                current.registration_status = registration_status;
                current.payment_status = payment_status;
                self.inner.conditional_update(current, version).await?;
            }
            self.inner.conditional_update(registration, expected_version).await
        })
    }

    fn reserved_count(&self, schedule_id: ScheduleId) -> StoreFuture<'_, u32> {
        self.inner.reserved_count(schedule_id)
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        self.inner.ping()
    }
}

fn racing_engine() -> (RegistrationEngine, Arc<RacingStore>, Schedule) {
    let store = Arc::new(RacingStore::new(InMemoryRegistrationStore::new()));
    let directory = InMemoryScheduleDirectory::new();
    let clock = test_clock();
    let schedule = Schedule {
        id: ScheduleId::new(),
        title: "Oral examination".to_string(),
        registration_deadline: clock.now() + Duration::days(7),
        status: ScheduleStatus::Active,
        max_candidates: None,
        min_candidates: None,
        rooms: vec![],
    };
    directory.put_schedule(schedule.clone());

    let engine = RegistrationEngine::new(
        Arc::clone(&store) as Arc<dyn RegistrationStore>,
        Arc::new(directory),
        Arc::new(exam_registration_core::code::RandomCodeGenerator::default()),
        Arc::new(clock),
        EngineConfig::default(),
    );
    (engine, store, schedule)
}

#[tokio::test]
async fn cancel_loses_to_a_committed_payment() {
    let (engine, store, schedule) = racing_engine();
    let registration = engine
        .register(SubjectId::new(), schedule.id, None, None)
        .await
        .unwrap();

    store.race_next_update(RegistrationStatus::Confirmed, PaymentStatus::Paid);
    let err = engine.cancel(registration.id).await.unwrap_err();

    assert_eq!(err, RegistrationError::RegistrationChanged(registration.id));
    let stored = engine.get(registration.id).await.unwrap();
    assert_eq!(stored.registration_status, RegistrationStatus::Confirmed);
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn payment_loses_to_a_committed_cancel() {
    let (engine, store, schedule) = racing_engine();
    let registration = engine
        .register(SubjectId::new(), schedule.id, None, None)
        .await
        .unwrap();

    store.race_next_update(RegistrationStatus::Cancelled, PaymentStatus::Pending);
    let err = engine
        .transition_payment(&registration.registration_code, PaymentStatus::Paid, None)
        .await
        .unwrap_err();

    assert_eq!(err, RegistrationError::RegistrationTerminal(registration.id));
    let stored = engine.get(registration.id).await.unwrap();
    assert_eq!(stored.registration_status, RegistrationStatus::Cancelled);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn duplicate_payment_racing_itself_resolves_to_unchanged() {
    let (engine, store, schedule) = racing_engine();
    let registration = engine
        .register(SubjectId::new(), schedule.id, None, None)
        .await
        .unwrap();

    store.race_next_update(RegistrationStatus::Confirmed, PaymentStatus::Paid);
    let outcome = engine
        .transition_payment(&registration.registration_code, PaymentStatus::Paid, None)
        .await
        .unwrap();

    assert!(!outcome.is_applied());
    assert_eq!(outcome.registration().version, registration.version + 1);
}
