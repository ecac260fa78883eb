use super::*;
use crate::notify::Filter;
use crate::time::parse_date;
use std::time::Duration;

// ── Fixtures ─────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("spacebook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn open_engine(path: PathBuf) -> Engine {
    let notify = Arc::new(NotifyHub::with_grace(Duration::ZERO));
    Engine::new(path, notify, PasswordPolicy::new(4)).unwrap()
}

fn space(id: &str, name: &str, category: SpaceCategory) -> Space {
    Space {
        id: id.into(),
        name: name.into(),
        category,
        capacity: 25,
        location: "Building F - Ground Floor".into(),
        description: String::new(),
        active: true,
    }
}

fn date(text: &str) -> NaiveDate {
    parse_date(text).unwrap()
}

fn request(space_id: &str, day: &str, start: &str, end: &str, items: &[(&str, u32)]) -> ReservationRequest {
    ReservationRequest {
        space_id: space_id.into(),
        date: date(day),
        start: start.into(),
        end: end.into(),
        items: items.iter().map(|(id, q)| (id.to_string(), *q)).collect(),
        purpose: "class".into(),
    }
}

/// lab_1 with 25 PCs and a projector, plus an approved standard user and an admin.
async fn lab_engine(name: &str) -> (Engine, Actor, Actor) {
    let engine = open_engine(test_wal_path(name));
    let sys = Actor::System;
    engine
        .create_space(&sys, space("lab_1", "Lab 1", SpaceCategory::Lab))
        .await
        .unwrap();
    engine
        .add_equipment_kind(&sys, EquipmentKind { id: "eq_pc".into(), name: "Computer".into() })
        .await
        .unwrap();
    engine
        .add_equipment_kind(&sys, EquipmentKind { id: "eq_proyector".into(), name: "Projector".into() })
        .await
        .unwrap();
    engine.link_equipment(&sys, "lab_1", "eq_pc", 25).await.unwrap();
    engine.link_equipment(&sys, "lab_1", "eq_proyector", 1).await.unwrap();

    let student = register(&engine, "student@example.edu", true).await;
    engine.bootstrap_admin("admin@example.edu", "admin-secret").await.unwrap();
    let admin = Actor::User(engine.login("admin@example.edu", "admin-secret").unwrap());
    (engine, Actor::User(student), admin)
}

async fn register(engine: &Engine, email: &str, approve: bool) -> User {
    let user = engine
        .register_user(Registration {
            email: email.into(),
            password: "password1".into(),
            name: "Ana".into(),
            last_name: "Ruiz".into(),
            institutional_id: "2024001".into(),
        })
        .await
        .unwrap();
    if approve {
        engine
            .update_user(&Actor::System, user.id, UserPatch { approved: Some(true), ..UserPatch::default() })
            .await
            .unwrap()
    } else {
        user
    }
}

fn unavailable(result: Result<Reservation, EngineError>) -> Rejection {
    match result {
        Err(EngineError::Unavailable(r)) => r,
        other => panic!("expected availability rejection, got {other:?}"),
    }
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn whole_space_overlap_is_rejected() {
    let (engine, student, _) = lab_engine("whole_space_overlap.wal").await;

    let first = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
    assert_eq!(first.status, ReservationStatus::Pending);
    assert_eq!(first.span, Span::new(600, 720));
    assert_eq!(first.space_name, "Lab 1");

    let second = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "11:00", "13:00", &[]))
        .await;
    assert_eq!(unavailable(second), Rejection::SlotOccupied);
}

#[tokio::test]
async fn back_to_back_and_other_days_do_not_conflict() {
    let (engine, student, _) = lab_engine("back_to_back.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "12:00", "13:00", &[]))
        .await
        .unwrap();
    engine
        .create_reservation(&student, request("lab_1", "02/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
}

#[tokio::test]
async fn shared_equipment_capacity() {
    let (engine, student, _) = lab_engine("shared_capacity.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[("eq_pc", 12)]))
        .await
        .unwrap();
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "11:00", "12:00", &[("eq_pc", 8)]))
        .await
        .unwrap();

    let six = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "11:00", "11:30", &[("eq_pc", 6)]))
        .await;
    assert_eq!(
        unavailable(six),
        Rejection::InsufficientEquipment {
            equipment: "Computer".into(),
            requested: 6,
            remaining: 5,
        }
    );

    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "11:00", "11:30", &[("eq_pc", 5)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn equipment_blocked_by_whole_space_booking() {
    let (engine, student, _) = lab_engine("equipment_blocked.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "11:00", "11:30", &[("eq_pc", 1)]))
        .await;
    assert_eq!(unavailable(r), Rejection::BookedForEvent);
}

#[tokio::test]
async fn whole_space_blocked_by_equipment_booking() {
    let (engine, student, _) = lab_engine("whole_blocked.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[("eq_proyector", 1)]))
        .await
        .unwrap();
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "9:00 AM", "10:30 AM", &[]))
        .await;
    assert_eq!(unavailable(r), Rejection::SlotOccupied);
}

#[tokio::test]
async fn cancelled_reservations_free_the_slot() {
    let (engine, student, _) = lab_engine("cancelled_frees.wal").await;
    let first = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
    engine.cancel_reservation(&student, first.id).await.unwrap();

    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
}

#[tokio::test]
async fn unparseable_or_inverted_times_are_refused() {
    let (engine, student, _) = lab_engine("bad_times.wal").await;
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "noon", "13:00", &[]))
        .await;
    assert!(matches!(r, Err(EngineError::InvalidTime(_))));

    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "13:00", "12:00", &[]))
        .await;
    assert!(matches!(r, Err(EngineError::Invalid(_))));

    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "12:00", "12:00", &[]))
        .await;
    assert!(matches!(r, Err(EngineError::Invalid(_))));
}

#[tokio::test]
async fn unknown_space_and_equipment() {
    let (engine, student, _) = lab_engine("unknown_refs.wal").await;
    let r = engine
        .create_reservation(&student, request("lab_9", "01/09/2025", "10:00", "11:00", &[]))
        .await;
    assert!(matches!(r, Err(EngineError::NotFound("space", _))));

    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[("eq_laser", 1)]))
        .await;
    assert!(matches!(r, Err(EngineError::NotFound("equipment", _))));

    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[("eq_pc", 0)]))
        .await;
    assert!(matches!(r, Err(EngineError::Invalid(_))));
}

#[tokio::test]
async fn duplicate_line_items_are_summed() {
    let (engine, student, _) = lab_engine("duplicate_items.wal").await;
    let r = engine
        .create_reservation(
            &student,
            request("lab_1", "01/09/2025", "10:00", "11:00", &[("eq_pc", 10), ("eq_pc", 10)]),
        )
        .await
        .unwrap();
    assert_eq!(r.items.len(), 1);
    assert_eq!(r.items[0].quantity, 20);

    let over = engine
        .create_reservation(
            &student,
            request("lab_1", "01/09/2025", "10:00", "11:00", &[("eq_pc", 3), ("eq_pc", 3)]),
        )
        .await;
    assert!(matches!(
        unavailable(over),
        Rejection::InsufficientEquipment { requested: 6, remaining: 5, .. }
    ));
}

#[tokio::test]
async fn inactive_space_refuses_bookings() {
    let (engine, student, admin) = lab_engine("inactive_space.wal").await;
    let patch = SpacePatch { active: Some(false), ..SpacePatch::default() };
    engine.update_space(&admin, "lab_1", patch).await.unwrap();

    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await;
    assert!(matches!(r, Err(EngineError::Inactive(_))));
}

#[tokio::test]
async fn concurrent_space_edits_both_land() {
    let (engine, _, admin) = lab_engine("concurrent_space_edits.wal").await;
    let rename = SpacePatch { name: Some("Networks Lab".into()), ..SpacePatch::default() };
    let relocate = SpacePatch { location: Some("Building K".into()), ..SpacePatch::default() };

    let (a, b) = tokio::join!(
        engine.update_space(&admin, "lab_1", rename),
        engine.update_space(&admin, "lab_1", relocate),
    );
    a.unwrap();
    b.unwrap();

    let lab = engine.get_space("lab_1").await.unwrap();
    assert_eq!(lab.name, "Networks Lab");
    assert_eq!(lab.location, "Building K");
}

#[tokio::test]
async fn space_edit_is_validated_after_patching() {
    let (engine, _, admin) = lab_engine("space_edit_validation.wal").await;
    let blank = SpacePatch { name: Some("  ".into()), ..SpacePatch::default() };
    let r = engine.update_space(&admin, "lab_1", blank).await;
    assert!(matches!(r, Err(EngineError::Invalid(_))));
    assert_eq!(engine.get_space("lab_1").await.unwrap().name, "Lab 1");

    let r = engine.update_space(&admin, "nowhere", SpacePatch::default()).await;
    assert!(matches!(r, Err(EngineError::NotFound("space", _))));
}

#[tokio::test]
async fn lowered_ceiling_reports_negative_remaining() {
    let (engine, student, admin) = lab_engine("lowered_ceiling.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[("eq_pc", 20)]))
        .await
        .unwrap();
    engine.link_equipment(&admin, "lab_1", "eq_pc", 15).await.unwrap();

    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[("eq_pc", 1)]))
        .await;
    let rejection = unavailable(r);
    assert!(matches!(rejection, Rejection::InsufficientEquipment { remaining: -5, .. }));
    assert!(rejection.to_string().contains("0 left"));
}

#[tokio::test]
async fn admin_bookings_start_approved() {
    let (engine, _, admin) = lab_engine("admin_approved.wal").await;
    let r = engine
        .create_reservation(&admin, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();
    assert_eq!(r.status, ReservationStatus::Approved);
}

#[tokio::test]
async fn concurrent_requests_for_same_slot_admit_one() {
    let (engine, student, _) = lab_engine("concurrent_slot.wal").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let student = student.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
                .await
        }));
    }
    let mut granted = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn check_availability_is_a_dry_run() {
    let (engine, student, _) = lab_engine("dry_run.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[("eq_pc", 25)]))
        .await
        .unwrap();

    let d = engine
        .check_availability(&request("lab_1", "01/09/2025", "11:00", "11:30", &[("eq_pc", 1)]))
        .await
        .unwrap();
    assert!(!d.is_granted());
    let d = engine
        .check_availability(&request("lab_1", "01/09/2025", "12:00", "13:00", &[("eq_pc", 1)]))
        .await
        .unwrap();
    assert!(d.is_granted());
    assert_eq!(engine.day_agenda("lab_1", date("01/09/2025")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn free_slots_of_a_day() {
    let (engine, student, _) = lab_engine("free_slots.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
    let cancelled = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "14:00", "15:00", &[]))
        .await
        .unwrap();
    engine.cancel_reservation(&student, cancelled.id).await.unwrap();

    let free = engine.free_slots("lab_1", date("01/09/2025")).await.unwrap();
    assert_eq!(free, vec![Span::new(0, 600), Span::new(720, 1440)]);
}

// ── Lifecycle & permissions ──────────────────────────────

#[tokio::test]
async fn approve_and_reject_need_admin() {
    let (engine, student, admin) = lab_engine("approve_permissions.wal").await;
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();

    assert!(matches!(
        engine.approve_reservation(&student, r.id).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.reject_reservation(&student, r.id, "no").await,
        Err(EngineError::Forbidden(_))
    ));

    engine.approve_reservation(&admin, r.id).await.unwrap();
    assert_eq!(
        engine.get_reservation(&r.id).await.unwrap().status,
        ReservationStatus::Approved
    );
    assert!(matches!(
        engine.approve_reservation(&admin, r.id).await,
        Err(EngineError::InvalidTransition { from: ReservationStatus::Approved, .. })
    ));

    engine.reject_reservation(&admin, r.id, "maintenance").await.unwrap();
    let after = engine.get_reservation(&r.id).await.unwrap();
    assert_eq!(after.status, ReservationStatus::Cancelled);
    assert_eq!(after.rejection_reason.as_deref(), Some("maintenance"));
}

#[tokio::test]
async fn owner_cancel_and_delete() {
    let (engine, student, admin) = lab_engine("owner_cancel.wal").await;
    let other = Actor::User(register(&engine, "other@example.edu", true).await);
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();

    assert!(matches!(
        engine.cancel_reservation(&other, r.id).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.delete_reservation(&student, r.id).await,
        Err(EngineError::InvalidTransition { action: "delete", .. })
    ));

    engine.cancel_reservation(&student, r.id).await.unwrap();
    let cancelled = engine.get_reservation(&r.id).await.unwrap();
    assert_eq!(cancelled.rejection_reason.as_deref(), Some(CANCELLED_BY_USER));
    assert!(matches!(
        engine.cancel_reservation(&student, r.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));

    assert!(matches!(
        engine.delete_reservation(&other, r.id).await,
        Err(EngineError::Forbidden(_))
    ));
    engine.delete_reservation(&admin, r.id).await.unwrap();
    assert!(engine.get_reservation(&r.id).await.is_none());
    assert!(matches!(
        engine.delete_reservation(&admin, r.id).await,
        Err(EngineError::NotFound("reservation", _))
    ));
}

#[tokio::test]
async fn user_listing_and_history() {
    let (engine, student, _) = lab_engine("user_history.wal").await;
    let user_id = student.user().unwrap().id;
    let first = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();
    let second = engine
        .create_reservation(&student, request("lab_1", "02/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();
    engine.cancel_reservation(&student, first.id).await.unwrap();

    let current = engine.reservations_for_user(user_id, false).await;
    assert_eq!(current.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id]);

    let history = engine.reservations_for_user(user_id, true).await;
    assert_eq!(history.len(), 2);
    assert!(history[0].created_at >= history[1].created_at);
}

#[tokio::test]
async fn pending_queue_is_oldest_first_and_admin_only() {
    let (engine, student, admin) = lab_engine("pending_queue.wal").await;
    let a = engine
        .create_reservation(&student, request("lab_1", "03/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();

    assert!(matches!(
        engine.pending_reservations(&student).await,
        Err(EngineError::Forbidden(_))
    ));
    let pending = engine.pending_reservations(&admin).await.unwrap();
    assert_eq!(pending.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, b.id]);
}

#[tokio::test]
async fn recurring_keeps_successes_and_reports_conflicts() {
    let (engine, student, admin) = lab_engine("recurring.wal").await;
    engine
        .create_reservation(&student, request("lab_1", "08/09/2025", "10:30", "11:00", &[]))
        .await
        .unwrap();

    let outcome = engine
        .create_recurring(
            &admin,
            request("lab_1", "01/09/2025", "10:00", "12:00", &[]),
            date("22/09/2025"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.granted.len(), 3);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].0, date("08/09/2025"));

    for id in &outcome.granted {
        let r = engine.get_reservation(id).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Approved);
    }

    assert!(matches!(
        engine
            .create_recurring(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]), date("22/09/2025"))
            .await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine
            .create_recurring(&admin, request("lab_1", "01/09/2025", "13:00", "14:00", &[]), date("31/08/2025"))
            .await,
        Err(EngineError::Invalid(_))
    ));
}

#[test]
fn recurring_failure_after_grants_keeps_the_report() {
    let booked = |day: &str| Reservation {
        id: Ulid::new(),
        user_id: Ulid::new(),
        space_id: "lab_1".into(),
        space_name: "Lab 1".into(),
        items: vec![],
        date: date(day),
        span: Span::new(600, 720),
        status: ReservationStatus::Approved,
        purpose: String::new(),
        rejection_reason: None,
        created_at: 0,
    };
    let first = booked("01/09/2025");

    let mut outcome = RecurringOutcome::default();
    assert!(mutations::tally(&mut outcome, date("01/09/2025"), Ok(first.clone())).unwrap());
    assert!(mutations::tally(
        &mut outcome,
        date("08/09/2025"),
        Err(EngineError::Unavailable(Rejection::SlotOccupied)),
    )
    .unwrap());
    let go_on = mutations::tally(
        &mut outcome,
        date("15/09/2025"),
        Err(EngineError::WalError("disk full".into())),
    )
    .unwrap();

    assert!(!go_on);
    assert_eq!(outcome.granted, vec![first.id]);
    assert_eq!(outcome.conflicts.len(), 1);
    let (when, error) = outcome.failed.unwrap();
    assert_eq!(when, date("15/09/2025"));
    assert!(error.contains("disk full"));
}

#[test]
fn recurring_failure_before_any_grant_is_an_error() {
    let mut outcome = RecurringOutcome::default();
    let r = mutations::tally(
        &mut outcome,
        date("01/09/2025"),
        Err(EngineError::LimitExceeded("too many reservations for this space")),
    );
    assert!(matches!(r, Err(EngineError::LimitExceeded(_))));
    assert!(outcome.failed.is_none());
}

#[tokio::test]
async fn statistics_summary() {
    let (engine, student, admin) = lab_engine("statistics.wal").await;
    engine
        .create_space(&admin, space("aula_1", "Aula 1", SpaceCategory::Room))
        .await
        .unwrap();
    let a = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[]))
        .await
        .unwrap();
    let b = engine
        .create_reservation(&student, request("lab_1", "02/09/2025", "10:00", "11:30", &[]))
        .await
        .unwrap();
    let c = engine
        .create_reservation(&student, request("aula_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();
    engine.approve_reservation(&admin, a.id).await.unwrap();
    engine.approve_reservation(&admin, b.id).await.unwrap();
    engine.cancel_reservation(&student, c.id).await.unwrap();

    assert!(matches!(engine.statistics(&student).await, Err(EngineError::Forbidden(_))));
    let stats = engine.statistics(&admin).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.most_requested, Some(("Lab 1".to_string(), 2)));
    assert_eq!(stats.approved_hours, 3); // 210 minutes
    assert_eq!((stats.pending, stats.approved, stats.cancelled), (0, 2, 1));
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn catalog_management() {
    let (engine, student, admin) = lab_engine("catalog.wal").await;
    assert!(matches!(
        engine.create_space(&student, space("x", "X", SpaceCategory::Room)).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine.create_space(&admin, space("lab_1", "Dup", SpaceCategory::Lab)).await,
        Err(EngineError::AlreadyExists("space", _))
    ));
    let generated = engine
        .create_space(&admin, space("", "Studio", SpaceCategory::Studio))
        .await
        .unwrap();
    assert!(!generated.id.is_empty());

    let names: Vec<String> = engine.list_spaces().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Lab 1".to_string(), "Studio".to_string()]);

    let stock = engine.space_equipment("lab_1").await.unwrap();
    assert_eq!(stock.len(), 2);
    assert_eq!(stock[0].equipment_id, "eq_pc");
    assert_eq!(stock[0].name, "Computer");
    assert_eq!(stock[0].quantity, 25);

    engine.unlink_equipment(&admin, "lab_1", "eq_proyector").await.unwrap();
    assert!(matches!(
        engine.unlink_equipment(&admin, "lab_1", "eq_proyector").await,
        Err(EngineError::NotFound("equipment link", _))
    ));
    assert_eq!(engine.space_equipment("lab_1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_space_refused_while_booked() {
    let (engine, student, admin) = lab_engine("delete_space.wal").await;
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();
    assert!(matches!(
        engine.delete_space(&admin, "lab_1").await,
        Err(EngineError::HasReservations(_))
    ));

    engine.cancel_reservation(&student, r.id).await.unwrap();
    engine.delete_space(&admin, "lab_1").await.unwrap();
    assert!(engine.get_space("lab_1").await.is_none());
    assert!(engine.get_reservation(&r.id).await.is_none());
    assert!(matches!(
        engine
            .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
            .await,
        Err(EngineError::NotFound("space", _))
    ));
}

#[tokio::test]
async fn favorites_toggle() {
    let (engine, student, _) = lab_engine("favorites.wal").await;
    let user_id = student.user().unwrap().id;
    assert!(engine.toggle_favorite(&student, "lab_1").await.unwrap());
    assert_eq!(engine.favorites(&user_id), vec!["lab_1".to_string()]);
    assert!(!engine.toggle_favorite(&student, "lab_1").await.unwrap());
    assert!(engine.favorites(&user_id).is_empty());
    assert!(matches!(
        engine.toggle_favorite(&student, "nowhere").await,
        Err(EngineError::NotFound("space", _))
    ));
}

// ── Accounts ─────────────────────────────────────────────

#[tokio::test]
async fn login_gate() {
    let (engine, _, admin) = lab_engine("login_gate.wal").await;
    let pending = register(&engine, "New@Example.edu", false).await;

    assert!(matches!(
        engine.login("new@example.edu", "password1"),
        Err(EngineError::PendingApproval)
    ));
    assert!(matches!(
        engine.login("new@example.edu", "wrong-password"),
        Err(EngineError::BadCredentials)
    ));
    assert!(matches!(
        engine.login("nobody@example.edu", "password1"),
        Err(EngineError::BadCredentials)
    ));

    engine
        .update_user(&admin, pending.id, UserPatch { approved: Some(true), ..UserPatch::default() })
        .await
        .unwrap();
    let user = engine.login("NEW@example.edu", "password1").unwrap();
    assert_eq!(user.id, pending.id);
}

#[tokio::test]
async fn duplicate_email_is_refused() {
    let (engine, _, _) = lab_engine("duplicate_email.wal").await;
    let r = engine
        .register_user(Registration {
            email: "STUDENT@example.edu".into(),
            password: "password1".into(),
            name: "B".into(),
            last_name: "C".into(),
            institutional_id: "X".into(),
        })
        .await;
    assert!(matches!(r, Err(EngineError::AlreadyExists("account", _))));
}

#[tokio::test]
async fn promotion_approves_and_profile_edits_are_scoped() {
    let (engine, student, admin) = lab_engine("promotion.wal").await;
    let pending = register(&engine, "p@example.edu", false).await;
    let me = student.user().unwrap().id;

    assert!(matches!(
        engine
            .update_user(&student, me, UserPatch { role: Some(Role::Admin), ..UserPatch::default() })
            .await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        engine
            .update_user(&student, pending.id, UserPatch { name: Some("X".into()), ..UserPatch::default() })
            .await,
        Err(EngineError::Forbidden(_))
    ));
    let renamed = engine
        .update_user(&student, me, UserPatch { name: Some("Ana María".into()), ..UserPatch::default() })
        .await
        .unwrap();
    assert_eq!(renamed.name, "Ana María");

    let promoted = engine
        .update_user(&admin, pending.id, UserPatch { role: Some(Role::Admin), ..UserPatch::default() })
        .await
        .unwrap();
    assert!(promoted.is_admin());
    assert!(promoted.approved);

    engine.delete_user(&admin, pending.id).await.unwrap();
    assert!(engine.get_user(&pending.id).is_none());
    assert!(matches!(engine.login("p@example.edu", "password1"), Err(EngineError::BadCredentials)));
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let reservation_id;
    let user_id;
    {
        let (engine, student, admin) = {
            let engine = open_engine(path.clone());
            let sys = Actor::System;
            engine.create_space(&sys, space("lab_1", "Lab 1", SpaceCategory::Lab)).await.unwrap();
            engine
                .add_equipment_kind(&sys, EquipmentKind { id: "eq_pc".into(), name: "Computer".into() })
                .await
                .unwrap();
            engine.link_equipment(&sys, "lab_1", "eq_pc", 25).await.unwrap();
            let student = Actor::User(register(&engine, "s@example.edu", true).await);
            engine.bootstrap_admin("a@example.edu", "admin-secret").await.unwrap();
            let admin = Actor::User(engine.login("a@example.edu", "admin-secret").unwrap());
            (engine, student, admin)
        };
        user_id = student.user().unwrap().id;
        let r = engine
            .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "12:00", &[("eq_pc", 20)]))
            .await
            .unwrap();
        engine.approve_reservation(&admin, r.id).await.unwrap();
        engine.toggle_favorite(&student, "lab_1").await.unwrap();
        reservation_id = r.id;
    }

    let engine = open_engine(path);
    let r = engine.get_reservation(&reservation_id).await.unwrap();
    assert_eq!(r.status, ReservationStatus::Approved);
    assert_eq!(r.user_id, user_id);
    assert_eq!(engine.favorites(&user_id), vec!["lab_1".to_string()]);
    assert_eq!(engine.space_equipment("lab_1").await.unwrap()[0].quantity, 25);
    assert!(engine.login("s@example.edu", "password1").is_ok());

    // Replayed commitments still count.
    let student = Actor::User(engine.get_user(&user_id).unwrap());
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "11:00", "12:00", &[("eq_pc", 6)]))
        .await;
    assert!(matches!(
        unavailable(r),
        Rejection::InsufficientEquipment { remaining: 5, .. }
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let (kept, user_id) = {
        let engine = open_engine(path.clone());
        let sys = Actor::System;
        engine.create_space(&sys, space("lab_1", "Lab 1", SpaceCategory::Lab)).await.unwrap();
        let student = Actor::User(register(&engine, "s@example.edu", true).await);
        let mut kept = Vec::new();
        for day in 1..=9 {
            let r = engine
                .create_reservation(&student, request("lab_1", &format!("0{day}/09/2025"), "10:00", "11:00", &[]))
                .await
                .unwrap();
            if day % 3 == 0 {
                engine.cancel_reservation(&student, r.id).await.unwrap();
                engine.delete_reservation(&student, r.id).await.unwrap();
            } else {
                kept.push(r.id);
            }
        }
        assert!(engine.wal_appends_since_compact().await > 0);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        (kept, student.user().unwrap().id)
    };

    let engine = open_engine(path);
    let mut ids: Vec<Ulid> = engine
        .reservations_for_user(user_id, true)
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort();
    let mut expected = kept;
    expected.sort();
    assert_eq!(ids, expected);
}

// ── Live changes ─────────────────────────────────────────

#[tokio::test]
async fn owner_subscription_sees_status_changes() {
    let (engine, student, admin) = lab_engine("subscription.wal").await;
    let user_id = student.user().unwrap().id;
    let r = engine
        .create_reservation(&student, request("lab_1", "01/09/2025", "10:00", "11:00", &[]))
        .await
        .unwrap();

    let mut sub = engine.subscribe(Filter::OwnReservations(user_id)).await;
    // Snapshot first.
    let first = sub.try_next().unwrap();
    assert_eq!(first.kind, crate::notify::ChangeKind::Added);

    engine.approve_reservation(&admin, r.id).await.unwrap();
    let change = sub.next().await.unwrap();
    assert_eq!(change.kind, crate::notify::ChangeKind::Modified);
    match change.record {
        crate::notify::Record::Reservation(r) => assert_eq!(r.status, ReservationStatus::Approved),
        other => panic!("unexpected record {other:?}"),
    }
}
