//! Slot capacity and booking behavior against a real database.

mod common;

use common::*;
use pitcrew::appointments::{self, NewBooking};
use pitcrew::entities::AppointmentStatus;
use pitcrew::{ClientExecutor, Executor, WorkshopError};
use serde_json::json;
use uuid::Uuid;

fn seed_slot(db: &ClientExecutor, capacity: i32) -> Uuid {
    let row = db
        .query_one(
            "INSERT INTO appointment_slots (start_at, end_at, capacity) \
             VALUES (now() + interval '1 day', now() + interval '1 day 2 hours', $1) \
             RETURNING slot_id",
            &[&capacity],
        )
        .expect("seed slot");
    row.get("slot_id")
}

fn booking(vehicle_id: Uuid, service_id: Uuid, slot_id: Uuid) -> NewBooking {
    pitcrew::patch::from_value(json!({
        "vehicle_id": vehicle_id,
        "service_id": service_id,
        "slot_id": slot_id,
        "requested_work": "brake inspection"
    }))
    .expect("valid booking input")
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_booking_consumes_capacity_until_full() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let service = seed_service(&db);
    let slot = seed_slot(&db, 2);

    let first = appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap();
    assert_eq!(first.status, AppointmentStatus::Scheduled);
    assert_eq!(first.progress_percent, 0);
    assert_eq!(first.slot_id, Some(slot));

    appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap();

    let err =
        appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap_err();
    assert!(matches!(err, WorkshopError::Conflict(_)));
    assert_eq!(appointments::used_capacity(&db, slot).unwrap(), 2);
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_cancelled_appointment_releases_its_seat() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let service = seed_service(&db);
    let slot = seed_slot(&db, 1);

    let appt = appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap();
    let err =
        appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap_err();
    assert!(matches!(err, WorkshopError::Conflict(_)));

    appointments::cancel_appointment(&db, customer, appt.appointment_id).unwrap();
    assert_eq!(appointments::used_capacity(&db, slot).unwrap(), 0);

    // the freed seat is bookable again
    appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap();
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_vehicle_ownership_is_enforced() {
    let db = setup();
    let customer = seed_customer(&db);
    let other_customer = seed_customer(&db);
    let other_vehicle = seed_vehicle(&db, other_customer);
    let service = seed_service(&db);
    let slot = seed_slot(&db, 5);

    let err = appointments::book_appointment(&db, customer, booking(other_vehicle, service, slot))
        .unwrap_err();
    assert!(matches!(err, WorkshopError::Forbidden(_)));

    let err = appointments::book_appointment(&db, customer, booking(Uuid::new_v4(), service, slot))
        .unwrap_err();
    assert!(matches!(err, WorkshopError::NotFound(_)));
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_customer_cancel_only_while_scheduled() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let service = seed_service(&db);
    let slot = seed_slot(&db, 3);

    let appt = appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap();

    let patch = pitcrew::patch::from_value(json!({"status": "in_progress", "progress_percent": 25}))
        .unwrap();
    let updated = appointments::update_appointment_staff(&db, appt.appointment_id, patch).unwrap();
    assert_eq!(updated.status, AppointmentStatus::InProgress);

    let err = appointments::cancel_appointment(&db, customer, appt.appointment_id).unwrap_err();
    assert!(matches!(err, WorkshopError::Forbidden(_)));

    // still holding its seat
    assert_eq!(appointments::used_capacity(&db, slot).unwrap(), 1);
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_inactive_slot_is_not_bookable() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let service = seed_service(&db);
    let slot = seed_slot(&db, 3);

    let patch = pitcrew::patch::from_value(json!({"is_active": false})).unwrap();
    appointments::update_slot(&db, slot, patch).unwrap();

    let err =
        appointments::book_appointment(&db, customer, booking(vehicle, service, slot)).unwrap_err();
    assert!(matches!(err, WorkshopError::NotFound(_)));
}

/// Eight coroutines race for a slot with three seats; exactly three bookings
/// may land.
#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_concurrent_bookings_never_exceed_capacity() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let service = seed_service(&db);
    let slot = seed_slot(&db, 3);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let url = db_url();
        let handle = may::go!(move || {
            let client = pitcrew::connect(&url).expect("worker connection");
            let worker = ClientExecutor::new(client);
            appointments::book_appointment(&worker, customer, booking(vehicle, service, slot)).is_ok()
        });
        handles.push(handle);
    }

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap_or(false))
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 3);
    assert_eq!(appointments::used_capacity(&db, slot).unwrap(), 3);
}
