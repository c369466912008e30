//! Stock / line-item consistency against a real database.
//!
//! Covers the invariants the transactional core exists for: every line
//! mutation pairs with the inverse stock movement, rejected mutations leave
//! nothing behind, and concurrent consumers never drive stock negative.

mod common;

use common::*;
use pitcrew::entities::WorkOrderStatus;
use pitcrew::line_items::{self, NewProductLine, ProductLinePatch};
use pitcrew::work_orders::{self, WorkOrderPatch};
use pitcrew::{ClientExecutor, Executor, WorkshopError};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

fn new_product_line(work_order_id: Uuid, product_id: Uuid, qty: &str) -> NewProductLine {
    pitcrew::patch::from_value(json!({
        "work_order_id": work_order_id,
        "product_id": product_id,
        "qty": qty,
        "unit_price": "10.00"
    }))
    .expect("valid line input")
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_create_product_line_decrements_stock() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product = seed_product(&db, d("10"));

    let line = line_items::create_product_line(&db, new_product_line(wo, product, "3")).unwrap();
    assert_eq!(line.qty, d("3"));
    assert_eq!(line.product_id, Some(product));
    assert_eq!(product_stock(&db, product), d("7"));
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_insufficient_stock_leaves_no_partial_effect() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product = seed_product(&db, d("2"));

    let err = line_items::create_product_line(&db, new_product_line(wo, product, "5")).unwrap_err();
    assert!(matches!(err, WorkshopError::Conflict(_)));
    assert_eq!(product_stock(&db, product), d("2"));
    assert_eq!(product_line_count(&db, wo), 0);
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_qty_edit_applies_symmetric_delta() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product = seed_product(&db, d("10"));

    let line = line_items::create_product_line(&db, new_product_line(wo, product, "4")).unwrap();
    assert_eq!(product_stock(&db, product), d("6"));

    // increase consumes the delta
    let patch: ProductLinePatch = pitcrew::patch::from_value(json!({"qty": "6"})).unwrap();
    let line = line_items::update_product_line(&db, line.work_order_product_id, patch).unwrap();
    assert_eq!(line.qty, d("6"));
    assert_eq!(product_stock(&db, product), d("4"));

    // decrease restores the delta
    let patch: ProductLinePatch = pitcrew::patch::from_value(json!({"qty": "1"})).unwrap();
    let line = line_items::update_product_line(&db, line.work_order_product_id, patch).unwrap();
    assert_eq!(line.qty, d("1"));
    assert_eq!(product_stock(&db, product), d("9"));

    // increase past available stock is rejected with no stock movement
    let patch: ProductLinePatch = pitcrew::patch::from_value(json!({"qty": "100"})).unwrap();
    let err = line_items::update_product_line(&db, line.work_order_product_id, patch).unwrap_err();
    assert!(matches!(err, WorkshopError::Conflict(_)));
    assert_eq!(product_stock(&db, product), d("9"));
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_delete_line_restores_stock() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product = seed_product(&db, d("10"));

    let line = line_items::create_product_line(&db, new_product_line(wo, product, "4")).unwrap();
    assert_eq!(product_stock(&db, product), d("6"));

    line_items::delete_product_line(&db, line.work_order_product_id).unwrap();
    assert_eq!(product_stock(&db, product), d("10"));
    assert_eq!(product_line_count(&db, wo), 0);
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_cancelled_order_blocks_line_mutations() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product = seed_product(&db, d("10"));

    let line = line_items::create_product_line(&db, new_product_line(wo, product, "2")).unwrap();

    let patch: WorkOrderPatch = pitcrew::patch::from_value(json!({"status": "Cancelled "})).unwrap();
    let updated = work_orders::update_work_order(&db, wo, patch).unwrap();
    assert_eq!(updated.status, WorkOrderStatus::Cancelled);

    let err = line_items::create_product_line(&db, new_product_line(wo, product, "1")).unwrap_err();
    assert!(matches!(err, WorkshopError::InvalidState(_)));

    let patch: ProductLinePatch = pitcrew::patch::from_value(json!({"qty": "5"})).unwrap();
    let err = line_items::update_product_line(&db, line.work_order_product_id, patch).unwrap_err();
    assert!(matches!(err, WorkshopError::InvalidState(_)));

    let err = line_items::delete_product_line(&db, line.work_order_product_id).unwrap_err();
    assert!(matches!(err, WorkshopError::InvalidState(_)));

    // none of the rejected mutations moved stock
    assert_eq!(product_stock(&db, product), d("8"));
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_work_order_delete_restores_stock_per_line() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product_a = seed_product(&db, d("10"));
    let product_b = seed_product(&db, d("5"));

    line_items::create_product_line(&db, new_product_line(wo, product_a, "3")).unwrap();
    let line_b = line_items::create_product_line(&db, new_product_line(wo, product_b, "2")).unwrap();

    // null the second line's product reference: its qty must not be restored
    db.execute(
        "UPDATE work_order_products SET product_id = NULL WHERE work_order_product_id = $1",
        &[&line_b.work_order_product_id],
    )
    .unwrap();

    work_orders::delete_work_order(&db, wo).unwrap();

    assert_eq!(product_stock(&db, product_a), d("10"));
    assert_eq!(product_stock(&db, product_b), d("3"));
    assert!(matches!(
        work_orders::get_work_order(&db, wo),
        Err(WorkshopError::NotFound(_))
    ));
}

#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_promote_from_appointment_is_idempotent() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let service = seed_service(&db);

    let row = db
        .query_one(
            "INSERT INTO appointments (customer_id, vehicle_id, service_id, scheduled_start) \
             VALUES ($1, $2, $3, now()) RETURNING appointment_id",
            &[&customer, &vehicle, &service],
        )
        .unwrap();
    let appointment: Uuid = row.get("appointment_id");

    let (first, created) = work_orders::promote_from_appointment(&db, appointment).unwrap();
    assert!(created);
    assert_eq!(first.appointment_id, Some(appointment));
    assert_eq!(first.status, WorkOrderStatus::Open);

    let (second, created) = work_orders::promote_from_appointment(&db, appointment).unwrap();
    assert!(!created);
    assert_eq!(second.work_order_id, first.work_order_id);

    let err = work_orders::promote_from_appointment(&db, Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, WorkshopError::NotFound(_)));
}

/// Ten coroutines race to consume a stock of five; exactly five single-unit
/// lines may win and stock must end at zero, never negative.
#[test]
#[ignore = "requires a PostgreSQL database"]
fn test_concurrent_line_creates_never_oversell() {
    let db = setup();
    let customer = seed_customer(&db);
    let vehicle = seed_vehicle(&db, customer);
    let wo = seed_work_order(&db, customer, vehicle);
    let product = seed_product(&db, d("5"));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let url = db_url();
        let handle = may::go!(move || {
            let client = pitcrew::connect(&url).expect("worker connection");
            let worker = ClientExecutor::new(client);
            line_items::create_product_line(&worker, new_product_line(wo, product, "1")).is_ok()
        });
        handles.push(handle);
    }

    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap_or(false))
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 5);
    assert_eq!(product_stock(&db, product), Decimal::ZERO);
    assert_eq!(product_line_count(&db, wo), 5);
}
