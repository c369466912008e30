//! Work-order lifecycle.
//!
//! Creation (direct or promoted from an appointment), the allow-listed staff
//! patch, transactional deletion with stock restitution, and the staff and
//! customer read paths.

use crate::entities::{WorkOrder, WorkOrders};
use crate::error::WorkshopError;
use crate::executor::{ClientExecutor, Executor};
use crate::patch::{clean_text, double_option};
use crate::transaction::with_transaction;
use chrono::{DateTime, Utc};
use may_postgres::types::ToSql;
use rust_decimal::Decimal;
use sea_query::{Expr, ExprTrait, PostgresQueryBuilder, Query};
use serde::Deserialize;
use uuid::Uuid;

fn default_status() -> String {
    "open".to_string()
}

fn default_authorization_status() -> String {
    "pending".to_string()
}

/// Input for opening a work order directly
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewWorkOrder {
    pub customer_id: Uuid,
    pub vehicle_id: Uuid,
    #[serde(default)]
    pub appointment_id: Option<Uuid>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_authorization_status")]
    pub authorization_status: String,
    #[serde(default)]
    pub customer_symptoms: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Fields a staff user may patch on a work order; any other key is rejected
/// wholesale with `Forbidden` before anything is written.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkOrderPatch {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub customer_symptoms: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub diagnosis: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub estimated_total: Option<Option<Decimal>>,
    #[serde(default)]
    pub authorization_status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub authorized_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub authorized_by: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_mechanic_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub closed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl WorkOrderPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.customer_symptoms.is_none()
            && self.diagnosis.is_none()
            && self.estimated_total.is_none()
            && self.authorization_status.is_none()
            && self.authorized_at.is_none()
            && self.authorized_by.is_none()
            && self.assigned_mechanic_id.is_none()
            && self.closed_at.is_none()
            && self.notes.is_none()
    }
}

/// Staff list filters; all optional, combined with AND
#[derive(Debug, Default)]
pub struct WorkOrderFilter {
    pub appointment_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    /// Matched case-insensitively against the stored status
    pub status: Option<String>,
}

/// Open a work order. Status and authorization status default to
/// `open`/`pending` when the caller does not supply them.
pub fn create_work_order(
    db: &ClientExecutor,
    input: NewWorkOrder,
) -> Result<WorkOrder, WorkshopError> {
    let status = input.status.trim().to_string();
    let authorization_status = input.authorization_status.trim().to_string();
    let customer_symptoms = clean_text(input.customer_symptoms);
    let notes = clean_text(input.notes);

    let sql = format!(
        "INSERT INTO work_orders \
           (appointment_id, customer_id, vehicle_id, status, customer_symptoms, \
            authorization_status, opened_at, notes, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, now(), $7, now(), now()) \
         RETURNING {}",
        WorkOrder::COLUMNS
    );
    let row = db.query_one(
        &sql,
        &[
            &input.appointment_id,
            &input.customer_id,
            &input.vehicle_id,
            &status,
            &customer_symptoms,
            &authorization_status,
            &notes,
        ],
    )?;
    Ok(WorkOrder::from_row(&row))
}

/// Promote an appointment into a work order.
///
/// Idempotent: if a work order already references the appointment it is
/// returned as-is and `created` is false. The appointment row is locked for
/// the duration so two concurrent promotions of the same appointment cannot
/// both insert.
pub fn promote_from_appointment(
    db: &ClientExecutor,
    appointment_id: Uuid,
) -> Result<(WorkOrder, bool), WorkshopError> {
    with_transaction(db, |tx| {
        let appointment = tx.query_opt(
            "SELECT customer_id, vehicle_id FROM appointments \
             WHERE appointment_id = $1 FOR UPDATE",
            &[&appointment_id],
        )?;
        let row = match appointment {
            Some(row) => row,
            None => {
                return Err(WorkshopError::NotFound(
                    "appointment does not exist".to_string(),
                ))
            }
        };
        let customer_id: Uuid = row.get("customer_id");
        let vehicle_id: Uuid = row.get("vehicle_id");

        let existing_sql = format!(
            "SELECT {} FROM work_orders WHERE appointment_id = $1",
            WorkOrder::COLUMNS
        );
        if let Some(row) = tx.query_opt(&existing_sql, &[&appointment_id])? {
            return Ok((WorkOrder::from_row(&row), false));
        }

        let insert_sql = format!(
            "INSERT INTO work_orders \
               (appointment_id, customer_id, vehicle_id, status, authorization_status, \
                opened_at, created_at, updated_at) \
             VALUES ($1, $2, $3, 'open', 'pending', now(), now(), now()) \
             RETURNING {}",
            WorkOrder::COLUMNS
        );
        let row = tx.query_one(&insert_sql, &[&appointment_id, &customer_id, &vehicle_id])?;
        Ok((WorkOrder::from_row(&row), true))
    })
}

fn fetch_work_order(tx: &impl Executor, work_order_id: Uuid) -> Result<WorkOrder, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM work_orders WHERE work_order_id = $1",
        WorkOrder::COLUMNS
    );
    match tx.query_opt(&sql, &[&work_order_id])? {
        Some(row) => Ok(WorkOrder::from_row(&row)),
        None => Err(WorkshopError::NotFound("work order does not exist".to_string())),
    }
}

fn work_order_update_sql(work_order_id: Uuid, patch: &WorkOrderPatch) -> String {
    let mut update = Query::update();
    update.table(WorkOrders::Table);
    if let Some(status) = &patch.status {
        update.value(WorkOrders::Status, status.trim());
    }
    if let Some(customer_symptoms) = &patch.customer_symptoms {
        update.value(WorkOrders::CustomerSymptoms, customer_symptoms.clone());
    }
    if let Some(diagnosis) = &patch.diagnosis {
        update.value(WorkOrders::Diagnosis, diagnosis.clone());
    }
    if let Some(estimated_total) = &patch.estimated_total {
        update.value(WorkOrders::EstimatedTotal, *estimated_total);
    }
    if let Some(authorization_status) = &patch.authorization_status {
        update.value(WorkOrders::AuthorizationStatus, authorization_status.trim());
    }
    if let Some(authorized_at) = &patch.authorized_at {
        update.value(WorkOrders::AuthorizedAt, *authorized_at);
    }
    if let Some(authorized_by) = &patch.authorized_by {
        update.value(WorkOrders::AuthorizedBy, authorized_by.clone());
    }
    if let Some(assigned_mechanic_id) = &patch.assigned_mechanic_id {
        update.value(WorkOrders::AssignedMechanicId, *assigned_mechanic_id);
    }
    if let Some(closed_at) = &patch.closed_at {
        update.value(WorkOrders::ClosedAt, *closed_at);
    }
    if let Some(notes) = &patch.notes {
        update.value(WorkOrders::Notes, notes.clone());
    }
    update.value(WorkOrders::UpdatedAt, Expr::cust("now()"));
    update.and_where(Expr::col(WorkOrders::WorkOrderId).eq(work_order_id));
    update.to_string(PostgresQueryBuilder)
}

/// Patch a work order. An empty patch is a no-op that returns the current
/// row. Status values are stored as given (trimmed); staff may move an order
/// through any workflow the shop uses, including back out of `cancelled`.
pub fn update_work_order(
    db: &ClientExecutor,
    work_order_id: Uuid,
    patch: WorkOrderPatch,
) -> Result<WorkOrder, WorkshopError> {
    let patch = WorkOrderPatch {
        customer_symptoms: patch.customer_symptoms.map(clean_text),
        diagnosis: patch.diagnosis.map(clean_text),
        authorized_by: patch.authorized_by.map(clean_text),
        notes: patch.notes.map(clean_text),
        ..patch
    };

    with_transaction(db, |tx| {
        let existing = fetch_work_order(tx, work_order_id)?;
        if patch.is_empty() {
            return Ok(existing);
        }

        tx.execute(&work_order_update_sql(work_order_id, &patch), &[])?;
        fetch_work_order(tx, work_order_id)
    })
}

/// Delete a work order, crediting every product line's quantity back to its
/// product before the rows go away.
///
/// The order row is locked first so no line mutation can interleave. Lines
/// whose product reference was nulled, or whose product row has vanished,
/// restore nothing; their recorded quantity is simply dropped with the line.
pub fn delete_work_order(db: &ClientExecutor, work_order_id: Uuid) -> Result<(), WorkshopError> {
    with_transaction(db, |tx| {
        let locked = tx.query_opt(
            "SELECT work_order_id FROM work_orders WHERE work_order_id = $1 FOR UPDATE",
            &[&work_order_id],
        )?;
        if locked.is_none() {
            return Err(WorkshopError::NotFound("work order does not exist".to_string()));
        }

        let lines = tx.query_all(
            "SELECT product_id, qty FROM work_order_products WHERE work_order_id = $1",
            &[&work_order_id],
        )?;
        for line in &lines {
            let product_id: Option<Uuid> = line.get("product_id");
            let product_id = match product_id {
                Some(id) => id,
                None => continue,
            };
            let qty: Decimal = line.get("qty");

            let product = tx.query_opt(
                "SELECT stock_qty FROM products WHERE product_id = $1 FOR UPDATE",
                &[&product_id],
            )?;
            let current = match product {
                Some(row) => row.get::<_, Option<Decimal>>(0).unwrap_or(Decimal::ZERO),
                None => continue,
            };
            crate::stock::set_stock(tx, product_id, current + qty)?;
        }

        tx.execute(
            "DELETE FROM work_order_products WHERE work_order_id = $1",
            &[&work_order_id],
        )?;
        tx.execute(
            "DELETE FROM work_order_services WHERE work_order_id = $1",
            &[&work_order_id],
        )?;
        tx.execute(
            "DELETE FROM work_orders WHERE work_order_id = $1",
            &[&work_order_id],
        )?;
        Ok(())
    })
}

/// Fetch a single work order
pub fn get_work_order(db: &ClientExecutor, work_order_id: Uuid) -> Result<WorkOrder, WorkshopError> {
    fetch_work_order(db, work_order_id)
}

/// Staff listing with optional filters, newest first
pub fn list_work_orders(
    db: &ClientExecutor,
    filter: &WorkOrderFilter,
) -> Result<Vec<WorkOrder>, WorkshopError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<&dyn ToSql> = Vec::new();

    if let Some(appointment_id) = &filter.appointment_id {
        params.push(appointment_id);
        conditions.push(format!("appointment_id = ${}", params.len()));
    }
    if let Some(customer_id) = &filter.customer_id {
        params.push(customer_id);
        conditions.push(format!("customer_id = ${}", params.len()));
    }
    let status_norm = filter.status.as_ref().map(|s| s.trim().to_lowercase());
    if let Some(status) = &status_norm {
        params.push(status);
        conditions.push(format!("lower(status) = ${}", params.len()));
    }

    let mut sql = format!("SELECT {} FROM work_orders", WorkOrder::COLUMNS);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC");

    let rows = db.query_all(&sql, &params)?;
    Ok(rows.iter().map(WorkOrder::from_row).collect())
}

/// Work orders belonging to one customer, newest first
pub fn list_customer_work_orders(
    db: &ClientExecutor,
    customer_id: Uuid,
) -> Result<Vec<WorkOrder>, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM work_orders WHERE customer_id = $1 ORDER BY created_at DESC",
        WorkOrder::COLUMNS
    );
    let rows = db.query_all(&sql, &[&customer_id])?;
    Ok(rows.iter().map(WorkOrder::from_row).collect())
}

/// Fetch one of the customer's own work orders. An order belonging to
/// someone else is indistinguishable from a missing one.
pub fn get_customer_work_order(
    db: &ClientExecutor,
    customer_id: Uuid,
    work_order_id: Uuid,
) -> Result<WorkOrder, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM work_orders WHERE work_order_id = $1 AND customer_id = $2",
        WorkOrder::COLUMNS
    );
    match db.query_opt(&sql, &[&work_order_id, &customer_id])? {
        Some(row) => Ok(WorkOrder::from_row(&row)),
        None => Err(WorkshopError::NotFound("work order does not exist".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::from_value;
    use serde_json::json;

    #[test]
    fn test_new_work_order_defaults() {
        let input: NewWorkOrder = from_value(json!({
            "customer_id": "7b6e2a52-36c3-44a8-9f25-5bd1a9e2d111",
            "vehicle_id": "b7f7a6f7-1111-4222-8333-9bbadf00d000"
        }))
        .unwrap();
        assert_eq!(input.status, "open");
        assert_eq!(input.authorization_status, "pending");
        assert!(input.appointment_id.is_none());
    }

    #[test]
    fn test_new_work_order_requires_customer_and_vehicle() {
        let err = from_value::<NewWorkOrder>(json!({
            "vehicle_id": "b7f7a6f7-1111-4222-8333-9bbadf00d000"
        }))
        .unwrap_err();
        assert!(matches!(err, WorkshopError::InvalidArgument(_)));
    }

    #[test]
    fn test_patch_rejects_fields_outside_allow_list() {
        let err = from_value::<WorkOrderPatch>(json!({"customer_id": "abc"})).unwrap_err();
        assert!(matches!(err, WorkshopError::Forbidden(_)));

        let err = from_value::<WorkOrderPatch>(json!({"opened_at": null})).unwrap_err();
        assert!(matches!(err, WorkshopError::Forbidden(_)));
    }

    #[test]
    fn test_patch_distinguishes_null_from_missing() {
        let p: WorkOrderPatch = from_value(json!({"diagnosis": null})).unwrap();
        assert_eq!(p.diagnosis, Some(None));
        assert!(p.notes.is_none());

        let p: WorkOrderPatch = from_value(json!({"diagnosis": "worn brake pads"})).unwrap();
        assert_eq!(p.diagnosis, Some(Some("worn brake pads".to_string())));
    }

    #[test]
    fn test_empty_patch_detection() {
        assert!(WorkOrderPatch::default().is_empty());
        let p: WorkOrderPatch = from_value(json!({})).unwrap();
        assert!(p.is_empty());
        let p: WorkOrderPatch = from_value(json!({"status": "completed"})).unwrap();
        assert!(!p.is_empty());
    }

    #[test]
    fn test_update_sql_includes_only_patched_fields() {
        let patch = WorkOrderPatch {
            status: Some(" completed ".to_string()),
            closed_at: Some(None),
            ..Default::default()
        };
        let sql = work_order_update_sql(Uuid::nil(), &patch);
        assert!(sql.contains("\"status\" = 'completed'"));
        assert!(sql.contains("\"closed_at\" = NULL"));
        assert!(sql.contains("now()"));
        assert!(!sql.contains("\"diagnosis\""));
        assert!(!sql.contains("\"estimated_total\""));
    }
}
