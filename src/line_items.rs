//! Line-item engine.
//!
//! Create, patch and delete the service lines and product lines of a work
//! order. Every operation runs in a single transaction that starts with the
//! cancelled-order guard; product-bearing operations additionally hold the
//! product row lock across the whole read-check-write sequence, so a line is
//! created if and only if its stock was decremented and no partial effect is
//! ever observable.

use crate::entities::{
    WorkOrderProductLine, WorkOrderProducts, WorkOrderServiceLine, WorkOrderServices,
};
use crate::error::WorkshopError;
use crate::executor::{ClientExecutor, Executor};
use crate::guard;
use crate::patch::{clean_text, double_option};
use crate::stock;
use crate::transaction::with_transaction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_query::{Expr, ExprTrait, PostgresQueryBuilder, Query};
use serde::Deserialize;
use uuid::Uuid;

fn default_qty() -> Decimal {
    Decimal::ONE
}

/// Input for creating a product line
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewProductLine {
    pub work_order_id: Uuid,
    pub product_id: Uuid,
    #[serde(default = "default_qty")]
    pub qty: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

/// Input for creating a service line
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewServiceLine {
    pub work_order_id: Uuid,
    #[serde(default)]
    pub service_id: Option<Uuid>,
    #[serde(default = "default_qty")]
    pub qty: Decimal,
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mechanic_id: Option<Uuid>,
    #[serde(default = "default_service_status")]
    pub status: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_service_status() -> String {
    "pending".to_string()
}

/// Mutable fields of a product line; any other key is rejected wholesale
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductLinePatch {
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub qty: Option<Decimal>,
}

impl ProductLinePatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.unit_price.is_none() && self.qty.is_none()
    }
}

/// Mutable fields of a service line
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceLinePatch {
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default, deserialize_with = "double_option")]
    pub mechanic_id: Option<Option<Uuid>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub started_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl ServiceLinePatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.unit_price.is_none()
            && self.qty.is_none()
            && self.mechanic_id.is_none()
            && self.status.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
    }
}

fn validate_qty(qty: Decimal) -> Result<(), WorkshopError> {
    if qty <= Decimal::ZERO {
        return Err(WorkshopError::InvalidArgument("qty must be > 0".to_string()));
    }
    Ok(())
}

fn validate_unit_price(unit_price: Decimal) -> Result<(), WorkshopError> {
    if unit_price < Decimal::ZERO {
        return Err(WorkshopError::InvalidArgument(
            "unit_price must not be negative".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Product lines
// ---------------------------------------------------------------------------

/// Create a product line, decrementing the product's stock by the line's
/// quantity in the same transaction.
pub fn create_product_line(
    db: &ClientExecutor,
    input: NewProductLine,
) -> Result<WorkOrderProductLine, WorkshopError> {
    validate_qty(input.qty)?;
    validate_unit_price(input.unit_price)?;
    let description = clean_text(input.description);

    with_transaction(db, |tx| {
        guard::assert_mutable(tx, input.work_order_id)?;

        let current = stock::lock_and_get_stock(tx, input.product_id)?;
        let remaining = stock::stock_after_consume(current, input.qty)?;
        stock::set_stock(tx, input.product_id, remaining)?;

        let sql = format!(
            "INSERT INTO work_order_products \
               (work_order_id, product_id, description, qty, unit_price, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now(), now()) \
             RETURNING {}",
            WorkOrderProductLine::COLUMNS
        );
        let row = tx.query_one(
            &sql,
            &[
                &input.work_order_id,
                &input.product_id,
                &description,
                &input.qty,
                &input.unit_price,
            ],
        )?;
        Ok(WorkOrderProductLine::from_row(&row))
    })
}

fn fetch_product_line_for_update(
    tx: &impl Executor,
    line_id: Uuid,
) -> Result<WorkOrderProductLine, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM work_order_products WHERE work_order_product_id = $1 FOR UPDATE",
        WorkOrderProductLine::COLUMNS
    );
    match tx.query_opt(&sql, &[&line_id])? {
        Some(row) => Ok(WorkOrderProductLine::from_row(&row)),
        None => Err(WorkshopError::NotFound("product line does not exist".to_string())),
    }
}

fn product_line_update_sql(line_id: Uuid, patch: &ProductLinePatch) -> String {
    let mut update = Query::update();
    update.table(WorkOrderProducts::Table);
    if let Some(description) = &patch.description {
        update.value(WorkOrderProducts::Description, description.clone());
    }
    if let Some(unit_price) = patch.unit_price {
        update.value(WorkOrderProducts::UnitPrice, unit_price);
    }
    if let Some(qty) = patch.qty {
        update.value(WorkOrderProducts::Qty, qty);
    }
    update.value(WorkOrderProducts::UpdatedAt, Expr::cust("now()"));
    update.and_where(Expr::col(WorkOrderProducts::WorkOrderProductId).eq(line_id));
    update.to_string(PostgresQueryBuilder)
}

/// Patch a product line.
///
/// A quantity change applies the symmetric delta rule against the product's
/// stock under the product row lock; description/price changes have no stock
/// effect. Lines whose product reference was nulled only change the stored
/// quantity.
pub fn update_product_line(
    db: &ClientExecutor,
    line_id: Uuid,
    patch: ProductLinePatch,
) -> Result<WorkOrderProductLine, WorkshopError> {
    if let Some(qty) = patch.qty {
        validate_qty(qty)?;
    }
    if let Some(unit_price) = patch.unit_price {
        validate_unit_price(unit_price)?;
    }
    let patch = ProductLinePatch {
        description: patch.description.map(clean_text),
        ..patch
    };

    with_transaction(db, |tx| {
        let line = fetch_product_line_for_update(tx, line_id)?;
        guard::assert_mutable(tx, line.work_order_id)?;

        if patch.is_empty() {
            return Ok(line);
        }

        if let Some(new_qty) = patch.qty {
            let delta = new_qty - line.qty;
            if let Some(product_id) = line.product_id {
                if delta != Decimal::ZERO {
                    let current = stock::lock_and_get_stock(tx, product_id)?;
                    let remaining = stock::stock_after_delta(current, delta)?;
                    stock::set_stock(tx, product_id, remaining)?;
                }
            }
        }

        tx.execute(&product_line_update_sql(line_id, &patch), &[])?;

        let sql = format!(
            "SELECT {} FROM work_order_products WHERE work_order_product_id = $1",
            WorkOrderProductLine::COLUMNS
        );
        let row = tx.query_one(&sql, &[&line_id])?;
        Ok(WorkOrderProductLine::from_row(&row))
    })
}

/// Delete a product line, crediting its full quantity back to the product.
pub fn delete_product_line(db: &ClientExecutor, line_id: Uuid) -> Result<(), WorkshopError> {
    with_transaction(db, |tx| {
        let line = fetch_product_line_for_update(tx, line_id)?;
        guard::assert_mutable(tx, line.work_order_id)?;

        if let Some(product_id) = line.product_id {
            let current = stock::lock_and_get_stock(tx, product_id)?;
            stock::set_stock(tx, product_id, current + line.qty)?;
        }

        tx.execute(
            "DELETE FROM work_order_products WHERE work_order_product_id = $1",
            &[&line_id],
        )?;
        Ok(())
    })
}

/// List product lines, optionally filtered by work order, newest first
pub fn list_product_lines(
    db: &ClientExecutor,
    work_order_id: Option<Uuid>,
) -> Result<Vec<WorkOrderProductLine>, WorkshopError> {
    let rows = match work_order_id {
        Some(wo) => db.query_all(
            &format!(
                "SELECT {} FROM work_order_products WHERE work_order_id = $1 ORDER BY created_at DESC",
                WorkOrderProductLine::COLUMNS
            ),
            &[&wo],
        )?,
        None => db.query_all(
            &format!(
                "SELECT {} FROM work_order_products ORDER BY created_at DESC",
                WorkOrderProductLine::COLUMNS
            ),
            &[],
        )?,
    };
    Ok(rows.iter().map(WorkOrderProductLine::from_row).collect())
}

// ---------------------------------------------------------------------------
// Service lines
// ---------------------------------------------------------------------------

/// Create a service line. No stock interaction; the guard still applies.
pub fn create_service_line(
    db: &ClientExecutor,
    input: NewServiceLine,
) -> Result<WorkOrderServiceLine, WorkshopError> {
    validate_qty(input.qty)?;
    validate_unit_price(input.unit_price)?;
    let description = clean_text(input.description);
    let status = input.status.trim().to_string();

    with_transaction(db, |tx| {
        guard::assert_mutable(tx, input.work_order_id)?;

        let sql = format!(
            "INSERT INTO work_order_services \
               (work_order_id, service_id, description, qty, unit_price, mechanic_id, status, \
                started_at, completed_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now()) \
             RETURNING {}",
            WorkOrderServiceLine::COLUMNS
        );
        let row = tx.query_one(
            &sql,
            &[
                &input.work_order_id,
                &input.service_id,
                &description,
                &input.qty,
                &input.unit_price,
                &input.mechanic_id,
                &status,
                &input.started_at,
                &input.completed_at,
            ],
        )?;
        Ok(WorkOrderServiceLine::from_row(&row))
    })
}

fn fetch_service_line_for_update(
    tx: &impl Executor,
    line_id: Uuid,
) -> Result<WorkOrderServiceLine, WorkshopError> {
    let sql = format!(
        "SELECT {} FROM work_order_services WHERE work_order_service_id = $1 FOR UPDATE",
        WorkOrderServiceLine::COLUMNS
    );
    match tx.query_opt(&sql, &[&line_id])? {
        Some(row) => Ok(WorkOrderServiceLine::from_row(&row)),
        None => Err(WorkshopError::NotFound("service line does not exist".to_string())),
    }
}

fn service_line_update_sql(line_id: Uuid, patch: &ServiceLinePatch) -> String {
    let mut update = Query::update();
    update.table(WorkOrderServices::Table);
    if let Some(description) = &patch.description {
        update.value(WorkOrderServices::Description, description.clone());
    }
    if let Some(unit_price) = patch.unit_price {
        update.value(WorkOrderServices::UnitPrice, unit_price);
    }
    if let Some(qty) = patch.qty {
        update.value(WorkOrderServices::Qty, qty);
    }
    if let Some(mechanic_id) = &patch.mechanic_id {
        update.value(WorkOrderServices::MechanicId, *mechanic_id);
    }
    if let Some(status) = &patch.status {
        update.value(WorkOrderServices::Status, status.trim());
    }
    if let Some(started_at) = &patch.started_at {
        update.value(WorkOrderServices::StartedAt, *started_at);
    }
    if let Some(completed_at) = &patch.completed_at {
        update.value(WorkOrderServices::CompletedAt, *completed_at);
    }
    update.value(WorkOrderServices::UpdatedAt, Expr::cust("now()"));
    update.and_where(Expr::col(WorkOrderServices::WorkOrderServiceId).eq(line_id));
    update.to_string(PostgresQueryBuilder)
}

/// Patch a service line
pub fn update_service_line(
    db: &ClientExecutor,
    line_id: Uuid,
    patch: ServiceLinePatch,
) -> Result<WorkOrderServiceLine, WorkshopError> {
    if let Some(qty) = patch.qty {
        validate_qty(qty)?;
    }
    if let Some(unit_price) = patch.unit_price {
        validate_unit_price(unit_price)?;
    }
    let patch = ServiceLinePatch {
        description: patch.description.map(clean_text),
        ..patch
    };

    with_transaction(db, |tx| {
        let line = fetch_service_line_for_update(tx, line_id)?;
        guard::assert_mutable(tx, line.work_order_id)?;

        if patch.is_empty() {
            return Ok(line);
        }

        tx.execute(&service_line_update_sql(line_id, &patch), &[])?;

        let sql = format!(
            "SELECT {} FROM work_order_services WHERE work_order_service_id = $1",
            WorkOrderServiceLine::COLUMNS
        );
        let row = tx.query_one(&sql, &[&line_id])?;
        Ok(WorkOrderServiceLine::from_row(&row))
    })
}

/// Delete a service line
pub fn delete_service_line(db: &ClientExecutor, line_id: Uuid) -> Result<(), WorkshopError> {
    with_transaction(db, |tx| {
        let line = fetch_service_line_for_update(tx, line_id)?;
        guard::assert_mutable(tx, line.work_order_id)?;

        tx.execute(
            "DELETE FROM work_order_services WHERE work_order_service_id = $1",
            &[&line_id],
        )?;
        Ok(())
    })
}

/// List service lines, optionally filtered by work order, newest first
pub fn list_service_lines(
    db: &ClientExecutor,
    work_order_id: Option<Uuid>,
) -> Result<Vec<WorkOrderServiceLine>, WorkshopError> {
    let rows = match work_order_id {
        Some(wo) => db.query_all(
            &format!(
                "SELECT {} FROM work_order_services WHERE work_order_id = $1 ORDER BY created_at DESC",
                WorkOrderServiceLine::COLUMNS
            ),
            &[&wo],
        )?,
        None => db.query_all(
            &format!(
                "SELECT {} FROM work_order_services ORDER BY created_at DESC",
                WorkOrderServiceLine::COLUMNS
            ),
            &[],
        )?,
    };
    Ok(rows.iter().map(WorkOrderServiceLine::from_row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::from_value;
    use serde_json::json;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_qty_validation() {
        assert!(validate_qty(d("1")).is_ok());
        assert!(matches!(validate_qty(d("0")), Err(WorkshopError::InvalidArgument(_))));
        assert!(matches!(validate_qty(d("-3")), Err(WorkshopError::InvalidArgument(_))));
    }

    #[test]
    fn test_unit_price_validation() {
        assert!(validate_unit_price(d("0")).is_ok());
        assert!(matches!(
            validate_unit_price(d("-0.01")),
            Err(WorkshopError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_new_product_line_defaults() {
        let input: NewProductLine = from_value(json!({
            "work_order_id": "7b6e2a52-36c3-44a8-9f25-5bd1a9e2d111",
            "product_id": "b7f7a6f7-1111-4222-8333-9bbadf00d000"
        }))
        .unwrap();
        assert_eq!(input.qty, Decimal::ONE);
        assert_eq!(input.unit_price, Decimal::ZERO);
        assert!(input.description.is_none());
    }

    #[test]
    fn test_new_product_line_rejects_unknown_field() {
        let err = from_value::<NewProductLine>(json!({
            "work_order_id": "7b6e2a52-36c3-44a8-9f25-5bd1a9e2d111",
            "product_id": "b7f7a6f7-1111-4222-8333-9bbadf00d000",
            "created_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap_err();
        assert!(matches!(err, WorkshopError::Forbidden(_)));
    }

    #[test]
    fn test_product_line_qty_accepts_string_or_number() {
        let p: ProductLinePatch = from_value(json!({"qty": "2.5"})).unwrap();
        assert_eq!(p.qty, Some(d("2.5")));
        let p: ProductLinePatch = from_value(json!({"qty": 4})).unwrap();
        assert_eq!(p.qty, Some(d("4")));
    }

    #[test]
    fn test_product_line_patch_unparsable_qty() {
        let err = from_value::<ProductLinePatch>(json!({"qty": "abc"})).unwrap_err();
        assert!(matches!(err, WorkshopError::InvalidArgument(_)));
    }

    #[test]
    fn test_product_line_update_sql_includes_only_patched_fields() {
        let line_id = Uuid::nil();
        let patch = ProductLinePatch {
            qty: Some(d("3")),
            ..Default::default()
        };
        let sql = product_line_update_sql(line_id, &patch);
        assert!(sql.contains("\"qty\""));
        assert!(sql.contains("now()"));
        assert!(!sql.contains("\"description\""));
        assert!(!sql.contains("\"unit_price\""));
    }

    #[test]
    fn test_service_line_update_sql_sets_null() {
        let patch = ServiceLinePatch {
            started_at: Some(None),
            ..Default::default()
        };
        let sql = service_line_update_sql(Uuid::nil(), &patch);
        assert!(sql.contains("\"started_at\" = NULL"));
    }

    #[test]
    fn test_empty_patches() {
        assert!(ProductLinePatch::default().is_empty());
        assert!(ServiceLinePatch::default().is_empty());
        let p = ProductLinePatch {
            unit_price: Some(d("1")),
            ..Default::default()
        };
        assert!(!p.is_empty());
    }
}
