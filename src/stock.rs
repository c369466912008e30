//! Stock ledger primitive.
//!
//! A product's `stock_qty` is the single contended shared resource in the
//! core. It is only ever read with a `FOR UPDATE` row lock inside an active
//! transaction, and only ever written through [`set_stock`], so concurrent
//! line-item operations against the same product serialize at the lock while
//! operations on disjoint products proceed independently.

use crate::error::WorkshopError;
use crate::executor::Executor;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Lock the product row exclusively and return its current stock.
///
/// The lock is held for the remainder of the enclosing transaction. Must not
/// be called on an auto-commit executor; callers always go through
/// [`crate::transaction::Transaction`].
pub fn lock_and_get_stock(
    executor: &impl Executor,
    product_id: Uuid,
) -> Result<Decimal, WorkshopError> {
    let row = executor.query_opt(
        "SELECT stock_qty FROM products WHERE product_id = $1 FOR UPDATE",
        &[&product_id],
    )?;
    match row {
        Some(row) => Ok(row.get::<_, Option<Decimal>>(0).unwrap_or(Decimal::ZERO)),
        None => Err(WorkshopError::NotFound("product does not exist".to_string())),
    }
}

/// Write the new quantity and bump the product's modification timestamp.
pub fn set_stock(
    executor: &impl Executor,
    product_id: Uuid,
    new_stock: Decimal,
) -> Result<(), WorkshopError> {
    executor.execute(
        "UPDATE products SET stock_qty = $1, updated_at = now() WHERE product_id = $2",
        &[&new_stock, &product_id],
    )?;
    Ok(())
}

/// Decide the stock level after consuming `qty` for a new product line.
///
/// Fails with `Conflict` when the product cannot cover the requested
/// quantity; on success the returned value is what [`set_stock`] must write.
pub fn stock_after_consume(stock: Decimal, qty: Decimal) -> Result<Decimal, WorkshopError> {
    if stock < qty {
        return Err(WorkshopError::Conflict(
            "insufficient stock for this product".to_string(),
        ));
    }
    Ok(stock - qty)
}

/// Decide the stock level after a quantity edit on an existing line.
///
/// The symmetric delta rule: a growing line must be covered by current stock,
/// a shrinking line credits the difference back, an unchanged quantity leaves
/// stock alone. This keeps stock consistent across arbitrary edits without
/// consulting the line's history.
pub fn stock_after_delta(stock: Decimal, delta: Decimal) -> Result<Decimal, WorkshopError> {
    if delta > Decimal::ZERO && stock < delta {
        return Err(WorkshopError::Conflict(
            "insufficient stock to increase the quantity".to_string(),
        ));
    }
    Ok(stock - delta)
}
