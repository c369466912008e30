//! Work order guard.
//!
//! The single precondition gating every line-item mutation: a cancelled work
//! order is append-frozen. The check must run inside the same transaction as
//! the mutation (and the product lock), otherwise a concurrent cancellation
//! could race a concurrent stock decrement.

use crate::entities::WorkOrderStatus;
use crate::error::WorkshopError;
use crate::executor::Executor;
use uuid::Uuid;

/// Fail with `InvalidState` if the work order is cancelled, `NotFound` if it
/// does not exist.
///
/// Note the order itself stays partial-field-editable by staff after
/// cancellation; only its line items are frozen.
pub fn assert_mutable(executor: &impl Executor, work_order_id: Uuid) -> Result<(), WorkshopError> {
    let row = executor.query_opt(
        "SELECT status FROM work_orders WHERE work_order_id = $1",
        &[&work_order_id],
    )?;
    let status: Option<String> = match row {
        Some(row) => row.get(0),
        None => return Err(WorkshopError::NotFound("work order does not exist".to_string())),
    };

    if WorkOrderStatus::parse(status.as_deref().unwrap_or("")).is_cancelled() {
        return Err(WorkshopError::InvalidState(
            "a cancelled work order cannot be modified".to_string(),
        ));
    }
    Ok(())
}
