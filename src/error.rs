//! Error taxonomy for the workshop core.
//!
//! Every fallible core operation returns [`WorkshopError`]. The variants map
//! onto stable HTTP statuses via [`WorkshopError::http_status`] so the
//! surrounding web layer never has to inspect messages.

use may_postgres::Error as PostgresError;
use std::fmt;

/// Error type for all workshop core operations
#[derive(Debug)]
pub enum WorkshopError {
    /// Malformed or out-of-range input (non-numeric quantity, negative price, ...)
    InvalidArgument(String),
    /// Referenced product/order/appointment/slot does not exist
    NotFound(String),
    /// Mutation attempted against a cancelled work order
    InvalidState(String),
    /// Insufficient stock, exhausted slot capacity, duplicate unique value
    Conflict(String),
    /// Field outside the operation's allow-list, or resource not owned by the caller
    Forbidden(String),
    /// Underlying database failure (constraint violation, lock timeout, I/O)
    Database(String),
}

impl WorkshopError {
    /// HTTP status code this error kind maps to
    ///
    /// `InvalidState` is part of the 409 family: a cancelled work order is a
    /// conflict with current state, not a validation problem.
    pub fn http_status(&self) -> u16 {
        match self {
            WorkshopError::InvalidArgument(_) => 400,
            WorkshopError::Forbidden(_) => 403,
            WorkshopError::NotFound(_) => 404,
            WorkshopError::InvalidState(_) | WorkshopError::Conflict(_) => 409,
            WorkshopError::Database(_) => 500,
        }
    }

    /// Message safe to surface to API callers
    ///
    /// Database errors carry driver detail (SQL state, table names) that must
    /// not leak; everything else is already written for end users.
    pub fn public_message(&self) -> &str {
        match self {
            WorkshopError::InvalidArgument(m)
            | WorkshopError::NotFound(m)
            | WorkshopError::InvalidState(m)
            | WorkshopError::Conflict(m)
            | WorkshopError::Forbidden(m) => m,
            WorkshopError::Database(_) => "internal database error",
        }
    }
}

impl fmt::Display for WorkshopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkshopError::InvalidArgument(m) => write!(f, "Invalid argument: {m}"),
            WorkshopError::NotFound(m) => write!(f, "Not found: {m}"),
            WorkshopError::InvalidState(m) => write!(f, "Invalid state: {m}"),
            WorkshopError::Conflict(m) => write!(f, "Conflict: {m}"),
            WorkshopError::Forbidden(m) => write!(f, "Forbidden: {m}"),
            WorkshopError::Database(m) => write!(f, "Database error: {m}"),
        }
    }
}

impl std::error::Error for WorkshopError {}

impl From<PostgresError> for WorkshopError {
    fn from(err: PostgresError) -> Self {
        log::error!("postgres error: {err}");
        WorkshopError::Database(err.to_string())
    }
}
