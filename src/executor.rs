//! The [`Executor`] trait abstracts database execution over `may_postgres`.
//!
//! Core operations are written against this trait so they run identically on
//! a plain client or inside a [`crate::transaction::Transaction`]. This is
//! the unit-of-work handle the rest of the crate passes around explicitly;
//! there is no ambient global connection.

use crate::error::WorkshopError;
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};

/// Trait for executing database operations
///
/// Implemented by [`ClientExecutor`] (auto-commit) and
/// [`crate::transaction::Transaction`] (explicit commit/rollback), so the
/// same repository code runs in either context.
pub trait Executor {
    /// Execute a SQL statement and return the number of rows affected
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, WorkshopError>;

    /// Execute a query that must return exactly one row
    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, WorkshopError>;

    /// Execute a query and return all rows
    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, WorkshopError>;

    /// Execute a batch of semicolon-separated statements (simple query protocol)
    ///
    /// Used by the migration runner to apply whole SQL files.
    fn batch_execute(&self, query: &str) -> Result<(), WorkshopError>;

    /// Execute a query returning zero or one row
    fn query_opt(&self, query: &str, params: &[&dyn ToSql]) -> Result<Option<Row>, WorkshopError> {
        let rows = self.query_all(query, params)?;
        Ok(rows.into_iter().next())
    }
}

/// Primary [`Executor`] implementation over a `may_postgres::Client`
pub struct ClientExecutor {
    client: Client,
}

impl ClientExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client
    pub fn into_client(self) -> Client {
        self.client
    }

    /// Start a new transaction with the default isolation level (`ReadCommitted`)
    ///
    /// The transaction shares this executor's connection; do not issue other
    /// statements through this executor until it is committed or rolled back.
    pub fn begin(&self) -> Result<crate::transaction::Transaction, WorkshopError> {
        crate::transaction::Transaction::new(self.client.clone())
    }

    /// Start a new transaction with a specific isolation level
    pub fn begin_with_isolation(
        &self,
        isolation_level: crate::transaction::IsolationLevel,
    ) -> Result<crate::transaction::Transaction, WorkshopError> {
        crate::transaction::Transaction::new_with_isolation(self.client.clone(), isolation_level)
    }

    /// Check that the connection is alive (`SELECT 1`)
    pub fn check_health(&self) -> Result<bool, WorkshopError> {
        let row = self.query_one("SELECT 1", &[])?;
        Ok(row.get::<_, i32>(0) == 1)
    }
}

impl Executor for ClientExecutor {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, WorkshopError> {
        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client
            .execute(query, params)
            .map_err(WorkshopError::from)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, WorkshopError> {
        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client
            .query_one(query, params)
            .map_err(WorkshopError::from)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, WorkshopError> {
        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client
            .query(query, params)
            .map_err(WorkshopError::from)
    }

    fn batch_execute(&self, query: &str) -> Result<(), WorkshopError> {
        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client
            .batch_execute(query)
            .map_err(WorkshopError::from)
    }
}
