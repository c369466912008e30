//! Transaction support.
//!
//! All multi-step mutations in the core (line-item operations, work-order
//! deletion, appointment booking) execute inside one [`Transaction`] per
//! call, so a failed validation rolls back every prior write and the
//! `FOR UPDATE` row locks taken along the way are held to the end.

use crate::error::WorkshopError;
use crate::executor::Executor;
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read committed (default)
    ReadCommitted,
    /// Repeatable read
    RepeatableRead,
    /// Serializable
    Serializable,
}

impl IsolationLevel {
    fn to_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A database transaction
///
/// Row locks acquired with `SELECT ... FOR UPDATE` inside the transaction are
/// held until [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback). Dropping a `Transaction` without
/// either leaves the rollback to the server when the connection resets, so
/// callers should always finish explicitly.
pub struct Transaction {
    client: Client,
    closed: bool,
}

impl Transaction {
    /// Start a transaction with the default isolation level (`ReadCommitted`)
    pub(crate) fn new(client: Client) -> Result<Self, WorkshopError> {
        Self::new_with_isolation(client, IsolationLevel::ReadCommitted)
    }

    /// Start a transaction with a specific isolation level
    pub(crate) fn new_with_isolation(
        client: Client,
        isolation_level: IsolationLevel,
    ) -> Result<Self, WorkshopError> {
        #[cfg(feature = "tracing")]
        let _span = crate::trace::begin_transaction_span().entered();

        client.execute("BEGIN", &[])?;

        if isolation_level != IsolationLevel::ReadCommitted {
            let isolation_sql = format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                isolation_level.to_sql()
            );
            client.execute(isolation_sql.as_str(), &[])?;
        }

        Ok(Self {
            client,
            closed: false,
        })
    }

    /// Commit the transaction
    pub fn commit(mut self) -> Result<(), WorkshopError> {
        if self.closed {
            return Err(WorkshopError::Database(
                "transaction already closed".to_string(),
            ));
        }

        #[cfg(feature = "tracing")]
        let _span = crate::trace::commit_transaction_span().entered();

        self.client.execute("COMMIT", &[])?;
        self.closed = true;
        Ok(())
    }

    /// Roll back the transaction, discarding all changes made within it
    pub fn rollback(mut self) -> Result<(), WorkshopError> {
        if self.closed {
            return Err(WorkshopError::Database(
                "transaction already closed".to_string(),
            ));
        }

        #[cfg(feature = "tracing")]
        let _span = crate::trace::rollback_transaction_span().entered();

        self.client.execute("ROLLBACK", &[])?;
        self.closed = true;
        Ok(())
    }

    /// Check if the transaction has been committed or rolled back
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn assert_open(&self) -> Result<(), WorkshopError> {
        if self.closed {
            Err(WorkshopError::Database("transaction is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Executor for Transaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, WorkshopError> {
        self.assert_open()?;

        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client.execute(query, params).map_err(WorkshopError::from)
    }

    fn query_one(&self, query: &str, params: &[&dyn ToSql]) -> Result<Row, WorkshopError> {
        self.assert_open()?;

        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client.query_one(query, params).map_err(WorkshopError::from)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, WorkshopError> {
        self.assert_open()?;

        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client.query(query, params).map_err(WorkshopError::from)
    }

    fn batch_execute(&self, query: &str) -> Result<(), WorkshopError> {
        self.assert_open()?;

        #[cfg(feature = "tracing")]
        let _span = crate::trace::query_span(query).entered();

        self.client.batch_execute(query).map_err(WorkshopError::from)
    }
}

/// Run `body` inside a single transaction on `db`, committing on success and
/// rolling back on any error. A rollback failure is logged and the original
/// error is returned.
pub fn with_transaction<T>(
    db: &crate::executor::ClientExecutor,
    body: impl FnOnce(&Transaction) -> Result<T, WorkshopError>,
) -> Result<T, WorkshopError> {
    let tx = db.begin()?;
    match body(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = tx.rollback() {
                log::warn!("rollback failed after {err}: {rb}");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_to_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.to_sql(), "REPEATABLE READ");
        assert_eq!(IsolationLevel::Serializable.to_sql(), "SERIALIZABLE");
    }

    #[test]
    fn test_isolation_level_equality() {
        assert_eq!(IsolationLevel::ReadCommitted, IsolationLevel::ReadCommitted);
        assert_ne!(IsolationLevel::ReadCommitted, IsolationLevel::Serializable);
    }
}
