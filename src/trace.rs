//! Span helpers used when the `tracing` feature is enabled.

use tracing::{span, Level, Span};

pub fn connect_span() -> Span {
    span!(Level::DEBUG, "db.connect")
}

pub fn begin_transaction_span() -> Span {
    span!(Level::DEBUG, "db.transaction.begin")
}

pub fn commit_transaction_span() -> Span {
    span!(Level::DEBUG, "db.transaction.commit")
}

pub fn rollback_transaction_span() -> Span {
    span!(Level::DEBUG, "db.transaction.rollback")
}

pub fn query_span(query: &str) -> Span {
    // Keep the statement verb only; full SQL would bloat span metadata
    let verb = query.split_whitespace().next().unwrap_or("");
    span!(Level::TRACE, "db.query", verb = %verb)
}

/// Install a minimal subscriber for local development
pub fn init_subscriber() {
    use tracing_subscriber::prelude::*;
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_span_uses_verb() {
        let _s = query_span("SELECT stock_qty FROM products WHERE product_id = $1 FOR UPDATE");
    }
}
