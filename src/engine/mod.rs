mod like;
mod memory;
mod resolver;
mod table;

pub use memory::MemoryEngine;
pub use resolver::{register_engine, resolve, EngineFactory};
pub use table::{FkSpec, SpecColumn, TableSpec};

use crate::core::{Result, Row, Value};
use crate::sql::Statement;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter.
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an engine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocate a new unique transaction ID.
    pub fn next() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// What an executed write statement reported back.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOutcome {
    pub rows_affected: u64,
    /// Key generated for an INSERT that requested one.
    pub generated_key: Option<Value>,
}

/// The capability set the core requires from a SQL engine.
///
/// Statements arrive in structured form; `Statement::to_sql()` provides the
/// equivalent parameterized text for engines that consume SQL directly.
/// Schema management (CREATE/DROP/migrations) is deliberately absent: that
/// belongs to an external schema-management collaborator.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Execute an INSERT/UPDATE/DELETE, reporting the affected-row count
    /// and any generated key. `txn` of `None` means autocommit.
    async fn execute(
        &self,
        statement: &Statement,
        txn: Option<TransactionId>,
    ) -> Result<ExecuteOutcome>;

    /// Execute a SELECT and return the projected rows.
    async fn query(&self, statement: &Statement, txn: Option<TransactionId>) -> Result<Vec<Row>>;

    async fn begin(&self) -> Result<TransactionId>;

    async fn commit(&self, txn: TransactionId) -> Result<()>;

    async fn rollback(&self, txn: TransactionId) -> Result<()>;

    /// Release the underlying connection. Only the party that opened the
    /// connection may call this; sessions never close caller-owned handles.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique_and_increasing() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert!(b.as_u64() > a.as_u64());
        assert_eq!(format!("{}", a), format!("txn_{}", a.as_u64()));
    }
}
