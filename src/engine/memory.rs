// ============================================================================
// Bundled in-memory SQL engine
// ============================================================================

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lazy_static::lazy_static;
use tokio::sync::RwLock;
use tracing::debug;

use super::like::like_match;
use super::table::{EngineTable, TableSpec};
use super::{ExecuteOutcome, SqlEngine, TransactionId};
use crate::core::{OrmError, Result, Row, Value};
use crate::model::Model;
use crate::sql::{Predicate, Statement};

lazy_static! {
    /// Named shared databases. Two engines connected to the same name see
    /// the same tables, which is what lets separate sessions race each
    /// other over one store.
    static ref SHARED_DBS: Mutex<HashMap<String, Arc<RwLock<MemoryDb>>>> =
        Mutex::new(HashMap::new());
}

/// One inverse step recorded while a transaction is open. Rolling back
/// replays the log in reverse.
#[derive(Debug)]
enum UndoChange {
    RemoveRow { table: String, row_id: u64 },
    RestoreRow { table: String, row_id: u64, row: Row },
}

/// Table store plus open-transaction bookkeeping.
#[derive(Default)]
pub(crate) struct MemoryDb {
    tables: HashMap<String, EngineTable>,
    transactions: HashMap<TransactionId, Vec<UndoChange>>,
}

impl MemoryDb {
    fn table(&self, name: &str) -> Result<&EngineTable> {
        self.tables
            .get(name)
            .ok_or_else(|| OrmError::Execution(format!("table '{}' does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut EngineTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| OrmError::Execution(format!("table '{}' does not exist", name)))
    }

    fn record_undo(&mut self, txn: Option<TransactionId>, change: UndoChange) -> Result<()> {
        if let Some(id) = txn {
            self.transactions
                .get_mut(&id)
                .ok_or_else(|| OrmError::Execution(format!("transaction '{}' is not active", id)))?
                .push(change);
        }
        Ok(())
    }

    fn require_transaction(&self, txn: Option<TransactionId>) -> Result<()> {
        if let Some(id) = txn {
            if !self.transactions.contains_key(&id) {
                return Err(OrmError::Execution(format!(
                    "transaction '{}' is not active",
                    id
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn execute(&mut self, statement: &Statement, txn: Option<TransactionId>) -> Result<ExecuteOutcome> {
        self.require_transaction(txn)?;
        match statement {
            Statement::Insert {
                table,
                columns,
                values,
                returning_key,
            } => self.insert(table, columns, values, returning_key.as_deref(), txn),
            Statement::Update {
                table,
                assignments,
                predicate,
            } => self.update(table, assignments, predicate, txn),
            Statement::Delete { table, predicate } => self.delete(table, predicate, txn),
            Statement::Select { .. } => Err(OrmError::Execution(
                "SELECT must go through query, not execute".to_string(),
            )),
        }
    }

    fn insert(
        &mut self,
        table_name: &str,
        columns: &[String],
        values: &[Value],
        returning_key: Option<&str>,
        txn: Option<TransactionId>,
    ) -> Result<ExecuteOutcome> {
        let table = self.table_mut(table_name)?;
        let mut row: Row = vec![Value::Null; table.spec.columns.len()];
        for (column, value) in columns.iter().zip(values) {
            let index = table.spec.column_index(column).ok_or_else(|| {
                OrmError::Execution(format!(
                    "table '{}' has no column '{}'",
                    table_name, column
                ))
            })?;
            row[index] = value.clone();
        }

        let key_index = table.spec.key_index();
        let mut generated = None;
        if row[key_index] == Value::Null && table.spec.key_generated {
            let key = table.generate_key();
            row[key_index] = key.clone();
            generated = Some(key);
        }

        let table = self.table(table_name)?;
        table.validate_row(&row)?;
        table.check_unique(&row, None)?;
        self.check_references(table_name, &row)?;

        let row_id = self.table_mut(table_name)?.insert_row(row);
        self.record_undo(
            txn,
            UndoChange::RemoveRow {
                table: table_name.to_string(),
                row_id,
            },
        )?;

        let key = if returning_key.is_some() {
            generated.or_else(|| {
                self.tables
                    .get(table_name)
                    .and_then(|t| t.rows.get(&row_id).map(|r| t.key_of(r)))
            })
        } else {
            None
        };
        Ok(ExecuteOutcome {
            rows_affected: 1,
            generated_key: key,
        })
    }

    fn update(
        &mut self,
        table_name: &str,
        assignments: &[crate::sql::Assignment],
        predicate: &Predicate,
        txn: Option<TransactionId>,
    ) -> Result<ExecuteOutcome> {
        let matches = self.matching_rows(table_name, predicate)?;
        for row_id in &matches {
            let table = self.table(table_name)?;
            let old = table.rows[row_id].clone();
            let mut updated = old.clone();
            for assignment in assignments {
                let index = table.spec.column_index(&assignment.column).ok_or_else(|| {
                    OrmError::Execution(format!(
                        "table '{}' has no column '{}'",
                        table_name, assignment.column
                    ))
                })?;
                updated[index] = assignment.value.clone();
            }
            table.validate_row(&updated)?;
            table.check_unique(&updated, Some(*row_id))?;
            self.check_references(table_name, &updated)?;

            self.table_mut(table_name)?.rows.insert(*row_id, updated);
            self.record_undo(
                txn,
                UndoChange::RestoreRow {
                    table: table_name.to_string(),
                    row_id: *row_id,
                    row: old,
                },
            )?;
        }
        Ok(ExecuteOutcome {
            rows_affected: matches.len() as u64,
            generated_key: None,
        })
    }

    fn delete(
        &mut self,
        table_name: &str,
        predicate: &Predicate,
        txn: Option<TransactionId>,
    ) -> Result<ExecuteOutcome> {
        let matches = self.matching_rows(table_name, predicate)?;
        for row_id in &matches {
            let table = self.table(table_name)?;
            let key = table.key_of(&table.rows[row_id]);
            self.check_no_dependents(table_name, &table.spec.key.clone(), &key)?;

            let removed = self
                .table_mut(table_name)?
                .rows
                .remove(row_id)
                .expect("row id came from a match over this table");
            self.record_undo(
                txn,
                UndoChange::RestoreRow {
                    table: table_name.to_string(),
                    row_id: *row_id,
                    row: removed,
                },
            )?;
        }
        Ok(ExecuteOutcome {
            rows_affected: matches.len() as u64,
            generated_key: None,
        })
    }

    /// Every non-null foreign-key value must point at an existing
    /// principal row.
    fn check_references(&self, table_name: &str, row: &Row) -> Result<()> {
        let table = self.table(table_name)?;
        for (index, column) in table.spec.columns.iter().enumerate() {
            let Some(reference) = &column.references else { continue };
            if row[index] == Value::Null {
                continue;
            }
            let principal = self.table(&reference.table)?;
            let key_index = principal.spec.column_index(&reference.column).ok_or_else(|| {
                OrmError::Execution(format!(
                    "table '{}' has no column '{}'",
                    reference.table, reference.column
                ))
            })?;
            let found = principal
                .rows
                .values()
                .any(|candidate| candidate[key_index] == row[index]);
            if !found {
                return Err(OrmError::ConstraintViolation(format!(
                    "column '{}' of table '{}' references non-existent key {} in table '{}'",
                    column.name, table_name, row[index], reference.table
                )));
            }
        }
        Ok(())
    }

    /// Deleting a principal with live dependents violates the foreign key.
    fn check_no_dependents(&self, table_name: &str, key_column: &str, key: &Value) -> Result<()> {
        for table in self.tables.values() {
            for (index, column) in table.spec.columns.iter().enumerate() {
                let Some(reference) = &column.references else { continue };
                if reference.table != table_name || reference.column != key_column {
                    continue;
                }
                if table.rows.values().any(|row| &row[index] == key) {
                    return Err(OrmError::ConstraintViolation(format!(
                        "deleting key {} from table '{}' violates foreign key constraint: \
                         referenced by column '{}' of table '{}'",
                        key, table_name, column.name, table.spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn matching_rows(&self, table_name: &str, predicate: &Predicate) -> Result<Vec<u64>> {
        let table = self.table(table_name)?;
        let mut ids = Vec::new();
        for (id, row) in &table.rows {
            if eval_predicate(table, row, predicate)? {
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    fn query(&self, statement: &Statement, txn: Option<TransactionId>) -> Result<Vec<Row>> {
        self.require_transaction(txn)?;
        let Statement::Select {
            table: table_name,
            columns,
            join,
            predicate,
            order_by,
            limit,
            count_only,
        } = statement
        else {
            return Err(OrmError::Execution(
                "query accepts only SELECT statements".to_string(),
            ));
        };

        let table = self.table(table_name)?;
        let mut selected: Vec<&Row> = Vec::new();
        for row in table.rows.values() {
            let keep = match predicate {
                Some(predicate) => eval_predicate(table, row, predicate)?,
                None => true,
            };
            if keep {
                selected.push(row);
            }
        }

        // Inner-join filtering happens before ordering and LIMIT: a NULL or
        // dangling foreign key drops the row from the result entirely.
        if let Some(join) = join {
            let fk_index = table.spec.column_index(&join.fk_column).ok_or_else(|| {
                OrmError::Execution(format!(
                    "table '{}' has no column '{}'",
                    table_name, join.fk_column
                ))
            })?;
            let principal = self.table(&join.table)?;
            let match_index =
                principal.spec.column_index(&join.principal_key).ok_or_else(|| {
                    OrmError::Execution(format!(
                        "table '{}' has no column '{}'",
                        join.table, join.principal_key
                    ))
                })?;
            selected.retain(|row| {
                row[fk_index] != Value::Null
                    && principal
                        .rows
                        .values()
                        .any(|candidate| candidate[match_index] == row[fk_index])
            });
        }

        if !order_by.is_empty() {
            let mut key_indexes = Vec::with_capacity(order_by.len());
            for key in order_by {
                let index = table.spec.column_index(&key.column).ok_or_else(|| {
                    OrmError::Execution(format!(
                        "table '{}' has no column '{}'",
                        table_name, key.column
                    ))
                })?;
                key_indexes.push((index, key.descending));
            }
            selected.sort_by(|a, b| {
                for (index, descending) in &key_indexes {
                    let ordering = a[*index]
                        .compare(&b[*index])
                        .unwrap_or(Ordering::Equal);
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if *count_only {
            return Ok(vec![vec![Value::Integer(selected.len() as i64)]]);
        }

        if let Some(limit) = limit {
            selected.truncate(*limit as usize);
        }

        let mut projection = Vec::with_capacity(columns.len());
        for column in columns {
            let index = table.spec.column_index(column).ok_or_else(|| {
                OrmError::Execution(format!(
                    "table '{}' has no column '{}'",
                    table_name, column
                ))
            })?;
            projection.push(index);
        }

        let mut results = Vec::with_capacity(selected.len());
        for row in selected {
            let mut out: Row = projection.iter().map(|i| row[*i].clone()).collect();
            if let Some(join) = join {
                let fk_index = table.spec.column_index(&join.fk_column).ok_or_else(|| {
                    OrmError::Execution(format!(
                        "table '{}' has no column '{}'",
                        table_name, join.fk_column
                    ))
                })?;
                let principal = self.table(&join.table)?;
                let match_index =
                    principal.spec.column_index(&join.principal_key).ok_or_else(|| {
                        OrmError::Execution(format!(
                            "table '{}' has no column '{}'",
                            join.table, join.principal_key
                        ))
                    })?;
                // Guaranteed by the retain pass above.
                let Some(matched) = principal
                    .rows
                    .values()
                    .find(|candidate| candidate[match_index] == row[fk_index])
                else {
                    continue;
                };
                for column in &join.columns {
                    let index = principal.spec.column_index(column).ok_or_else(|| {
                        OrmError::Execution(format!(
                            "table '{}' has no column '{}'",
                            join.table, column
                        ))
                    })?;
                    out.push(matched[index].clone());
                }
            }
            results.push(out);
        }
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    fn begin(&mut self) -> TransactionId {
        let id = TransactionId::next();
        self.transactions.insert(id, Vec::new());
        id
    }

    fn commit(&mut self, txn: TransactionId) -> Result<()> {
        self.transactions
            .remove(&txn)
            .map(|_| ())
            .ok_or_else(|| OrmError::Execution(format!("transaction '{}' is not active", txn)))
    }

    fn rollback(&mut self, txn: TransactionId) -> Result<()> {
        let log = self
            .transactions
            .remove(&txn)
            .ok_or_else(|| OrmError::Execution(format!("transaction '{}' is not active", txn)))?;
        for change in log.into_iter().rev() {
            match change {
                UndoChange::RemoveRow { table, row_id } => {
                    if let Some(table) = self.tables.get_mut(&table) {
                        table.rows.remove(&row_id);
                    }
                }
                UndoChange::RestoreRow { table, row_id, row } => {
                    if let Some(table) = self.tables.get_mut(&table) {
                        table.rows.insert(row_id, row);
                    }
                }
            }
        }
        Ok(())
    }
}

fn eval_predicate(table: &EngineTable, row: &Row, predicate: &Predicate) -> Result<bool> {
    match predicate {
        Predicate::Eq { column, value } => {
            let index = table.spec.column_index(column).ok_or_else(|| {
                OrmError::Execution(format!(
                    "table '{}' has no column '{}'",
                    table.spec.name, column
                ))
            })?;
            // SQL semantics: NULL never equals anything, including NULL.
            if row[index] == Value::Null || *value == Value::Null {
                return Ok(false);
            }
            Ok(row[index] == *value)
        }
        Predicate::Like { column, pattern } => {
            let index = table.spec.column_index(column).ok_or_else(|| {
                OrmError::Execution(format!(
                    "table '{}' has no column '{}'",
                    table.spec.name, column
                ))
            })?;
            match &row[index] {
                Value::Text(text) => like_match(text, pattern),
                Value::Null => Ok(false),
                other => Err(OrmError::TypeMismatch(format!(
                    "LIKE requires text, column '{}' holds {}",
                    column,
                    other.type_name()
                ))),
            }
        }
        Predicate::And(left, right) => {
            Ok(eval_predicate(table, row, left)? && eval_predicate(table, row, right)?)
        }
    }
}

/// In-memory engine handle. Cloning or reconnecting by name shares the
/// same underlying database.
pub struct MemoryEngine {
    db: Arc<RwLock<MemoryDb>>,
    closed: AtomicBool,
}

impl MemoryEngine {
    /// A private database nothing else can reach.
    pub fn new() -> Self {
        Self {
            db: Arc::new(RwLock::new(MemoryDb::default())),
            closed: AtomicBool::new(false),
        }
    }

    /// Connect to (creating on first use) a named shared database.
    pub fn connect(name: &str) -> Self {
        let db = {
            let mut shared = SHARED_DBS.lock().expect("shared database registry");
            Arc::clone(
                shared
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(RwLock::new(MemoryDb::default()))),
            )
        };
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    /// Drop a named shared database entirely. Existing handles keep their
    /// reference; new connections start fresh.
    pub fn forget(name: &str) {
        SHARED_DBS
            .lock()
            .expect("shared database registry")
            .remove(name);
    }

    fn guard(&self) -> Result<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(OrmError::Connection("connection is closed".to_string()));
        }
        Ok(())
    }

    pub async fn create_table(&self, spec: TableSpec) -> Result<()> {
        self.guard()?;
        let mut db = self.db.write().await;
        if db.tables.contains_key(&spec.name) {
            return Err(OrmError::Execution(format!(
                "table '{}' already exists",
                spec.name
            )));
        }
        debug!(table = %spec.name, "creating table");
        db.tables.insert(spec.name.clone(), EngineTable::new(spec));
        Ok(())
    }

    /// Create a table per mapped entity, principals first. Tables that
    /// already exist are left alone.
    pub async fn create_schema(&self, model: &Model) -> Result<()> {
        self.guard()?;
        for entity in model.insert_order() {
            let descriptor = model.descriptor(entity)?;
            let spec = TableSpec::from_descriptor(descriptor, model)?;
            let mut db = self.db.write().await;
            if !db.tables.contains_key(&spec.name) {
                db.tables.insert(spec.name.clone(), EngineTable::new(spec));
            }
        }
        Ok(())
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        self.guard()?;
        let mut db = self.db.write().await;
        db.tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OrmError::Execution(format!("table '{}' does not exist", name)))
    }

    /// Remove every table and abandon open transactions.
    pub async fn reset(&self) {
        let mut db = self.db.write().await;
        db.tables.clear();
        db.transactions.clear();
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlEngine for MemoryEngine {
    async fn execute(
        &self,
        statement: &Statement,
        txn: Option<TransactionId>,
    ) -> Result<ExecuteOutcome> {
        self.guard()?;
        let mut db = self.db.write().await;
        let outcome = db.execute(statement, txn)?;
        debug!(
            kind = %statement.kind(),
            table = statement.table(),
            rows = outcome.rows_affected,
            "executed statement"
        );
        Ok(outcome)
    }

    async fn query(&self, statement: &Statement, txn: Option<TransactionId>) -> Result<Vec<Row>> {
        self.guard()?;
        let db = self.db.read().await;
        db.query(statement, txn)
    }

    async fn begin(&self) -> Result<TransactionId> {
        self.guard()?;
        let mut db = self.db.write().await;
        let id = db.begin();
        debug!(txn = %id, "began transaction");
        Ok(id)
    }

    async fn commit(&self, txn: TransactionId) -> Result<()> {
        self.guard()?;
        let mut db = self.db.write().await;
        db.commit(txn)
    }

    async fn rollback(&self, txn: TransactionId) -> Result<()> {
        self.guard()?;
        let mut db = self.db.write().await;
        debug!(txn = %txn, "rolling back transaction");
        db.rollback(txn)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }
}
