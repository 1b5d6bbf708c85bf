// ============================================================================
// Session facade
// ============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use super::QueryBuilder;
use crate::core::{OrmError, Result, Row, Value};
use crate::engine::{resolve, ExecuteOutcome, SqlEngine, TransactionId};
use crate::model::Model;
use crate::sql::{Statement, StatementBuilder};
use crate::tracker::{ChangeSet, ChangeTracker, EntityId, EntityState};

/// What a successful save applied, by operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl SaveReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// A unit of work over one engine connection.
///
/// A session either owns its connection (opened from a connection string)
/// or borrows a caller-owned engine handle, which it will never close. All
/// reads and writes optionally run inside one externally enlisted
/// transaction; enlistment must happen before the first statement.
pub struct Session {
    model: Arc<Model>,
    engine: Arc<dyn SqlEngine>,
    tracker: ChangeTracker,
    builder: StatementBuilder,
    external_txn: Option<TransactionId>,
    statements_issued: bool,
    owns_connection: bool,
}

impl Session {
    /// Open a session over a connection resolved from `url`. The session
    /// owns the connection and releases it on [`Session::close`].
    pub fn connect(model: Arc<Model>, url: &str) -> Result<Self> {
        let engine = resolve(url)?;
        Ok(Self::build(model, engine, true))
    }

    /// Open a session over a caller-owned engine handle. The caller keeps
    /// responsibility for closing it; [`Session::close`] leaves it open.
    pub fn with_engine(model: Arc<Model>, engine: Arc<dyn SqlEngine>) -> Self {
        Self::build(model, engine, false)
    }

    fn build(model: Arc<Model>, engine: Arc<dyn SqlEngine>, owns_connection: bool) -> Self {
        Self {
            tracker: ChangeTracker::new(Arc::clone(&model)),
            model,
            engine,
            builder: StatementBuilder,
            external_txn: None,
            statements_issued: false,
            owns_connection,
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Enlist every subsequent statement in a transaction the caller began
    /// on the shared engine. Must be called before the session issues its
    /// first statement; the caller commits or rolls back.
    pub fn use_transaction(&mut self, txn: TransactionId) -> Result<()> {
        if self.statements_issued {
            return Err(OrmError::Execution(
                "cannot enlist in a transaction after statements have been issued".to_string(),
            ));
        }
        if self.external_txn.is_some() {
            return Err(OrmError::Execution(
                "session is already enlisted in a transaction".to_string(),
            ));
        }
        self.external_txn = Some(txn);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Change tracking
    // ------------------------------------------------------------------

    /// Track a new instance for insertion on the next save.
    pub fn add(&mut self, entity: &str, values: &[(&str, Value)]) -> Result<EntityId> {
        self.tracker.add(entity, values)
    }

    /// Track an existing instance without loading it from the engine.
    pub fn attach(&mut self, entity: &str, values: &[(&str, Value)]) -> Result<EntityId> {
        self.tracker.attach(entity, values)
    }

    /// Schedule a tracked instance for deletion on the next save.
    pub fn mark_deleted(&mut self, id: EntityId) -> Result<()> {
        self.tracker.mark_deleted(id)
    }

    pub fn get(&self, id: EntityId, column: &str) -> Result<Value> {
        self.tracker.get(id, column)
    }

    pub fn set(&mut self, id: EntityId, column: &str, value: impl Into<Value>) -> Result<()> {
        self.tracker.set(id, column, value.into())
    }

    /// Bind a relationship; the foreign key is filled in during save, after
    /// the principal's generated key is known. Rebinding an
    /// already-persisted instance saves as a foreign-key update, provided
    /// the principal's key is known by then.
    pub fn set_reference(
        &mut self,
        id: EntityId,
        relation: &str,
        principal: EntityId,
    ) -> Result<()> {
        self.tracker.set_reference(id, relation, principal)
    }

    pub fn state(&self, id: EntityId) -> Result<EntityState> {
        self.tracker.state(id)
    }

    pub fn key(&self, id: EntityId) -> Result<Value> {
        self.tracker.key(id)
    }

    /// Pending work, classified and dependency-ordered, without applying it.
    pub fn pending_changes(&self) -> ChangeSet {
        self.tracker.compute_change_set()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load one instance by key. The identity map is consulted first: a key
    /// already tracked returns the existing handle without touching the
    /// engine.
    pub async fn find(&mut self, entity: &str, key: impl Into<Value>) -> Result<Option<EntityId>> {
        let key = key.into();
        if let Some(id) = self.tracker.find_tracked(entity, &key) {
            return Ok(Some(id));
        }
        let descriptor = Arc::clone(self.model.descriptor(entity)?);
        let statement = self.builder.key_lookup(&descriptor, &key);
        let mut rows = self.issue_query(&statement).await?;
        Ok(rows
            .drain(..)
            .next()
            .map(|row| self.tracker.track_loaded(descriptor, row)))
    }

    /// Start a query over one entity type.
    pub fn query<'a>(&'a mut self, entity: &str) -> QueryBuilder<'a> {
        QueryBuilder::new(self, entity)
    }

    // ------------------------------------------------------------------
    // Saving
    // ------------------------------------------------------------------

    /// Persist every pending change in one batch: inserts principals-first,
    /// then updates, then deletes dependents-first.
    ///
    /// Without an enlisted transaction the batch runs in its own engine
    /// transaction, rolled back entirely on failure. Inside an enlisted
    /// transaction the batch stops at the first failure and leaves the
    /// transaction's fate to the caller; the error reports how many
    /// statements had already been applied.
    pub async fn save_changes(&mut self) -> Result<SaveReport> {
        // Rebound relationships on persisted instances become plain
        // foreign-key updates once resolved here.
        self.tracker.resolve_attached_references()?;
        let change_set = self.tracker.compute_change_set();
        if change_set.is_empty() {
            return Ok(SaveReport::default());
        }
        debug!(
            inserts = change_set.inserts.len(),
            updates = change_set.updates.len(),
            deletes = change_set.deletes.len(),
            "saving changes"
        );

        let (txn, own_txn) = match self.external_txn {
            Some(txn) => (txn, false),
            None => (self.engine.begin().await?, true),
        };

        match self.apply_change_set(&change_set, txn).await {
            Ok(report) => {
                if own_txn {
                    self.engine.commit(txn).await?;
                }
                self.tracker.mark_persisted(&change_set);
                Ok(report)
            }
            Err(err) => {
                if own_txn {
                    if let Err(rollback_err) = self.engine.rollback(txn).await {
                        warn!(error = %rollback_err, "rollback after failed save also failed");
                    }
                }
                Err(err)
            }
        }
    }

    /// Synchronous variant of [`Session::save_changes`], sharing the exact
    /// same commit path. Must not be called from inside an async runtime.
    pub fn save_changes_blocking(&mut self) -> Result<SaveReport> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| OrmError::Execution(format!("cannot start blocking runtime: {}", e)))?;
        runtime.block_on(self.save_changes())
    }

    async fn apply_change_set(
        &mut self,
        change_set: &ChangeSet,
        txn: TransactionId,
    ) -> Result<SaveReport> {
        let mut report = SaveReport::default();
        let mut applied = 0usize;

        for pending in &change_set.inserts {
            self.tracker.resolve_references(pending.id)?;
            let statement = self.builder.insert(self.tracker.entry(pending.id)?);
            let outcome = self.issue_execute(&statement, Some(txn)).await?;
            if let Some(key) = outcome.generated_key {
                self.tracker.set_key(pending.id, key)?;
            }
            applied += 1;
            report.inserted += 1;
        }

        for pending in &change_set.updates {
            let entry = self.tracker.entry(pending.id)?;
            let entity = entry.entity().to_string();
            let key = entry.key().clone();
            let statement = self.builder.update(entry, &pending.columns)?;
            let outcome = self.issue_execute(&statement, Some(txn)).await?;
            if outcome.rows_affected == 0 {
                warn!(entity = %entity, key = %key, "update affected no rows");
                return Err(OrmError::ConcurrencyConflict {
                    entity,
                    key,
                    operation: statement.kind(),
                    applied,
                });
            }
            applied += 1;
            report.updated += 1;
        }

        for pending in &change_set.deletes {
            let entry = self.tracker.entry(pending.id)?;
            let entity = entry.entity().to_string();
            let key = entry.key().clone();
            let statement = self.builder.delete(entry);
            let outcome = self.issue_execute(&statement, Some(txn)).await?;
            if outcome.rows_affected == 0 {
                warn!(entity = %entity, key = %key, "delete affected no rows");
                return Err(OrmError::ConcurrencyConflict {
                    entity,
                    key,
                    operation: statement.kind(),
                    applied,
                });
            }
            applied += 1;
            report.deleted += 1;
        }

        Ok(report)
    }

    /// Release the connection if this session owns it. Sessions over a
    /// caller-owned engine leave the handle open.
    pub async fn close(self) -> Result<()> {
        if self.owns_connection {
            self.engine.close().await
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Engine plumbing
    // ------------------------------------------------------------------

    pub(crate) async fn issue_query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        self.statements_issued = true;
        self.engine.query(statement, self.external_txn).await
    }

    async fn issue_execute(
        &mut self,
        statement: &Statement,
        txn: Option<TransactionId>,
    ) -> Result<ExecuteOutcome> {
        self.statements_issued = true;
        self.engine.execute(statement, txn).await
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }
}
