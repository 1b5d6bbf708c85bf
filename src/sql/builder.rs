use super::{Assignment, Predicate, Statement};
use crate::core::{OrmError, Result, Value};
use crate::model::EntityDescriptor;
use crate::tracker::{ChangeSet, ChangeTracker, EntityId, TrackedEntity};

/// One statement of a commit batch, tagged with the instance it persists.
#[derive(Debug)]
pub struct CommitStep {
    pub id: EntityId,
    pub statement: Statement,
}

/// Turns pending changes into statements.
///
/// Every INSERT targets exactly one Added instance, every UPDATE/DELETE
/// exactly one tracked row; statements are never combined across entity
/// types, so the dependency order stays explicit and auditable.
pub struct StatementBuilder;

impl StatementBuilder {
    /// INSERT for an Added instance. A generated key that is still NULL is
    /// omitted from the column list and requested back via RETURNING.
    pub fn insert(&self, entry: &TrackedEntity) -> Statement {
        let descriptor = &entry.descriptor;
        let key_index = descriptor.key_index();
        let needs_key = descriptor.key_generated && entry.current[key_index].is_null();

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (index, column) in descriptor.columns.iter().enumerate() {
            if needs_key && index == key_index {
                continue;
            }
            columns.push(column.name.clone());
            values.push(entry.current[index].clone());
        }

        Statement::Insert {
            table: descriptor.table.clone(),
            columns,
            values,
            returning_key: needs_key.then(|| descriptor.key.clone()),
        }
    }

    /// UPDATE for a Modified instance, assigning only the changed columns.
    /// The WHERE clause pins the primary key and, when the entity declares
    /// one, the concurrency token's value as read at load time.
    pub fn update(&self, entry: &TrackedEntity, columns: &[usize]) -> Result<Statement> {
        let descriptor = &entry.descriptor;
        let key_index = descriptor.key_index();

        let assignments: Vec<Assignment> = columns
            .iter()
            .filter(|index| **index != key_index)
            .map(|index| Assignment {
                column: descriptor.columns[*index].name.clone(),
                value: entry.current[*index].clone(),
            })
            .collect();
        if assignments.is_empty() {
            return Err(OrmError::Execution(format!(
                "no assignable columns changed on '{}'",
                entry.entity()
            )));
        }

        Ok(Statement::Update {
            table: descriptor.table.clone(),
            assignments,
            predicate: self.write_guard(entry),
        })
    }

    /// DELETE for a Deleted instance, guarded like an UPDATE.
    pub fn delete(&self, entry: &TrackedEntity) -> Statement {
        Statement::Delete {
            table: entry.descriptor.table.clone(),
            predicate: self.write_guard(entry),
        }
    }

    /// SELECT of every mapped column for a single key.
    pub fn key_lookup(&self, descriptor: &EntityDescriptor, key: &Value) -> Statement {
        Statement::Select {
            table: descriptor.table.clone(),
            columns: descriptor.columns.iter().map(|c| c.name.clone()).collect(),
            join: None,
            predicate: Some(Predicate::Eq {
                column: descriptor.key.clone(),
                value: key.clone(),
            }),
            order_by: vec![],
            limit: Some(1),
            count_only: false,
        }
    }

    /// Render an entire change set in dependency order. Only usable when
    /// every foreign key is already resolvable (no generated principal key
    /// pending); the session's commit loop interleaves execution instead
    /// when keys are generated mid-batch.
    pub fn build_batch(
        &self,
        tracker: &mut ChangeTracker,
        change_set: &ChangeSet,
    ) -> Result<Vec<CommitStep>> {
        let mut steps = Vec::with_capacity(change_set.len());
        for pending in &change_set.inserts {
            tracker.resolve_references(pending.id)?;
            let entry = tracker.entry(pending.id)?;
            steps.push(CommitStep {
                id: pending.id,
                statement: self.insert(entry),
            });
        }
        for pending in &change_set.updates {
            let entry = tracker.entry(pending.id)?;
            steps.push(CommitStep {
                id: pending.id,
                statement: self.update(entry, &pending.columns)?,
            });
        }
        for pending in &change_set.deletes {
            let entry = tracker.entry(pending.id)?;
            steps.push(CommitStep {
                id: pending.id,
                statement: self.delete(entry),
            });
        }
        Ok(steps)
    }

    /// Key equality, plus token equality when a token is declared.
    fn write_guard(&self, entry: &TrackedEntity) -> Predicate {
        let descriptor = &entry.descriptor;
        let key_guard = Predicate::Eq {
            column: descriptor.key.clone(),
            value: entry.key().clone(),
        };
        match (&descriptor.concurrency_token, entry.original_token()) {
            (Some(token), Some(original)) => key_guard.and(Predicate::Eq {
                column: token.clone(),
                value: original.clone(),
            }),
            _ => key_guard,
        }
    }
}
