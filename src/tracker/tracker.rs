use super::{ChangeSet, EntityId, EntityState, PendingDelete, PendingInsert, PendingUpdate, TrackedEntity};
use crate::core::{OrmError, Result, Row, Value};
use crate::model::{EntityDescriptor, Model};
use std::sync::Arc;

/// Records loaded snapshots and pending mutations for one session.
///
/// Mutation is never intercepted: a tracked instance becomes `Modified`
/// only when a change set is computed and its current values differ from
/// the snapshot. Instances are addressed by [`EntityId`] handles; rows with
/// the same (entity, key) resolve to the same handle (identity map).
pub struct ChangeTracker {
    model: Arc<Model>,
    entries: Vec<TrackedEntity>,
}

impl ChangeTracker {
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            entries: Vec::new(),
        }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Track a new instance for insertion. No snapshot is captured.
    pub fn add(&mut self, entity: &str, values: &[(&str, Value)]) -> Result<EntityId> {
        let descriptor = Arc::clone(self.model.descriptor(entity)?);
        let row = self.build_row(&descriptor, values)?;
        self.entries.push(TrackedEntity {
            descriptor,
            current: row,
            snapshot: None,
            state: EntityState::Added,
            references: Vec::new(),
        });
        Ok(EntityId(self.entries.len() - 1))
    }

    /// Track an existing instance as `Unchanged`, capturing its snapshot.
    /// The key must be present; attaching a key that is already tracked
    /// returns the existing handle.
    pub fn attach(&mut self, entity: &str, values: &[(&str, Value)]) -> Result<EntityId> {
        let descriptor = Arc::clone(self.model.descriptor(entity)?);
        let row = self.build_row(&descriptor, values)?;
        if row[descriptor.key_index()].is_null() {
            return Err(OrmError::Execution(format!(
                "cannot attach '{}' without a key value",
                entity
            )));
        }
        Ok(self.track_loaded(descriptor, row))
    }

    /// Track a row loaded from the engine. If the key is already tracked
    /// the existing handle wins and the loaded values are discarded (the
    /// session's in-flight changes take precedence).
    pub(crate) fn track_loaded(
        &mut self,
        descriptor: Arc<EntityDescriptor>,
        row: Row,
    ) -> EntityId {
        let key = &row[descriptor.key_index()];
        if let Some(existing) = self.find_tracked(&descriptor.name, key) {
            return existing;
        }
        self.entries.push(TrackedEntity {
            descriptor,
            snapshot: Some(row.clone()),
            current: row,
            state: EntityState::Unchanged,
            references: Vec::new(),
        });
        EntityId(self.entries.len() - 1)
    }

    /// Handle of an already-tracked (entity, key) pair, if any.
    pub fn find_tracked(&self, entity: &str, key: &Value) -> Option<EntityId> {
        self.entries.iter().position(|entry| {
            entry.state.is_tracked() && entry.entity() == entity && entry.key() == key
        }).map(EntityId)
    }

    /// Transition an instance toward deletion. An `Added` instance that was
    /// never persisted detaches immediately instead.
    pub fn mark_deleted(&mut self, id: EntityId) -> Result<()> {
        let entry = self.entry_mut(id)?;
        match entry.state {
            EntityState::Added => {
                entry.state = EntityState::Detached;
                Ok(())
            }
            EntityState::Unchanged | EntityState::Modified => {
                entry.state = EntityState::Deleted;
                Ok(())
            }
            state => Err(OrmError::Execution(format!(
                "cannot delete instance in state {}",
                state
            ))),
        }
    }

    pub fn get(&self, id: EntityId, column: &str) -> Result<Value> {
        let entry = self.entry(id)?;
        let index = column_index(&entry.descriptor, column)?;
        Ok(entry.current[index].clone())
    }

    pub fn set(&mut self, id: EntityId, column: &str, value: Value) -> Result<()> {
        let entry = self.entry_mut(id)?;
        let index = column_index(&entry.descriptor, column)?;
        entry.descriptor.columns[index].check_type(&value)?;
        if index == entry.descriptor.key_index() && entry.state != EntityState::Added {
            return Err(OrmError::Execution(format!(
                "cannot modify the key of a tracked '{}' instance",
                entry.entity()
            )));
        }
        if matches!(entry.state, EntityState::Deleted) {
            return Err(OrmError::Execution(
                "cannot modify a deleted instance".to_string(),
            ));
        }
        entry.current[index] = value;
        Ok(())
    }

    /// Bind a relationship to another tracked instance. The dependent's
    /// foreign-key column is filled from the principal's key during commit,
    /// after generated keys become known.
    pub fn set_reference(
        &mut self,
        id: EntityId,
        relation: &str,
        principal: EntityId,
    ) -> Result<()> {
        let principal_entity = self.entry(principal)?.entity().to_string();
        let entry = self.entry(id)?;
        let relation_index = entry
            .descriptor
            .relations
            .iter()
            .position(|r| r.name == relation)
            .ok_or_else(|| {
                OrmError::Configuration(format!(
                    "entity '{}' has no relation '{}'",
                    entry.entity(),
                    relation
                ))
            })?;
        let expected = &entry.descriptor.relations[relation_index].principal;
        if expected != &principal_entity {
            return Err(OrmError::Configuration(format!(
                "relation '{}' expects a '{}' principal, got '{}'",
                relation, expected, principal_entity
            )));
        }
        let entry = self.entry_mut(id)?;
        entry.references.retain(|(index, _)| *index != relation_index);
        entry.references.push((relation_index, principal));
        Ok(())
    }

    /// Fill the instance's foreign-key columns from its bound principals'
    /// keys. Called right before the instance's INSERT is built, by which
    /// point dependency ordering guarantees every principal key is known.
    pub(crate) fn resolve_references(&mut self, id: EntityId) -> Result<()> {
        let bindings = self.entry(id)?.references.clone();
        for (relation_index, principal_id) in bindings {
            let key = self.entry(principal_id)?.key().clone();
            if key.is_null() {
                let entry = self.entry(id)?;
                return Err(OrmError::Execution(format!(
                    "relation '{}' of '{}': principal key is not yet known",
                    entry.descriptor.relations[relation_index].name,
                    entry.entity()
                )));
            }
            let entry = self.entry_mut(id)?;
            let fk_column = entry.descriptor.relations[relation_index].fk_column.clone();
            let index = column_index(&entry.descriptor, &fk_column)?;
            entry.current[index] = key;
        }
        Ok(())
    }

    /// Resolve reference bindings on already-persisted instances so the
    /// foreign-key change participates in change-set computation as an
    /// update. `Added` instances are skipped; they resolve right before
    /// their INSERT, when generated principal keys exist. Binding a
    /// persisted instance to a principal whose key is not yet known fails:
    /// the principal must be saved first.
    pub(crate) fn resolve_attached_references(&mut self) -> Result<()> {
        for index in 0..self.entries.len() {
            let id = EntityId(index);
            let Ok(entry) = self.entry(id) else { continue };
            if entry.state == EntityState::Added || entry.references.is_empty() {
                continue;
            }
            self.resolve_references(id)?;
        }
        Ok(())
    }

    /// Effective state, with lazy `Modified` detection.
    pub fn state(&self, id: EntityId) -> Result<EntityState> {
        Ok(self.entry(id)?.effective_state())
    }

    pub fn key(&self, id: EntityId) -> Result<Value> {
        Ok(self.entry(id)?.key().clone())
    }

    pub(crate) fn set_key(&mut self, id: EntityId, key: Value) -> Result<()> {
        let entry = self.entry_mut(id)?;
        let index = entry.descriptor.key_index();
        entry.current[index] = key;
        Ok(())
    }

    /// Classify every tracked instance and return the pending work in
    /// dependency order: inserts principals-first, deletes
    /// dependents-first. Unchanged instances contribute nothing.
    pub fn compute_change_set(&self) -> ChangeSet {
        let mut change_set = ChangeSet::default();
        for (index, entry) in self.entries.iter().enumerate() {
            let id = EntityId(index);
            match entry.effective_state() {
                EntityState::Added => change_set.inserts.push(PendingInsert { id }),
                EntityState::Modified => change_set.updates.push(PendingUpdate {
                    id,
                    columns: entry.changed_columns(),
                }),
                EntityState::Deleted => change_set.deletes.push(PendingDelete { id }),
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }

        let order = |id: EntityId| self.model.order_of(self.entries[id.0].entity());
        change_set.inserts.sort_by_key(|pending| (order(pending.id), pending.id.0));
        change_set
            .deletes
            .sort_by_key(|pending| (std::cmp::Reverse(order(pending.id)), pending.id.0));
        change_set
    }

    /// Apply post-commit bookkeeping: persisted instances collapse to
    /// `Unchanged` with refreshed snapshots, deleted instances detach.
    pub(crate) fn mark_persisted(&mut self, change_set: &ChangeSet) {
        for pending in change_set.inserts.iter().map(|p| p.id)
            .chain(change_set.updates.iter().map(|p| p.id))
        {
            let entry = &mut self.entries[pending.0];
            entry.state = EntityState::Unchanged;
            entry.snapshot = Some(entry.current.clone());
            entry.references.clear();
        }
        for pending in &change_set.deletes {
            let entry = &mut self.entries[pending.id.0];
            entry.state = EntityState::Detached;
            entry.snapshot = None;
        }
    }

    pub(crate) fn entry(&self, id: EntityId) -> Result<&TrackedEntity> {
        self.entries
            .get(id.0)
            .filter(|entry| entry.state.is_tracked())
            .ok_or_else(|| OrmError::Execution(format!("{} is not tracked", id)))
    }

    pub(crate) fn entry_mut(&mut self, id: EntityId) -> Result<&mut TrackedEntity> {
        self.entries
            .get_mut(id.0)
            .filter(|entry| entry.state.is_tracked())
            .ok_or_else(|| OrmError::Execution(format!("{} is not tracked", id)))
    }

    /// Build a full row from (column, value) pairs; unnamed columns stay
    /// NULL. Unknown columns and type mismatches fail.
    fn build_row(
        &self,
        descriptor: &EntityDescriptor,
        values: &[(&str, Value)],
    ) -> Result<Row> {
        let mut row = vec![Value::Null; descriptor.columns.len()];
        for (column, value) in values {
            let index = column_index(descriptor, column)?;
            descriptor.columns[index].check_type(value)?;
            row[index] = value.clone();
        }
        Ok(row)
    }
}

fn column_index(descriptor: &EntityDescriptor, column: &str) -> Result<usize> {
    descriptor.column_index(column).ok_or_else(|| {
        OrmError::Execution(format!(
            "column '{}' not found on entity '{}'",
            column, descriptor.name
        ))
    })
}
