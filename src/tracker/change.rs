use super::EntityId;

/// The pending inserts, updates, and deletes computed for one session.
///
/// Derived and ephemeral: computed by comparing current values against load
/// snapshots on each commit request, consumed by the statement builder,
/// then discarded. Inserts are ordered principals-first, deletes
/// dependents-first.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub inserts: Vec<PendingInsert>,
    pub updates: Vec<PendingUpdate>,
    pub deletes: Vec<PendingDelete>,
}

#[derive(Debug)]
pub struct PendingInsert {
    pub id: EntityId,
}

#[derive(Debug)]
pub struct PendingUpdate {
    pub id: EntityId,
    /// Indices of the columns whose values differ from the snapshot.
    pub columns: Vec<usize>,
}

#[derive(Debug)]
pub struct PendingDelete {
    pub id: EntityId,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}
