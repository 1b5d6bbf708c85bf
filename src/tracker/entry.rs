use super::EntityState;
use crate::core::{Row, Value};
use crate::model::EntityDescriptor;
use std::fmt;
use std::sync::Arc;

/// Handle to a tracked entity instance, valid for the lifetime of the
/// session that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(pub(crate) usize);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity_{}", self.0)
    }
}

/// A tracked instance: current values plus the snapshot captured at load
/// or first attach. `Added` instances have no snapshot.
#[derive(Debug)]
pub struct TrackedEntity {
    pub(crate) descriptor: Arc<EntityDescriptor>,
    pub(crate) current: Row,
    pub(crate) snapshot: Option<Row>,
    pub(crate) state: EntityState,
    /// Relationship bindings to other tracked instances, resolved into
    /// foreign-key values during commit (relation index, principal handle).
    pub(crate) references: Vec<(usize, EntityId)>,
}

impl TrackedEntity {
    pub fn entity(&self) -> &str {
        &self.descriptor.name
    }

    pub fn key(&self) -> &Value {
        &self.current[self.descriptor.key_index()]
    }

    /// Concurrency-token value as read at load time (from the snapshot,
    /// not the possibly-mutated current row).
    pub fn original_token(&self) -> Option<&Value> {
        let index = self.descriptor.token_index()?;
        Some(match &self.snapshot {
            Some(snapshot) => &snapshot[index],
            None => &self.current[index],
        })
    }

    /// Column indices whose current value differs from the snapshot.
    /// Empty for instances without a snapshot.
    pub fn changed_columns(&self) -> Vec<usize> {
        match &self.snapshot {
            Some(snapshot) => self
                .current
                .iter()
                .zip(snapshot.iter())
                .enumerate()
                .filter(|(_, (current, original))| current != original)
                .map(|(index, _)| index)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Lazily resolved state: an `Unchanged` instance whose values drifted
    /// from the snapshot reports `Modified`.
    pub fn effective_state(&self) -> EntityState {
        if self.state == EntityState::Unchanged && !self.changed_columns().is_empty() {
            EntityState::Modified
        } else {
            self.state
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::model::{ColumnDef, EntityDescriptor};

    fn descriptor() -> Arc<EntityDescriptor> {
        Arc::new(
            EntityDescriptor::builder("User", "USERS")
                .generated_key("id")
                .column(ColumnDef::new("name", DataType::Text).not_null())
                .concurrency_token("name")
                .build()
                .unwrap(),
        )
    }

    fn entry() -> TrackedEntity {
        TrackedEntity {
            descriptor: descriptor(),
            current: vec![Value::Integer(1), Value::Text("John".into())],
            snapshot: Some(vec![Value::Integer(1), Value::Text("John".into())]),
            state: EntityState::Unchanged,
            references: Vec::new(),
        }
    }

    #[test]
    fn test_unchanged_until_mutated() {
        let mut tracked = entry();
        assert_eq!(tracked.effective_state(), EntityState::Unchanged);
        assert!(tracked.changed_columns().is_empty());

        tracked.current[1] = Value::Text("Oliver".into());
        assert_eq!(tracked.effective_state(), EntityState::Modified);
        assert_eq!(tracked.changed_columns(), vec![1]);
    }

    #[test]
    fn test_original_token_comes_from_snapshot() {
        let mut tracked = entry();
        tracked.current[1] = Value::Text("Oliver".into());
        assert_eq!(tracked.original_token(), Some(&Value::Text("John".into())));
    }
}
