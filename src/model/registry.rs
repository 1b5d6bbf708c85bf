use super::EntityDescriptor;
use crate::core::{OrmError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Mutable registration surface. Collects descriptors, then freezes into a
/// [`Model`] via [`EntityRegistry::build`], which consumes the registry so
/// mapping cannot change underneath sessions once a model exists.
#[derive(Default)]
pub struct EntityRegistry {
    descriptors: Vec<EntityDescriptor>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity descriptor. Registering the same entity name
    /// twice is a configuration error.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<()> {
        if self.descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(OrmError::Configuration(format!(
                "entity '{}' is already registered",
                descriptor.name
            )));
        }
        if self.descriptors.iter().any(|d| d.table == descriptor.table) {
            return Err(OrmError::Configuration(format!(
                "table '{}' is already mapped by another entity",
                descriptor.table
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Freeze the registry into an immutable model.
    ///
    /// Validates cross-entity references and computes the dependency order
    /// (principals before dependents). Fails on relations that name an
    /// unregistered entity and on foreign-key cycles.
    pub fn build(self) -> Result<Arc<Model>> {
        let mut descriptors = HashMap::new();
        for descriptor in self.descriptors {
            descriptors.insert(descriptor.name.clone(), Arc::new(descriptor));
        }

        for descriptor in descriptors.values() {
            for relation in &descriptor.relations {
                let principal = descriptors.get(&relation.principal).ok_or_else(|| {
                    OrmError::Configuration(format!(
                        "entity '{}': relation '{}' references unregistered entity '{}'",
                        descriptor.name, relation.name, relation.principal
                    ))
                })?;
                let fk = descriptor
                    .column(&relation.fk_column)
                    .expect("validated by the entity builder");
                let key = principal.column(&principal.key).expect("key column exists");
                if fk.data_type != key.data_type {
                    return Err(OrmError::Configuration(format!(
                        "entity '{}': foreign-key column '{}' has type {}, but '{}' keys are {}",
                        descriptor.name, relation.fk_column, fk.data_type,
                        principal.name, key.data_type
                    )));
                }
            }
        }

        let insert_order = topological_order(&descriptors)?;
        Ok(Arc::new(Model {
            descriptors,
            insert_order,
        }))
    }
}

/// Kahn's algorithm over the FK graph: edge principal -> dependent.
fn topological_order(descriptors: &HashMap<String, Arc<EntityDescriptor>>) -> Result<Vec<String>> {
    let mut indegree: HashMap<&str, usize> =
        descriptors.keys().map(|name| (name.as_str(), 0)).collect();
    for descriptor in descriptors.values() {
        for relation in &descriptor.relations {
            // Self-references would deadlock the order; reject them here.
            if relation.principal == descriptor.name {
                return Err(OrmError::Configuration(format!(
                    "entity '{}' references itself; self-relations are not supported",
                    descriptor.name
                )));
            }
            *indegree.get_mut(descriptor.name.as_str()).expect("known entity") += 1;
        }
    }

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    ready.sort_unstable(); // deterministic order across runs

    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(name) = ready.pop() {
        order.push(name.to_string());
        let mut unblocked = Vec::new();
        for descriptor in descriptors.values() {
            let edges = descriptor.relations.iter().filter(|r| r.principal == name).count();
            if edges > 0 {
                let degree = indegree
                    .get_mut(descriptor.name.as_str())
                    .expect("known entity");
                *degree -= edges;
                if *degree == 0 {
                    unblocked.push(descriptor.name.as_str());
                }
            }
        }
        unblocked.sort_unstable();
        ready.extend(unblocked);
    }

    if order.len() != descriptors.len() {
        return Err(OrmError::Configuration(
            "foreign-key relationships form a cycle".to_string(),
        ));
    }
    Ok(order)
}

/// Frozen mapping metadata shared by every session.
pub struct Model {
    descriptors: HashMap<String, Arc<EntityDescriptor>>,
    /// Entity names in dependency order: principals before dependents.
    insert_order: Vec<String>,
}

impl Model {
    pub fn descriptor(&self, entity: &str) -> Result<&Arc<EntityDescriptor>> {
        self.descriptors.get(entity).ok_or_else(|| {
            OrmError::Configuration(format!("entity '{}' is not registered", entity))
        })
    }

    /// Entity names ordered so every principal precedes its dependents.
    pub fn insert_order(&self) -> &[String] {
        &self.insert_order
    }

    /// Position of an entity in the dependency order.
    pub fn order_of(&self, entity: &str) -> usize {
        self.insert_order
            .iter()
            .position(|name| name == entity)
            .unwrap_or(usize::MAX)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.descriptors.values()
    }

    /// JSON dump of the mapped schema, for diagnostics and tooling.
    pub fn describe(&self) -> serde_json::Value {
        let mut entities = serde_json::Map::new();
        for name in &self.insert_order {
            if let Some(descriptor) = self.descriptors.get(name) {
                entities.insert(
                    name.clone(),
                    serde_json::to_value(descriptor.as_ref()).unwrap_or_default(),
                );
            }
        }
        serde_json::json!({ "entities": entities, "insert_order": self.insert_order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::model::ColumnDef;

    fn user() -> EntityDescriptor {
        EntityDescriptor::builder("User", "USERS")
            .generated_key("id")
            .column(ColumnDef::new("name", DataType::Text).not_null().unique())
            .concurrency_token("name")
            .build()
            .unwrap()
    }

    fn folder() -> EntityDescriptor {
        EntityDescriptor::builder("Folder", "FOLDERS")
            .generated_key("id")
            .column(ColumnDef::new("name", DataType::Text).not_null())
            .column(ColumnDef::new("owner_id", DataType::Integer).not_null())
            .has_one("owner", "owner_id", "User")
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = EntityRegistry::new();
        registry.register(user()).unwrap();
        let err = registry.register(user());
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_principals_precede_dependents() {
        let mut registry = EntityRegistry::new();
        registry.register(folder()).unwrap();
        registry.register(user()).unwrap();
        let model = registry.build().unwrap();
        let order = model.insert_order();
        let user_pos = order.iter().position(|n| n == "User").unwrap();
        let folder_pos = order.iter().position(|n| n == "Folder").unwrap();
        assert!(user_pos < folder_pos);
    }

    #[test]
    fn test_unregistered_principal_fails() {
        let mut registry = EntityRegistry::new();
        registry.register(folder()).unwrap();
        let err = registry.build();
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_cycle_fails() {
        let a = EntityDescriptor::builder("A", "A_T")
            .key("id", DataType::Integer)
            .column(ColumnDef::new("b_id", DataType::Integer))
            .has_one("b", "b_id", "B")
            .build()
            .unwrap();
        let b = EntityDescriptor::builder("B", "B_T")
            .key("id", DataType::Integer)
            .column(ColumnDef::new("a_id", DataType::Integer))
            .has_one("a", "a_id", "A")
            .build()
            .unwrap();
        let mut registry = EntityRegistry::new();
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        assert!(matches!(registry.build(), Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_fk_type_mismatch_fails() {
        let bad_folder = EntityDescriptor::builder("Folder", "FOLDERS")
            .generated_key("id")
            .column(ColumnDef::new("owner_id", DataType::Text))
            .has_one("owner", "owner_id", "User")
            .build()
            .unwrap();
        let mut registry = EntityRegistry::new();
        registry.register(user()).unwrap();
        registry.register(bad_folder).unwrap();
        assert!(matches!(registry.build(), Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_describe_lists_entities() {
        let mut registry = EntityRegistry::new();
        registry.register(user()).unwrap();
        let model = registry.build().unwrap();
        let json = model.describe();
        assert!(json["entities"]["User"]["columns"].is_array());
    }
}
