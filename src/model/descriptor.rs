use crate::core::{DataType, OrmError, Result, Value};
use serde::Serialize;

/// What happens to dependents when their principal row is deleted.
///
/// The engine is expected to restrict: deleting a principal with live
/// dependents is a constraint violation, never a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteBehavior {
    Restrict,
}

/// A mapped column.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique: bool,
    pub max_length: Option<usize>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            unique: false,
            max_length: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }

    /// Check a value against the column's declared type.
    pub fn check_type(&self, value: &Value) -> Result<()> {
        if !self.data_type.is_compatible(value) {
            return Err(OrmError::TypeMismatch(format!(
                "column '{}' expects {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }
        Ok(())
    }
}

/// A directed many-to-one relationship: the dependent entity carries a
/// foreign-key column referencing the principal's key.
#[derive(Debug, Clone, Serialize)]
pub struct Relation {
    /// Navigation name used by `include` and `set_reference`.
    pub name: String,
    /// Foreign-key column on the dependent.
    pub fk_column: String,
    /// Principal entity name.
    pub principal: String,
    pub on_delete: DeleteBehavior,
}

/// Immutable mapping metadata for one entity type.
///
/// Built once through [`EntityDescriptor::builder`]; sessions only ever see
/// descriptors frozen inside a [`crate::model::Model`].
#[derive(Debug, Clone, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    /// Primary-key column name. Exactly one per entity.
    pub key: String,
    /// Whether the engine generates the key on insert.
    pub key_generated: bool,
    /// Column whose read-time value must still match for a write to apply.
    pub concurrency_token: Option<String>,
    pub relations: Vec<Relation>,
}

impl EntityDescriptor {
    pub fn builder(name: impl Into<String>, table: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            keys: Vec::new(),
            key_generated: false,
            concurrency_token: None,
            relations: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn key_index(&self) -> usize {
        // The builder guarantees the key column exists.
        self.column_index(&self.key).expect("key column missing")
    }

    pub fn token_index(&self) -> Option<usize> {
        self.concurrency_token
            .as_deref()
            .and_then(|t| self.column_index(t))
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Whether ordering by exactly these columns already pins a single row:
    /// true when any of them is the key or carries a unique constraint.
    pub fn orders_uniquely(&self, columns: &[String]) -> bool {
        columns.iter().any(|name| {
            name == &self.key || self.column(name).map(|c| c.unique).unwrap_or(false)
        })
    }
}

/// Declarative registration builder (no runtime reflection involved).
pub struct EntityBuilder {
    name: String,
    table: String,
    columns: Vec<ColumnDef>,
    keys: Vec<String>,
    key_generated: bool,
    concurrency_token: Option<String>,
    relations: Vec<Relation>,
}

impl EntityBuilder {
    /// Declare a caller-supplied key column.
    ///
    /// Declaring more than one key is flagged at `build()` so the chain
    /// stays infallible.
    pub fn key(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        self.columns.push(ColumnDef::new(name.clone(), data_type).not_null());
        self.keys.push(name);
        self
    }

    /// Declare an engine-generated integer key column.
    pub fn generated_key(mut self, name: impl Into<String>) -> Self {
        self = self.key(name, DataType::Integer);
        self.key_generated = true;
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Mark an already-declared column as the concurrency token.
    pub fn concurrency_token(mut self, column: impl Into<String>) -> Self {
        self.concurrency_token = Some(column.into());
        self
    }

    /// Declare a many-to-one relationship through an already-declared
    /// foreign-key column.
    pub fn has_one(
        mut self,
        name: impl Into<String>,
        fk_column: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            fk_column: fk_column.into(),
            principal: principal.into(),
            on_delete: DeleteBehavior::Restrict,
        });
        self
    }

    pub fn build(mut self) -> Result<EntityDescriptor> {
        if self.keys.len() > 1 {
            return Err(OrmError::Configuration(format!(
                "entity '{}' declares more than one key column",
                self.name
            )));
        }
        let key = self.keys.pop().ok_or_else(|| {
            OrmError::Configuration(format!("entity '{}' declares no key column", self.name))
        })?;

        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(OrmError::Configuration(format!(
                    "entity '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
        }

        let descriptor = EntityDescriptor {
            name: self.name,
            table: self.table,
            columns: self.columns,
            key,
            key_generated: self.key_generated,
            concurrency_token: self.concurrency_token,
            relations: self.relations,
        };

        if let Some(token) = &descriptor.concurrency_token {
            let column = descriptor.column(token).ok_or_else(|| {
                OrmError::Configuration(format!(
                    "entity '{}': concurrency token column '{}' is not declared",
                    descriptor.name, token
                ))
            })?;
            if !column.data_type.supports_equality() {
                return Err(OrmError::Configuration(format!(
                    "entity '{}': concurrency token column '{}' has type {}, which does not \
                     support equality comparison",
                    descriptor.name, token, column.data_type
                )));
            }
        }

        for relation in &descriptor.relations {
            if descriptor.column(&relation.fk_column).is_none() {
                return Err(OrmError::Configuration(format!(
                    "entity '{}': relation '{}' uses undeclared foreign-key column '{}'",
                    descriptor.name, relation.name, relation.fk_column
                )));
            }
        }

        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Result<EntityDescriptor> {
        EntityDescriptor::builder("User", "USERS")
            .generated_key("id")
            .column(ColumnDef::new("name", DataType::Text).not_null().unique().max_length(100))
            .concurrency_token("name")
            .column(ColumnDef::new("long_description", DataType::Text))
            .build()
    }

    #[test]
    fn test_builder_produces_descriptor() {
        let desc = user().unwrap();
        assert_eq!(desc.key, "id");
        assert!(desc.key_generated);
        assert_eq!(desc.key_index(), 0);
        assert_eq!(desc.token_index(), Some(1));
        assert_eq!(desc.columns.len(), 3);
    }

    #[test]
    fn test_missing_key_fails() {
        let err = EntityDescriptor::builder("Bad", "BAD")
            .column(ColumnDef::new("name", DataType::Text))
            .build();
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_two_keys_fail() {
        let err = EntityDescriptor::builder("Bad", "BAD")
            .key("a", DataType::Integer)
            .key("b", DataType::Integer)
            .build();
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_float_token_rejected() {
        let err = EntityDescriptor::builder("Bad", "BAD")
            .key("id", DataType::Integer)
            .column(ColumnDef::new("score", DataType::Float))
            .concurrency_token("score")
            .build();
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_undeclared_token_rejected() {
        let err = EntityDescriptor::builder("Bad", "BAD")
            .key("id", DataType::Integer)
            .concurrency_token("ghost")
            .build();
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_relation_fk_must_exist() {
        let err = EntityDescriptor::builder("Folder", "FOLDERS")
            .generated_key("id")
            .has_one("owner", "owner_id", "User")
            .build();
        assert!(matches!(err, Err(OrmError::Configuration(_))));
    }

    #[test]
    fn test_orders_uniquely() {
        let desc = user().unwrap();
        assert!(desc.orders_uniquely(&["id".to_string()]));
        assert!(desc.orders_uniquely(&["name".to_string()]));
        assert!(!desc.orders_uniquely(&["long_description".to_string()]));
    }
}
