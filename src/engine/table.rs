// ============================================================================
// In-memory table storage
// ============================================================================

use std::collections::BTreeMap;

use crate::core::{DataType, OrmError, Result, Row, Value};
use crate::model::{EntityDescriptor, Model};

/// A foreign-key reference carried by a column.
#[derive(Debug, Clone)]
pub struct FkSpec {
    /// Referenced table name.
    pub table: String,
    /// Referenced column (the principal's key).
    pub column: String,
}

/// Physical column description, independent of any entity mapping.
#[derive(Debug, Clone)]
pub struct SpecColumn {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub unique: bool,
    pub max_length: Option<usize>,
    pub references: Option<FkSpec>,
}

impl SpecColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            unique: false,
            max_length: None,
            references: None,
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

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(FkSpec {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

/// Physical table description the engine stores rows against.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<SpecColumn>,
    /// Primary-key column name.
    pub key: String,
    /// Whether the engine assigns integer keys on insert.
    pub key_generated: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            key: key.into(),
            key_generated: false,
        }
    }

    pub fn column(mut self, column: SpecColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn generated_key(mut self) -> Self {
        self.key_generated = true;
        self
    }

    /// Derive a table spec from mapping metadata. The key column becomes
    /// NOT NULL UNIQUE; relation foreign keys become references on their
    /// columns.
    pub fn from_descriptor(descriptor: &EntityDescriptor, model: &Model) -> Result<TableSpec> {
        let mut spec = TableSpec::new(&descriptor.table, &descriptor.key);
        spec.key_generated = descriptor.key_generated;

        for column in &descriptor.columns {
            let mut physical = SpecColumn::new(&column.name, column.data_type);
            physical.nullable = column.nullable && column.name != descriptor.key;
            physical.unique = column.unique || column.name == descriptor.key;
            physical.max_length = column.max_length;

            if let Some(relation) = descriptor
                .relations
                .iter()
                .find(|r| r.fk_column == column.name)
            {
                let principal = model.descriptor(&relation.principal)?;
                physical.references = Some(FkSpec {
                    table: principal.table.clone(),
                    column: principal.key.clone(),
                });
            }

            spec.columns.push(physical);
        }
        Ok(spec)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn key_index(&self) -> usize {
        self.column_index(&self.key).expect("key column declared")
    }
}

/// Row storage for one table. Rows keep insertion order through their
/// internal row IDs; those IDs never leak past the engine.
#[derive(Debug)]
pub(crate) struct EngineTable {
    pub spec: TableSpec,
    pub rows: BTreeMap<u64, Row>,
    next_row_id: u64,
    next_key: i64,
}

impl EngineTable {
    pub fn new(spec: TableSpec) -> Self {
        Self {
            spec,
            rows: BTreeMap::new(),
            next_row_id: 1,
            next_key: 1,
        }
    }

    /// Hand out the next generated integer key. The counter never rewinds,
    /// even when the insert that consumed a key rolls back.
    pub fn generate_key(&mut self) -> Value {
        let key = self.next_key;
        self.next_key += 1;
        Value::Integer(key)
    }

    /// Validate NOT NULL, type, and max-length constraints for a full row.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.spec.columns.len() {
            return Err(OrmError::Execution(format!(
                "row has {} values, table '{}' has {} columns",
                row.len(),
                self.spec.name,
                self.spec.columns.len()
            )));
        }

        for (column, value) in self.spec.columns.iter().zip(row) {
            match value {
                Value::Null => {
                    if !column.nullable {
                        return Err(OrmError::ConstraintViolation(format!(
                            "column '{}' of table '{}' cannot be NULL",
                            column.name, self.spec.name
                        )));
                    }
                }
                other => {
                    if !column.data_type.is_compatible(other) {
                        return Err(OrmError::TypeMismatch(format!(
                            "column '{}' of table '{}' expects {}, got {}",
                            column.name,
                            self.spec.name,
                            column.data_type,
                            other.type_name()
                        )));
                    }
                    if let (Some(limit), Value::Text(text)) = (column.max_length, other) {
                        if text.chars().count() > limit {
                            return Err(OrmError::ConstraintViolation(format!(
                                "value for column '{}' of table '{}' exceeds maximum length {}",
                                column.name, self.spec.name, limit
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Check unique constraints against every stored row, optionally
    /// excluding one row ID (the row being updated).
    pub fn check_unique(&self, row: &Row, exclude: Option<u64>) -> Result<()> {
        for (index, column) in self.spec.columns.iter().enumerate() {
            if !column.unique || row[index] == Value::Null {
                continue;
            }
            for (id, existing) in &self.rows {
                if Some(*id) == exclude {
                    continue;
                }
                if existing[index] == row[index] {
                    return Err(OrmError::ConstraintViolation(format!(
                        "duplicate value for unique column '{}' of table '{}'",
                        column.name, self.spec.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Store a validated row and return its internal row ID.
    pub fn insert_row(&mut self, row: Row) -> u64 {
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.insert(id, row);
        id
    }

    pub fn key_of(&self, row: &Row) -> Value {
        row[self.spec.key_index()].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> EngineTable {
        EngineTable::new(
            TableSpec::new("USERS", "id")
                .generated_key()
                .column(SpecColumn::new("id", DataType::Integer).not_null().unique())
                .column(
                    SpecColumn::new("name", DataType::Text)
                        .not_null()
                        .unique()
                        .max_length(5),
                ),
        )
    }

    #[test]
    fn test_generated_keys_increase_monotonically() {
        let mut table = users();
        assert_eq!(table.generate_key(), Value::Integer(1));
        assert_eq!(table.generate_key(), Value::Integer(2));
    }

    #[test]
    fn test_validate_rejects_null_in_not_null_column() {
        let table = users();
        let err = table.validate_row(&vec![Value::Integer(1), Value::Null]);
        assert!(matches!(err, Err(OrmError::ConstraintViolation(_))));
    }

    #[test]
    fn test_validate_rejects_wrong_type_and_overlong_text() {
        let table = users();
        let err = table.validate_row(&vec![Value::Integer(1), Value::Integer(7)]);
        assert!(matches!(err, Err(OrmError::TypeMismatch(_))));

        let err = table.validate_row(&vec![Value::Integer(1), Value::from("toolong")]);
        assert!(matches!(err, Err(OrmError::ConstraintViolation(_))));
    }

    #[test]
    fn test_unique_check_excludes_the_updated_row() {
        let mut table = users();
        let id = table.insert_row(vec![Value::Integer(1), Value::from("ana")]);

        let dup = vec![Value::Integer(2), Value::from("ana")];
        assert!(matches!(
            table.check_unique(&dup, None),
            Err(OrmError::ConstraintViolation(_))
        ));

        // Re-writing the same row with its own values is fine.
        let same = vec![Value::Integer(1), Value::from("ana")];
        assert!(table.check_unique(&same, Some(id)).is_ok());
    }

    #[test]
    fn test_from_descriptor_marks_key_and_references() {
        use crate::model::{ColumnDef, EntityDescriptor, EntityRegistry};

        let mut registry = EntityRegistry::new();
        registry
            .register(
                EntityDescriptor::builder("User", "USERS")
                    .generated_key("id")
                    .column(ColumnDef::new("name", DataType::Text).not_null())
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                EntityDescriptor::builder("Folder", "FOLDERS")
                    .generated_key("id")
                    .column(ColumnDef::new("owner_id", DataType::Integer).not_null())
                    .has_one("owner", "owner_id", "User")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let model = registry.build().unwrap();

        let spec =
            TableSpec::from_descriptor(model.descriptor("Folder").unwrap(), &model).unwrap();
        assert!(spec.key_generated);
        let key = &spec.columns[spec.key_index()];
        assert!(key.unique && !key.nullable);
        let fk = &spec.columns[spec.column_index("owner_id").unwrap()];
        let reference = fk.references.as_ref().unwrap();
        assert_eq!(reference.table, "USERS");
        assert_eq!(reference.column, "id");
    }
}
