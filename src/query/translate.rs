use super::Expr;
use crate::core::{DataType, OrmError, Result};
use crate::model::{EntityDescriptor, Model};
use crate::sql::{Join, OrderKey, Predicate, Statement};
use std::sync::Arc;

/// A query in entity terms, before translation to SQL.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub entity: String,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub take: Option<u64>,
    /// Relation name to eager-load through a join.
    pub include: Option<String>,
}

/// How the query will be consumed; drives LIMIT and tie-break decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    All,
    First,
    Single,
    Count,
}

/// Result of translation: the SELECT plus, for eager loads, how to split
/// each joined result row between dependent and principal columns.
pub struct TranslatedQuery {
    pub statement: Statement,
    pub include: Option<IncludePlan>,
}

pub struct IncludePlan {
    pub principal: Arc<EntityDescriptor>,
    /// Number of leading columns belonging to the dependent entity.
    pub split: usize,
}

/// Translate a [`QuerySpec`] into a parameterized SELECT.
///
/// Shapes outside the supported subset fail with `UnsupportedQuery` naming
/// the offending construct. A single-result terminal over an ordering that
/// pins no unique column gets the primary key appended as a tie-break, so
/// repeated execution over unchanged data returns the same row.
pub fn translate(model: &Model, spec: &QuerySpec, terminal: Terminal) -> Result<TranslatedQuery> {
    let descriptor = model.descriptor(&spec.entity)?;

    if spec.take == Some(0) {
        return Err(OrmError::UnsupportedQuery(
            "take(0) is not supported".to_string(),
        ));
    }

    if terminal == Terminal::Count {
        if spec.include.is_some() {
            return Err(OrmError::UnsupportedQuery(
                "count() combined with include() is not supported".to_string(),
            ));
        }
        if spec.take.is_some() {
            return Err(OrmError::UnsupportedQuery(
                "count() combined with take() is not supported".to_string(),
            ));
        }
    }

    let predicate = spec
        .filter
        .as_ref()
        .map(|expr| translate_expr(descriptor, expr))
        .transpose()?;

    let mut order_by = Vec::with_capacity(spec.order_by.len() + 1);
    for key in &spec.order_by {
        if descriptor.column(&key.column).is_none() {
            return Err(OrmError::UnsupportedQuery(format!(
                "cannot order by unknown column '{}' on entity '{}'",
                key.column, spec.entity
            )));
        }
        order_by.push(key.clone());
    }

    let single_result = matches!(terminal, Terminal::First | Terminal::Single);
    if single_result && !order_by.is_empty() {
        let ordered: Vec<String> = order_by.iter().map(|k| k.column.clone()).collect();
        if !descriptor.orders_uniquely(&ordered) {
            order_by.push(OrderKey {
                column: descriptor.key.clone(),
                descending: false,
            });
        }
    }

    let limit = match terminal {
        Terminal::First => Some(1),
        // Two rows are enough to detect a multiplicity violation.
        Terminal::Single => Some(2),
        Terminal::All | Terminal::Count => spec.take,
    };

    let join = spec
        .include
        .as_deref()
        .map(|name| {
            let relation = descriptor.relation(name).ok_or_else(|| {
                OrmError::UnsupportedQuery(format!(
                    "cannot include unknown relation '{}' on entity '{}'",
                    name, spec.entity
                ))
            })?;
            let principal = model.descriptor(&relation.principal)?;
            Ok::<_, OrmError>((
                Join {
                    table: principal.table.clone(),
                    fk_column: relation.fk_column.clone(),
                    principal_key: principal.key.clone(),
                    columns: principal.columns.iter().map(|c| c.name.clone()).collect(),
                },
                Arc::clone(principal),
            ))
        })
        .transpose()?;

    let (join, include) = match join {
        Some((join, principal)) => (
            Some(join),
            Some(IncludePlan {
                principal,
                split: descriptor.columns.len(),
            }),
        ),
        None => (None, None),
    };

    let statement = Statement::Select {
        table: descriptor.table.clone(),
        columns: descriptor.columns.iter().map(|c| c.name.clone()).collect(),
        join,
        predicate,
        order_by,
        limit,
        count_only: terminal == Terminal::Count,
    };

    Ok(TranslatedQuery { statement, include })
}

fn translate_expr(descriptor: &EntityDescriptor, expr: &Expr) -> Result<Predicate> {
    match expr {
        Expr::Eq(column, value) => {
            let def = descriptor.column(column).ok_or_else(|| {
                OrmError::UnsupportedQuery(format!(
                    "cannot filter by unknown column '{}' on entity '{}'",
                    column, descriptor.name
                ))
            })?;
            def.check_type(value)?;
            Ok(Predicate::Eq {
                column: column.clone(),
                value: value.clone(),
            })
        }
        Expr::Contains(column, needle) => {
            let def = descriptor.column(column).ok_or_else(|| {
                OrmError::UnsupportedQuery(format!(
                    "cannot filter by unknown column '{}' on entity '{}'",
                    column, descriptor.name
                ))
            })?;
            if def.data_type != DataType::Text {
                return Err(OrmError::UnsupportedQuery(format!(
                    "contains() over non-text column '{}' ({})",
                    column, def.data_type
                )));
            }
            Ok(Predicate::Like {
                column: column.clone(),
                pattern: format!("%{}%", escape_like(needle)),
            })
        }
        Expr::And(left, right) => Ok(translate_expr(descriptor, left)?
            .and(translate_expr(descriptor, right)?)),
    }
}

/// Escape LIKE wildcards in a literal substring.
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, EntityRegistry};
    use crate::query::{contains, eq};

    fn model() -> Arc<Model> {
        let mut registry = EntityRegistry::new();
        registry
            .register(
                EntityDescriptor::builder("User", "USERS")
                    .generated_key("id")
                    .column(ColumnDef::new("name", DataType::Text).not_null().unique())
                    .column(ColumnDef::new("long_description", DataType::Text))
                    .column(ColumnDef::new("age", DataType::Integer))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                EntityDescriptor::builder("Folder", "FOLDERS")
                    .generated_key("id")
                    .column(ColumnDef::new("name", DataType::Text).not_null())
                    .column(ColumnDef::new("owner_id", DataType::Integer).not_null())
                    .has_one("owner", "owner_id", "User")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.build().unwrap()
    }

    fn spec(entity: &str) -> QuerySpec {
        QuerySpec {
            entity: entity.to_string(),
            ..QuerySpec::default()
        }
    }

    #[test]
    fn test_equality_filter_translates_to_parameter() {
        let model = model();
        let mut q = spec("User");
        q.filter = Some(eq("name", "test"));
        let translated = translate(&model, &q, Terminal::All).unwrap();
        let (sql, params) = translated.statement.to_sql();
        assert!(sql.ends_with("WHERE name = ?"));
        assert_eq!(params, vec!["test".into()]);
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let model = model();
        let mut q = spec("User");
        q.filter = Some(contains("name", "50%_off"));
        let translated = translate(&model, &q, Terminal::All).unwrap();
        let (_, params) = translated.statement.to_sql();
        assert_eq!(params, vec![r"%50\%\_off%".into()]);
    }

    #[test]
    fn test_contains_on_non_text_column_unsupported() {
        let model = model();
        let mut q = spec("User");
        q.filter = Some(contains("age", "4"));
        let err = translate(&model, &q, Terminal::All);
        match err {
            Err(OrmError::UnsupportedQuery(msg)) => assert!(msg.contains("age")),
            other => panic!("expected UnsupportedQuery, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_column_is_named() {
        let model = model();
        let mut q = spec("User");
        q.order_by.push(OrderKey {
            column: "ghost".into(),
            descending: false,
        });
        match translate(&model, &q, Terminal::All) {
            Err(OrmError::UnsupportedQuery(msg)) => assert!(msg.contains("'ghost'")),
            other => panic!("expected UnsupportedQuery, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_first_over_non_unique_order_appends_key_tie_break() {
        let model = model();
        let mut q = spec("User");
        q.order_by.push(OrderKey {
            column: "long_description".into(),
            descending: false,
        });
        let translated = translate(&model, &q, Terminal::First).unwrap();
        let (sql, _) = translated.statement.to_sql();
        assert!(sql.contains("ORDER BY long_description, id LIMIT 1"));
    }

    #[test]
    fn test_unique_order_gets_no_tie_break() {
        let model = model();
        let mut q = spec("User");
        q.order_by.push(OrderKey {
            column: "name".into(),
            descending: false,
        });
        let translated = translate(&model, &q, Terminal::First).unwrap();
        let (sql, _) = translated.statement.to_sql();
        assert!(sql.contains("ORDER BY name LIMIT 1"));
    }

    #[test]
    fn test_take_zero_is_unsupported() {
        let model = model();
        let mut q = spec("User");
        q.take = Some(0);
        match translate(&model, &q, Terminal::All) {
            Err(OrmError::UnsupportedQuery(msg)) => assert!(msg.contains("take(0)")),
            other => panic!("expected UnsupportedQuery, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_all_terminal_keeps_take() {
        let model = model();
        let mut q = spec("User");
        q.take = Some(2);
        let translated = translate(&model, &q, Terminal::All).unwrap();
        let (sql, _) = translated.statement.to_sql();
        assert!(sql.ends_with("LIMIT 2"));
    }

    #[test]
    fn test_include_translates_to_join() {
        let model = model();
        let mut q = spec("Folder");
        q.include = Some("owner".into());
        let translated = translate(&model, &q, Terminal::All).unwrap();
        let include = translated.include.expect("include plan");
        assert_eq!(include.principal.name, "User");
        assert_eq!(include.split, 3);
        let (sql, _) = translated.statement.to_sql();
        assert!(sql.contains("JOIN USERS ON FOLDERS.owner_id = USERS.id"));
    }

    #[test]
    fn test_unknown_relation_unsupported() {
        let model = model();
        let mut q = spec("Folder");
        q.include = Some("ghost".into());
        assert!(matches!(
            translate(&model, &q, Terminal::All),
            Err(OrmError::UnsupportedQuery(_))
        ));
    }

    #[test]
    fn test_count_with_take_unsupported() {
        let model = model();
        let mut q = spec("User");
        q.take = Some(3);
        assert!(matches!(
            translate(&model, &q, Terminal::Count),
            Err(OrmError::UnsupportedQuery(_))
        ));
    }
}
