use crate::core::Value;
use std::fmt;

/// Statement classification, carried in diagnostics and conflict reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
            Self::Select => write!(f, "SELECT"),
        }
    }
}

/// A column assignment in an UPDATE.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: String,
    pub value: Value,
}

/// WHERE-clause tree. Values are bound as parameters, never inlined into
/// the SQL text.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq { column: String, value: Value },
    /// SQL LIKE with `%`/`_` wildcards; `\` escapes.
    Like { column: String, pattern: String },
    And(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }
}

/// One ORDER BY key.
#[derive(Debug, Clone)]
pub struct OrderKey {
    pub column: String,
    pub descending: bool,
}

/// An eager-load join: the dependent's FK column against the principal
/// table's key, with the principal's columns appended to the projection.
#[derive(Debug, Clone)]
pub struct Join {
    pub table: String,
    pub fk_column: String,
    pub principal_key: String,
    pub columns: Vec<String>,
}

/// A statement in structured form.
///
/// `to_sql` renders parameterized SQL text with `?` placeholders for a
/// text-based engine; the bundled memory engine interprets the structure
/// directly instead of reparsing the text.
#[derive(Debug, Clone)]
pub enum Statement {
    Insert {
        table: String,
        columns: Vec<String>,
        values: Vec<Value>,
        /// Key column whose generated value the engine must return.
        returning_key: Option<String>,
    },
    Update {
        table: String,
        assignments: Vec<Assignment>,
        predicate: Predicate,
    },
    Delete {
        table: String,
        predicate: Predicate,
    },
    Select {
        table: String,
        columns: Vec<String>,
        join: Option<Join>,
        predicate: Option<Predicate>,
        order_by: Vec<OrderKey>,
        limit: Option<u64>,
        /// Render/evaluate as `SELECT COUNT(*)` instead of a projection.
        count_only: bool,
    },
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Insert { .. } => StatementKind::Insert,
            Self::Update { .. } => StatementKind::Update,
            Self::Delete { .. } => StatementKind::Delete,
            Self::Select { .. } => StatementKind::Select,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Select { table, .. } => table,
        }
    }

    /// Render SQL text plus the positional parameter list.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let text = match self {
            Self::Insert {
                table,
                columns,
                values,
                returning_key,
            } => {
                params.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                let mut text = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    placeholders
                );
                if let Some(key) = returning_key {
                    text.push_str(&format!(" RETURNING {}", key));
                }
                text
            }
            Self::Update {
                table,
                assignments,
                predicate,
            } => {
                let set = assignments
                    .iter()
                    .map(|a| {
                        params.push(a.value.clone());
                        format!("{} = ?", a.column)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "UPDATE {} SET {} WHERE {}",
                    table,
                    set,
                    render_predicate(predicate, &mut params)
                )
            }
            Self::Delete { table, predicate } => {
                format!(
                    "DELETE FROM {} WHERE {}",
                    table,
                    render_predicate(predicate, &mut params)
                )
            }
            Self::Select {
                table,
                columns,
                join,
                predicate,
                order_by,
                limit,
                count_only,
            } => {
                let projection = if *count_only {
                    "COUNT(*)".to_string()
                } else {
                    let mut names: Vec<String> =
                        columns.iter().map(|c| format!("{}.{}", table, c)).collect();
                    if let Some(join) = join {
                        names.extend(join.columns.iter().map(|c| format!("{}.{}", join.table, c)));
                    }
                    names.join(", ")
                };
                let mut text = format!("SELECT {} FROM {}", projection, table);
                if let Some(join) = join {
                    text.push_str(&format!(
                        " JOIN {} ON {}.{} = {}.{}",
                        join.table, table, join.fk_column, join.table, join.principal_key
                    ));
                }
                if let Some(predicate) = predicate {
                    text.push_str(" WHERE ");
                    text.push_str(&render_predicate(predicate, &mut params));
                }
                if !order_by.is_empty() {
                    let keys = order_by
                        .iter()
                        .map(|key| {
                            if key.descending {
                                format!("{} DESC", key.column)
                            } else {
                                key.column.clone()
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    text.push_str(&format!(" ORDER BY {}", keys));
                }
                if let Some(limit) = limit {
                    text.push_str(&format!(" LIMIT {}", limit));
                }
                text
            }
        };
        (text, params)
    }
}

fn render_predicate(predicate: &Predicate, params: &mut Vec<Value>) -> String {
    match predicate {
        Predicate::Eq { column, value } => {
            params.push(value.clone());
            format!("{} = ?", column)
        }
        Predicate::Like { column, pattern } => {
            params.push(Value::Text(pattern.clone()));
            format!("{} LIKE ?", column)
        }
        Predicate::And(left, right) => format!(
            "{} AND {}",
            render_predicate(left, params),
            render_predicate(right, params)
        ),
    }
}
