use crate::core::Value;

/// The supported filter-expression subset.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Scalar column equals a value.
    Eq(String, Value),
    /// Text column contains a substring.
    Contains(String, String),
    And(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }
}

/// `column = value` filter.
pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Eq(column.into(), value.into())
}

/// `column` contains `needle` as a substring.
pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Expr {
    Expr::Contains(column.into(), needle.into())
}
