mod builder;
mod statement;

pub use builder::{CommitStep, StatementBuilder};
pub use statement::{Assignment, Join, OrderKey, Predicate, Statement, StatementKind};
