// ============================================================================
// Fluent query surface
// ============================================================================

use std::sync::Arc;

use super::Session;
use crate::core::{OrmError, Result, Value};
use crate::query::{eq, translate, Expr, QuerySpec, Terminal, TranslatedQuery};
use crate::sql::OrderKey;
use crate::tracker::EntityId;

/// Builds and runs a query over one entity type. Loaded rows are tracked
/// by the owning session; a row whose key is already tracked keeps its
/// in-session values.
pub struct QueryBuilder<'a> {
    session: &'a mut Session,
    spec: QuerySpec,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(session: &'a mut Session, entity: &str) -> Self {
        Self {
            session,
            spec: QuerySpec {
                entity: entity.to_string(),
                ..QuerySpec::default()
            },
        }
    }

    /// Add a filter; multiple calls combine with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.spec.filter = Some(match self.spec.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.spec.order_by.push(OrderKey {
            column: column.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.spec.order_by.push(OrderKey {
            column: column.into(),
            descending: true,
        });
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.spec.take = Some(count);
        self
    }

    /// Eager-load a many-to-one relation alongside each result.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.spec.include = Some(relation.into());
        self
    }

    /// Project a single column, for scalar lookups.
    pub fn select(self, column: impl Into<String>) -> ProjectedQuery<'a> {
        ProjectedQuery {
            session: self.session,
            spec: self.spec,
            column: column.into(),
        }
    }

    /// Run the query and track every result.
    pub async fn all(self) -> Result<Vec<EntityId>> {
        run(self.session, self.spec, Terminal::All).await
    }

    /// First result under the query's ordering, or `None`. With an
    /// ordering that pins no unique column the primary key breaks ties,
    /// so repeated calls over unchanged data agree.
    pub async fn first(self) -> Result<Option<EntityId>> {
        let mut ids = run(self.session, self.spec, Terminal::First).await?;
        Ok(ids.drain(..).next())
    }

    /// The only result, `None` when empty; more than one row is an error.
    pub async fn single_or_default(self) -> Result<Option<EntityId>> {
        let entity = self.spec.entity.clone();
        let mut ids = run(self.session, self.spec, Terminal::Single).await?;
        if ids.len() > 1 {
            return Err(OrmError::Execution(format!(
                "query over '{}' matched more than one row",
                entity
            )));
        }
        Ok(ids.drain(..).next())
    }

    /// Number of matching rows, evaluated by the engine.
    pub async fn count(self) -> Result<u64> {
        let translated = translate(self.session.model(), &self.spec, Terminal::Count)?;
        let rows = self.session.issue_query(&translated.statement).await?;
        match rows.first().and_then(|row| row.first()) {
            Some(Value::Integer(count)) => Ok(*count as u64),
            _ => Err(OrmError::Execution(
                "engine returned no count row".to_string(),
            )),
        }
    }
}

/// A query reduced to one projected column.
pub struct ProjectedQuery<'a> {
    session: &'a mut Session,
    spec: QuerySpec,
    column: String,
}

impl ProjectedQuery<'_> {
    /// Whether any matching row's projected value equals `value`.
    /// Evaluated as a filtered count, entirely on the engine.
    pub async fn contains(self, value: impl Into<Value>) -> Result<bool> {
        let mut spec = self.spec;
        let filter = eq(self.column, value);
        spec.filter = Some(match spec.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        let translated = translate(self.session.model(), &spec, Terminal::Count)?;
        let rows = self.session.issue_query(&translated.statement).await?;
        match rows.first().and_then(|row| row.first()) {
            Some(Value::Integer(count)) => Ok(*count > 0),
            _ => Err(OrmError::Execution(
                "engine returned no count row".to_string(),
            )),
        }
    }

    /// All projected values, in query order.
    pub async fn all(self) -> Result<Vec<Value>> {
        let descriptor = Arc::clone(self.session.model().descriptor(&self.spec.entity)?);
        let index = descriptor.column_index(&self.column).ok_or_else(|| {
            OrmError::UnsupportedQuery(format!(
                "cannot select unknown column '{}' on entity '{}'",
                self.column, self.spec.entity
            ))
        })?;
        let translated = translate(self.session.model(), &self.spec, Terminal::All)?;
        let rows = self.session.issue_query(&translated.statement).await?;
        Ok(rows.into_iter().map(|mut row| row.swap_remove(index)).collect())
    }
}

/// Execute a translated query and track the loaded rows, splitting joined
/// projections between the dependent and its eager-loaded principal.
async fn run(session: &mut Session, spec: QuerySpec, terminal: Terminal) -> Result<Vec<EntityId>> {
    let descriptor = Arc::clone(session.model().descriptor(&spec.entity)?);
    let TranslatedQuery { statement, include } = translate(session.model(), &spec, terminal)?;
    let rows = session.issue_query(&statement).await?;

    let mut ids = Vec::with_capacity(rows.len());
    for mut row in rows {
        if let Some(plan) = &include {
            let principal_row = row.split_off(plan.split);
            session
                .tracker_mut()
                .track_loaded(Arc::clone(&plan.principal), principal_row);
        }
        ids.push(session.tracker_mut().track_loaded(Arc::clone(&descriptor), row));
    }
    Ok(ids)
}
