//! Object and native queries bound to a session.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{hydrate, native_row_mapping, native_scalar, Row, Value};
use crate::metamodel::{Metamodel, ResolvedResultMapping};
use crate::oql::Parameter;
use crate::sql::{self, ExprExt, SelectExpr, TableRef};
use crate::translate::{EntityRowMapping, MutationPlan, TableMutation, Translation};

use super::{Entity, IdentityMap, Session, SessionError, Status};

/// One result row: a single entity or value, or a tuple when the query
/// selects several items.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Entity(Entity),
    Value(Value),
    Tuple(Vec<ResultValue>),
}

impl ResultValue {
    pub(super) fn from_items(mut items: Vec<ResultValue>) -> Self {
        if items.len() == 1 {
            if let Some(item) = items.pop() {
                return item;
            }
        }
        ResultValue::Tuple(items)
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            ResultValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn into_entity(self) -> Option<Entity> {
        match self {
            ResultValue::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ResultValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[ResultValue]> {
        match self {
            ResultValue::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

/// Values bound to the parameters of an object query.
#[derive(Debug, Default)]
struct Bindings {
    named: HashMap<String, Value>,
    positional: HashMap<u32, Value>,
}

impl Bindings {
    fn value(&self, parameter: &Parameter) -> Result<Value, SessionError> {
        let value = match parameter {
            Parameter::Named(name) => self.named.get(name),
            Parameter::Positional(index) | Parameter::Anonymous(index) => {
                self.positional.get(index)
            }
        };
        value
            .cloned()
            .ok_or_else(|| SessionError::UnboundParameter(parameter.to_string()))
    }

    fn values(&self, parameters: &[Parameter]) -> Result<Vec<Value>, SessionError> {
        parameters.iter().map(|p| self.value(p)).collect()
    }
}

/// An object query being bound.
///
/// ```ignore
/// let rows = session
///     .create_query("from Employee e where e.name = :name")
///     .bind("name", "Ada")
///     .list()?;
/// ```
#[derive(Debug)]
pub struct Query<'s> {
    session: &'s mut Session,
    text: String,
    bindings: Bindings,
}

impl<'s> Query<'s> {
    pub(super) fn new(session: &'s mut Session, text: &str) -> Self {
        Self {
            session,
            text: text.to_string(),
            bindings: Bindings::default(),
        }
    }

    /// Bind `:name`.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings.named.insert(name.to_string(), value.into());
        self
    }

    /// Bind `?n`, or the n-th bare `?` (1-based).
    pub fn bind_at(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.bindings.positional.insert(position, value.into());
        self
    }

    /// Run a select. A query over an ambiguous root returns the rows of
    /// every concrete query in turn.
    pub fn list(self) -> Result<Vec<ResultValue>, SessionError> {
        let Query {
            session,
            text,
            bindings,
        } = self;
        session.check_open()?;
        let plans = session.factory.plans(&text)?;
        let mut results = Vec::new();
        for plan in plans.iter() {
            let Translation::Select(select) = &plan.translation else {
                return Err(SessionError::NotASelect(text));
            };
            let params = bindings.values(&select.statement.bindings)?;
            results.extend(session.run_select(select, params)?);
        }
        Ok(results)
    }

    /// The single result, `None` when there is none.
    pub fn unique_result(self) -> Result<Option<ResultValue>, SessionError> {
        let mut results = self.list()?;
        match results.len() {
            0 | 1 => Ok(results.pop()),
            n => Err(SessionError::NonUniqueResult(n)),
        }
    }

    /// Run a bulk update or delete and return the number of entities it
    /// matched. Managed instances are not refreshed; the second-level
    /// cache is cleared.
    pub fn execute_update(self) -> Result<u64, SessionError> {
        let Query {
            session,
            text,
            bindings,
        } = self;
        session.check_open()?;
        let plans = session.factory.plans(&text)?;
        let mutations = plans
            .iter()
            .map(|plan| match &plan.translation {
                Translation::Mutation(mutation) => Ok(mutation),
                Translation::Select(_) => Err(SessionError::NotAMutation(text.clone())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let owns_transaction = !session.connection.in_transaction();
        if owns_transaction {
            session.connection.begin()?;
        }
        let outcome = mutations.iter().try_fold(0u64, |total, mutation| {
            Ok::<_, SessionError>(total + execute_mutation(session, mutation, &bindings)?)
        });
        match outcome {
            Ok(affected) => {
                if owns_transaction {
                    session.connection.commit()?;
                }
                if let Some(second_level) = session.factory.second_level_cache() {
                    second_level.clear();
                }
                debug!(session = %session.id, query = %text, affected, "bulk statement executed");
                Ok(affected)
            }
            Err(error) => {
                if owns_transaction {
                    if let Err(rollback) = session.connection.rollback() {
                        warn!(session = %session.id, error = %rollback, "rollback after failed bulk statement failed");
                    }
                }
                Err(error)
            }
        }
    }
}

fn execute_mutation(
    session: &mut Session,
    plan: &MutationPlan,
    bindings: &Bindings,
) -> Result<u64, SessionError> {
    let dialect = session.connection.dialect();
    match plan {
        MutationPlan::Direct(statement) => {
            let params = bindings.values(&statement.bindings)?;
            debug!(session = %session.id, sql = %statement.sql, "bulk write");
            Ok(session.connection.execute(&statement.sql, &params)?)
        }
        MutationPlan::Restricted {
            id_query,
            statements,
        } => {
            let params = bindings.values(&id_query.bindings)?;
            let ids: Vec<Value> = session
                .connection
                .query(&id_query.sql, &params)?
                .filter_map(|row| row.into_values().into_iter().next())
                .collect();
            debug!(session = %session.id, sql = %id_query.sql, ids = ids.len(), "selected affected identifiers");
            if ids.is_empty() {
                return Ok(0);
            }

            for statement in statements {
                let base = bindings.values(&statement.bindings)?;
                let insert = statement.render_insert(dialect);
                let missing = match insert {
                    Some(_) => missing_rows(session, statement, &ids)?,
                    None => Vec::new(),
                };
                let existing: Vec<Value> = ids
                    .iter()
                    .filter(|id| !missing.contains(*id))
                    .cloned()
                    .collect();
                if !existing.is_empty() {
                    let sql = statement.render(dialect, existing.len());
                    let params: Vec<Value> = base.iter().cloned().chain(existing).collect();
                    debug!(session = %session.id, %sql, "bulk write");
                    session.connection.execute(&sql, &params)?;
                }
                if let Some(insert) = insert {
                    for id in missing {
                        let params: Vec<Value> =
                            base.iter().cloned().chain(std::iter::once(id)).collect();
                        debug!(session = %session.id, sql = %insert, "bulk insert of missing row");
                        session.connection.execute(&insert, &params)?;
                    }
                }
            }
            Ok(ids.len() as u64)
        }
    }
}

/// Identifiers in `ids` without a row in the statement's table.
fn missing_rows(
    session: &mut Session,
    statement: &TableMutation,
    ids: &[Value],
) -> Result<Vec<Value>, SessionError> {
    let key = sql::table_col(&statement.table, &statement.key_column);
    let lookup = sql::Query::new()
        .select(vec![SelectExpr::new(key.clone())])
        .from(TableRef::new(&statement.table))
        .filter(key.in_list((1..=ids.len()).map(sql::param).collect()))
        .to_sql(session.connection.dialect());
    let present: Vec<Value> = session
        .connection
        .query(&lookup, ids)?
        .filter_map(|row| row.into_values().into_iter().next())
        .collect();
    Ok(ids
        .iter()
        .filter(|id| !present.contains(*id))
        .cloned()
        .collect())
}

/// A native SQL query. Placeholders are bound in order; with a named
/// result-set mapping, rows are hydrated into entities.
///
/// ```ignore
/// let rows = session
///     .native_query("select id, name from tabEmployees where id = ?")
///     .bind(1)
///     .with_mapping("employee")
///     .list()?;
/// ```
#[derive(Debug)]
pub struct NativeQuery<'s> {
    session: &'s mut Session,
    sql: String,
    params: Vec<Value>,
    mapping: Option<String>,
}

impl<'s> NativeQuery<'s> {
    pub(super) fn new(session: &'s mut Session, sql: &str) -> Self {
        Self {
            session,
            sql: sql.to_string(),
            params: Vec::new(),
            mapping: None,
        }
    }

    /// Bind the next placeholder.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Bind placeholder `position` (1-based); gaps are bound to null.
    pub fn bind_at(mut self, position: usize, value: impl Into<Value>) -> Self {
        let index = position.max(1) - 1;
        if self.params.len() <= index {
            self.params.resize(index + 1, Value::Null);
        }
        self.params[index] = value.into();
        self
    }

    /// Hydrate rows through the named result-set mapping.
    pub fn with_mapping(mut self, name: &str) -> Self {
        self.mapping = Some(name.to_string());
        self
    }

    pub fn list(self) -> Result<Vec<ResultValue>, SessionError> {
        let NativeQuery {
            session,
            sql,
            params,
            mapping,
        } = self;
        session.check_open()?;
        let metamodel = Arc::clone(session.factory.metamodel());
        let resolved = mapping
            .as_deref()
            .map(|name| session.factory.result_mappings().resolve(name, &metamodel))
            .transpose()?;

        let Some(resolved) = resolved else {
            let rows = session.connection.query(&sql, &params)?;
            debug!(session = %session.id, %sql, rows = rows.len(), "native query");
            return Ok(rows
                .map(|row| {
                    ResultValue::from_items(
                        row.into_values().into_iter().map(ResultValue::Value).collect(),
                    )
                })
                .collect());
        };

        let mut mappings = None;
        let mut results = Vec::new();
        let mut fresh = Vec::new();
        let mut failure = None;
        let identity = &mut session.identity;
        let visited = session.connection.stream(&sql, &params, &mut |row: Row| {
            match native_row(&row, &resolved, &mut mappings, &metamodel, identity, &mut fresh) {
                Ok(Some(value)) => {
                    results.push(value);
                    ControlFlow::Continue(())
                }
                Ok(None) => ControlFlow::Continue(()),
                Err(error) => {
                    failure = Some(error);
                    ControlFlow::Break(())
                }
            }
        })?;
        if let Some(error) = failure {
            return Err(error);
        }
        debug!(session = %session.id, %sql, rows = visited, "native query");
        session.resolve_eager(&fresh)?;
        Ok(results)
    }

    /// Run a statement that returns no rows.
    pub fn execute(self) -> Result<u64, SessionError> {
        self.session.check_open()?;
        debug!(session = %self.session.id, sql = %self.sql, "native statement");
        Ok(self.session.connection.execute(&self.sql, &self.params)?)
    }
}

/// Hydrate one native row through a result-set mapping. Column positions
/// are bound on the first row. `None` when the row's instance was removed.
fn native_row(
    row: &Row,
    resolved: &ResolvedResultMapping,
    mappings: &mut Option<Vec<Option<EntityRowMapping>>>,
    metamodel: &Metamodel,
    identity: &mut IdentityMap,
    fresh: &mut Vec<Entity>,
) -> Result<Option<ResultValue>, SessionError> {
    if mappings.is_none() {
        let bound = resolved
            .items
            .iter()
            .map(|item| native_row_mapping(item, row.columns()))
            .collect::<Result<Vec<_>, _>>()?;
        *mappings = Some(bound);
    }
    let bound = mappings.as_deref().unwrap_or_default();

    let mut values = Vec::with_capacity(resolved.items.len());
    for (item, mapping) in resolved.items.iter().zip(bound) {
        let value = match mapping {
            Some(mapping) => match hydrate(row, mapping, metamodel, identity)? {
                Some(hydrated) if hydrated.entity.status() == Status::Deleted => return Ok(None),
                Some(hydrated) => {
                    if hydrated.fresh {
                        fresh.push(hydrated.entity.clone());
                    }
                    ResultValue::Entity(hydrated.entity)
                }
                None => ResultValue::Value(Value::Null),
            },
            None => ResultValue::Value(native_scalar(row, item)?.unwrap_or_default()),
        };
        values.push(value);
    }
    Ok(Some(ResultValue::from_items(values)))
}
