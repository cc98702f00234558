//! Bulk UPDATE and DELETE planning.
//!
//! A statement touching one table with a predicate local to that table is
//! emitted directly. Anything else selects the affected identifiers first
//! and then runs one statement per table restricted to them, so deleting a
//! secondary row never changes which primary rows the predicate matches.

use std::collections::BTreeSet;

use crate::oql::Parameter;
use crate::resolve::{
    AssignmentTarget, ResolvedDelete, ResolvedExpr, ResolvedQuery, ResolvedSelect,
    ResolvedSelection, ResolvedUpdate, SourceTarget,
};
use crate::sql::{self, Delete, Dialect, Expr, ExprExt, Insert, Update};

use super::context::{Context, Scope};
use super::{SqlStatement, TranslateError};

#[derive(Debug, Clone, PartialEq)]
pub enum MutationPlan {
    Direct(SqlStatement),
    Restricted {
        /// Selects the identifiers of every affected entity.
        id_query: SqlStatement,
        /// In execution order.
        statements: Vec<TableMutation>,
    },
}

/// One per-table statement of a restricted plan.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMutation {
    pub table: String,
    pub key_column: String,
    pub kind: TableMutationKind,
    /// Parameters of the assignment values; identifier placeholders follow.
    pub bindings: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableMutationKind {
    Update {
        assignments: Vec<(String, Expr)>,
        /// Optional secondary table: identifiers without a row get one.
        insert_missing: bool,
    },
    Delete,
}

impl TableMutation {
    /// SQL restricted to `ids` identifiers bound after [`Self::bindings`].
    pub fn render(&self, dialect: Dialect, ids: usize) -> String {
        let first = self.bindings.len() + 1;
        let filter = sql::table_col(&self.table, &self.key_column)
            .in_list((first..first + ids).map(sql::param).collect());
        match &self.kind {
            TableMutationKind::Update { assignments, .. } => {
                let mut update = Update::table(&self.table);
                for (column, value) in assignments {
                    update = update.set(column, value.clone());
                }
                update.filter(filter).to_sql(dialect)
            }
            TableMutationKind::Delete => Delete::from(&self.table).filter(filter).to_sql(dialect),
        }
    }

    /// INSERT creating the row of one identifier that had none, bound after
    /// [`Self::bindings`].
    pub fn render_insert(&self, dialect: Dialect) -> Option<String> {
        let TableMutationKind::Update {
            assignments,
            insert_missing: true,
        } = &self.kind
        else {
            return None;
        };
        let columns = assignments
            .iter()
            .map(|(column, _)| column.clone())
            .chain(std::iter::once(self.key_column.clone()));
        let values = assignments
            .iter()
            .map(|(_, value)| value.clone())
            .chain(std::iter::once(sql::param(self.bindings.len() + 1)));
        Some(
            Insert::into(&self.table)
                .columns(columns)
                .values(values)
                .to_sql(dialect),
        )
    }
}

pub(super) fn plan_update(
    query: &ResolvedQuery,
    update: &ResolvedUpdate,
    dialect: Dialect,
) -> Result<MutationPlan, TranslateError> {
    let entity = match &query.sources[0].target {
        SourceTarget::Table(table) => return direct_pass_through_update(query, update, table, dialect),
        SourceTarget::Entity(entity) => entity,
    };

    let mut assigned: Vec<(usize, String, &ResolvedExpr)> = Vec::new();
    for assignment in &update.assignments {
        let (table, column) = match &assignment.target {
            AssignmentTarget::Attribute(index) => {
                let attribute = &entity.attributes[*index];
                (attribute.table, attribute.column.clone())
            }
            AssignmentTarget::ForeignKey(index) => {
                let association = &entity.associations[*index];
                let (column, table) = association.fk_column().ok_or_else(|| {
                    TranslateError::Unsupported(format!("assignment to {}", association.name))
                })?;
                (table, column.to_string())
            }
            AssignmentTarget::Column(column) => (entity.root_table_index(), column.clone()),
        };
        assigned.push((table, column, &assignment.value));
    }
    let tables: BTreeSet<usize> = assigned.iter().map(|(t, _, _)| *t).collect();

    let direct = single_table(query, &tables, update.where_clause.as_ref())
        .filter(|&table| !entity.tables[table].is_optional());
    if let Some(table) = direct {
        let mut ctx = Context::new(query, dialect, Scope::Table(table));
        let mut statement = Update::table(&entity.tables[table].name);
        for (_, column, value) in &assigned {
            statement = statement.set(column, ctx.expr(value)?);
        }
        if let Some(filter) = &update.where_clause {
            statement = statement.filter(ctx.expr(filter)?);
        }
        return Ok(MutationPlan::Direct(SqlStatement {
            sql: statement.to_sql(dialect),
            bindings: ctx.bindings,
        }));
    }

    let id_query = id_query(query, update.where_clause.as_ref(), dialect)?;
    let mut statements = Vec::with_capacity(tables.len());
    for table in tables {
        let mut ctx = Context::new(query, dialect, Scope::Table(table));
        let mut assignments = Vec::new();
        let mut constant = true;
        for (_, column, value) in assigned.iter().filter(|(t, _, _)| *t == table) {
            constant &= !reads_columns(value);
            assignments.push((column.clone(), ctx.expr(value)?));
        }
        statements.push(TableMutation {
            table: entity.tables[table].name.clone(),
            key_column: entity.tables[table].key_column.clone(),
            kind: TableMutationKind::Update {
                assignments,
                insert_missing: constant && entity.tables[table].is_optional(),
            },
            bindings: ctx.bindings,
        });
    }
    Ok(MutationPlan::Restricted {
        id_query,
        statements,
    })
}

pub(super) fn plan_delete(
    query: &ResolvedQuery,
    delete: &ResolvedDelete,
    dialect: Dialect,
) -> Result<MutationPlan, TranslateError> {
    let entity = match &query.sources[0].target {
        SourceTarget::Table(table) => {
            let mut ctx = Context::new(query, dialect, Scope::Table(0));
            let mut statement = Delete::from(table);
            if let Some(filter) = &delete.where_clause {
                statement = statement.filter(ctx.expr(filter)?);
            }
            return Ok(MutationPlan::Direct(SqlStatement {
                sql: statement.to_sql(dialect),
                bindings: ctx.bindings,
            }));
        }
        SourceTarget::Entity(entity) => entity,
    };

    let tables: BTreeSet<usize> = (0..entity.tables.len()).collect();
    if let Some(table) = single_table(query, &tables, delete.where_clause.as_ref()) {
        let mut ctx = Context::new(query, dialect, Scope::Table(table));
        let mut statement = Delete::from(&entity.tables[table].name);
        if let Some(filter) = &delete.where_clause {
            statement = statement.filter(ctx.expr(filter)?);
        }
        return Ok(MutationPlan::Direct(SqlStatement {
            sql: statement.to_sql(dialect),
            bindings: ctx.bindings,
        }));
    }

    // Secondary and subclass rows first; the root table goes last.
    let statements = entity
        .tables
        .iter()
        .rev()
        .map(|table| TableMutation {
            table: table.name.clone(),
            key_column: table.key_column.clone(),
            kind: TableMutationKind::Delete,
            bindings: Vec::new(),
        })
        .collect();
    Ok(MutationPlan::Restricted {
        id_query: id_query(query, delete.where_clause.as_ref(), dialect)?,
        statements,
    })
}

/// The only table a statement touches, when its predicate stays there too.
fn single_table(
    query: &ResolvedQuery,
    tables: &BTreeSet<usize>,
    filter: Option<&ResolvedExpr>,
) -> Option<usize> {
    if query.sources.len() != 1 || tables.len() != 1 {
        return None;
    }
    let table = *tables.first()?;
    let entity = query.sources[0].target.entity()?;

    let mut local = true;
    if let Some(filter) = filter {
        filter.walk(&mut |e| match e {
            ResolvedExpr::Attribute { attribute, .. } => {
                local &= entity.attributes[*attribute].table == table;
            }
            ResolvedExpr::ForeignKey { association, .. } => {
                local &= entity.associations[*association]
                    .fk_column()
                    .is_some_and(|(_, t)| t == table);
            }
            _ => {}
        });
    }
    local.then_some(table)
}

fn reads_columns(expr: &ResolvedExpr) -> bool {
    let mut reads = false;
    expr.walk(&mut |e| {
        reads |= matches!(
            e,
            ResolvedExpr::Attribute { .. }
                | ResolvedExpr::ForeignKey { .. }
                | ResolvedExpr::Identifier { .. }
                | ResolvedExpr::Entity { .. }
                | ResolvedExpr::Column { .. }
        );
    });
    reads
}

fn id_query(
    query: &ResolvedQuery,
    filter: Option<&ResolvedExpr>,
    dialect: Dialect,
) -> Result<SqlStatement, TranslateError> {
    let select = ResolvedSelect {
        distinct: query.sources.len() > 1,
        selections: vec![ResolvedSelection {
            expr: ResolvedExpr::Identifier { source: 0 },
            alias: None,
        }],
        where_clause: filter.cloned(),
        group_by: Vec::new(),
        having: None,
        order_by: Vec::new(),
        limit: None,
        offset: None,
    };
    Ok(super::select::plan_select(query, &select, dialect)?.statement)
}

fn direct_pass_through_update(
    query: &ResolvedQuery,
    update: &ResolvedUpdate,
    table: &str,
    dialect: Dialect,
) -> Result<MutationPlan, TranslateError> {
    let mut ctx = Context::new(query, dialect, Scope::Table(0));
    let mut statement = Update::table(table);
    for assignment in &update.assignments {
        let AssignmentTarget::Column(column) = &assignment.target else {
            return Err(TranslateError::Unsupported(format!(
                "entity assignment on pass-through table {table}"
            )));
        };
        statement = statement.set(column, ctx.expr(&assignment.value)?);
    }
    if let Some(filter) = &update.where_clause {
        statement = statement.filter(ctx.expr(filter)?);
    }
    Ok(MutationPlan::Direct(SqlStatement {
        sql: statement.to_sql(dialect),
        bindings: ctx.bindings,
    }))
}
