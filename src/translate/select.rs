//! SELECT planning: column lists, automatic table joins and row mappings.

use crate::metamodel::{AssociationKind, FetchMode};
use crate::oql::JoinKind;
use crate::resolve::{ResolvedExpr, ResolvedQuery, ResolvedSelect, SourceJoin, SourceTarget};
use crate::sql::{
    Dialect, Expr, ExprExt, JoinType, OrderByExpr, Query, SelectExpr, SortDir, TableRef,
};

use super::context::{Context, Scope};
use super::mapping::{EntityRowMapping, FetchedAssociation, ResultItem};
use super::{SelectPlan, SqlStatement, TranslateError};

pub(super) fn plan_select(
    query: &ResolvedQuery,
    select: &ResolvedSelect,
    dialect: Dialect,
) -> Result<SelectPlan, TranslateError> {
    let mut ctx = Context::new(query, dialect, Scope::Aliased);
    let mut columns: Vec<SelectExpr> = Vec::new();
    let mut items = Vec::with_capacity(select.selections.len());

    for (index, selection) in select.selections.iter().enumerate() {
        match &selection.expr {
            ResolvedExpr::Entity { source } => match &query.sources[*source].target {
                SourceTarget::Entity(_) => {
                    let mapping = entity_columns(&mut ctx, *source, &mut columns)?;
                    items.push(ResultItem::Entity {
                        source: *source,
                        mapping,
                    });
                }
                SourceTarget::Table(_) => {
                    if index + 1 != select.selections.len() {
                        return Err(TranslateError::Unsupported(
                            "a pass-through table selected before other items".into(),
                        ));
                    }
                    items.push(ResultItem::Wildcard {
                        start: columns.len(),
                    });
                    columns.push(SelectExpr::new(Expr::Wildcard {
                        table: Some(ctx.alias(*source, 0).to_string()),
                    }));
                }
            },
            expr => {
                let translated = ctx.expr(expr)?;
                items.push(ResultItem::Scalar {
                    position: columns.len(),
                    alias: selection.alias.clone(),
                });
                columns.push(match &selection.alias {
                    Some(alias) => SelectExpr::new(translated).with_alias(alias),
                    None => SelectExpr::new(translated),
                });
            }
        }
    }

    let fetches = fetched_associations(&mut ctx, &items, &mut columns)?;
    let conditions = join_conditions(&mut ctx)?;

    let mut sql = Query::new().select(columns);
    if select.distinct {
        sql = sql.distinct();
    }
    if let Some(filter) = &select.where_clause {
        sql = sql.filter(ctx.expr(filter)?);
    }
    let group_by = select
        .group_by
        .iter()
        .map(|e| ctx.expr(e))
        .collect::<Result<Vec<_>, _>>()?;
    if !group_by.is_empty() {
        sql = sql.group_by(group_by);
    }
    if let Some(having) = &select.having {
        sql = sql.having(ctx.expr(having)?);
    }
    let order_by = select
        .order_by
        .iter()
        .map(|o| {
            Ok(OrderByExpr::new(
                ctx.expr(&o.expr)?,
                o.descending.then_some(SortDir::Desc),
            ))
        })
        .collect::<Result<Vec<_>, TranslateError>>()?;
    if !order_by.is_empty() {
        sql = sql.order_by(order_by);
    }
    sql = sql.limit_offset(select.limit, select.offset);
    sql = from_clause(&ctx, sql, conditions);

    Ok(SelectPlan {
        statement: SqlStatement {
            sql: sql.to_sql(dialect),
            bindings: ctx.bindings,
        },
        items,
        fetches,
    })
}

/// Identifier, eager attributes, foreign keys and optional-table keys.
fn entity_columns(
    ctx: &mut Context<'_>,
    source: usize,
    columns: &mut Vec<SelectExpr>,
) -> Result<EntityRowMapping, TranslateError> {
    let entity = ctx
        .query
        .sources[source]
        .target
        .entity()
        .cloned()
        .ok_or_else(|| TranslateError::NotAnEntity(source.to_string()))?;

    let mut push = |expr: Expr| {
        columns.push(SelectExpr::new(expr));
        columns.len() - 1
    };

    let id_position = push(ctx.identifier(source)?);
    let mut attributes = Vec::with_capacity(entity.attributes.len());
    for attribute in &entity.attributes {
        attributes.push(match attribute.fetch {
            FetchMode::Eager => Some(push(ctx.column(source, attribute.table, &attribute.column)?)),
            FetchMode::Lazy => None,
        });
    }
    let mut references = Vec::with_capacity(entity.associations.len());
    for association in &entity.associations {
        references.push(match association.fk_column() {
            Some((column, table)) => Some(push(ctx.column(source, table, column)?)),
            None => None,
        });
    }
    let mut table_keys = vec![None; entity.tables.len()];
    for (index, table) in entity.tables.iter().enumerate() {
        if table.is_optional() && ctx.used[source].contains(&index) {
            table_keys[index] = Some(push(ctx.column(source, index, &table.key_column)?));
        }
    }

    Ok(EntityRowMapping {
        entity,
        id_position,
        attributes,
        references,
        table_keys,
    })
}

/// Fetch joins whose owner is hydrated from the same row.
fn fetched_associations(
    ctx: &mut Context<'_>,
    items: &[ResultItem],
    columns: &mut Vec<SelectExpr>,
) -> Result<Vec<FetchedAssociation>, TranslateError> {
    let mut hydrated: Vec<usize> = items
        .iter()
        .filter_map(|item| match item {
            ResultItem::Entity { source, .. } => Some(*source),
            _ => None,
        })
        .collect();

    let query = ctx.query;
    let mut fetches = Vec::new();
    for (source, resolved) in query.sources.iter().enumerate() {
        let Some(SourceJoin::Association {
            parent,
            association,
            fetch: true,
            ..
        }) = &resolved.join
        else {
            continue;
        };
        if !hydrated.contains(parent) {
            continue;
        }
        let mapping = entity_columns(ctx, source, columns)?;
        hydrated.push(source);
        fetches.push(FetchedAssociation {
            source,
            parent: *parent,
            association: *association,
            mapping,
        });
    }
    Ok(fetches)
}

/// ON condition per source; `None` for FROM roots and cross joins.
fn join_conditions(ctx: &mut Context<'_>) -> Result<Vec<Option<Expr>>, TranslateError> {
    let query = ctx.query;
    let mut conditions = Vec::with_capacity(query.sources.len());
    for (source, resolved) in query.sources.iter().enumerate() {
        let condition = match &resolved.join {
            None => None,
            Some(SourceJoin::Root { condition, .. }) => {
                condition.as_ref().map(|c| ctx.expr(c)).transpose()?
            }
            Some(SourceJoin::Association {
                parent,
                association,
                condition,
                ..
            }) => {
                let structural = association_condition(ctx, *parent, *association, source)?;
                match condition {
                    Some(extra) => Some(
                        structural
                            .and(ctx.expr(extra)?.parenthesize_below(3)),
                    ),
                    None => Some(structural),
                }
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn association_condition(
    ctx: &mut Context<'_>,
    parent: usize,
    association: usize,
    child: usize,
) -> Result<Expr, TranslateError> {
    let owner = ctx
        .entity(parent)
        .ok_or_else(|| TranslateError::NotAnEntity(parent.to_string()))?;
    let target = ctx
        .entity(child)
        .ok_or_else(|| TranslateError::NotAnEntity(child.to_string()))?;
    let descriptor = &owner.associations[association];

    match &descriptor.kind {
        AssociationKind::ToOne { column, table } => {
            let key = ctx.identifier(child)?;
            Ok(key.eq(ctx.column(parent, *table, column)?))
        }
        AssociationKind::OneToMany { mapped_by } | AssociationKind::InverseToOne { mapped_by } => {
            let (column, table) = target
                .association(mapped_by)
                .and_then(|(_, a)| a.fk_column())
                .ok_or_else(|| {
                    TranslateError::Unsupported(format!(
                        "{}.{} mapped by {mapped_by}",
                        owner.name, descriptor.name
                    ))
                })?;
            if table != target.root_table_index() {
                return Err(TranslateError::Unsupported(format!(
                    "{}.{} mapped by a secondary-table column",
                    owner.name, descriptor.name
                )));
            }
            let foreign_key = ctx.column(child, table, column)?;
            Ok(foreign_key.eq(ctx.identifier(parent)?))
        }
    }
}

/// FROM and JOIN clauses, sources in declaration order, each source's
/// extra tables right after its first.
fn from_clause(ctx: &Context<'_>, mut sql: Query, conditions: Vec<Option<Expr>>) -> Query {
    for (source, (resolved, condition)) in ctx.query.sources.iter().zip(conditions).enumerate() {
        let outer = match &resolved.join {
            Some(SourceJoin::Association { kind, .. }) | Some(SourceJoin::Root { kind, .. }) => {
                *kind == JoinKind::Left
            }
            None => false,
        };
        let join_type = if outer {
            JoinType::Left
        } else if condition.is_some() {
            JoinType::Inner
        } else {
            JoinType::Cross
        };

        let (first, key_column, tables) = match &resolved.target {
            SourceTarget::Table(table) => {
                let mut table_ref = TableRef::new(table);
                if resolved.alias.is_some() {
                    table_ref = table_ref.with_alias(ctx.alias(source, 0));
                }
                (table_ref, None, Vec::new())
            }
            SourceTarget::Entity(entity) => (
                TableRef::new(&entity.tables[0].name).with_alias(ctx.alias(source, 0)),
                Some(entity.tables[0].key_column.as_str()),
                entity.tables.iter().enumerate().skip(1).collect(),
            ),
        };

        sql = if source == 0 {
            sql.from(first)
        } else {
            sql.join(join_type, first, condition)
        };

        let Some(key_column) = key_column else {
            continue;
        };
        for (index, table) in tables {
            if !ctx.used[source].contains(&index) {
                continue;
            }
            let join_type = if outer || table.is_optional() {
                JoinType::Left
            } else {
                JoinType::Inner
            };
            let on = crate::sql::table_col(ctx.alias(source, index), &table.key_column)
                .eq(crate::sql::table_col(ctx.alias(source, 0), key_column));
            sql = sql.join(
                join_type,
                TableRef::new(&table.name).with_alias(ctx.alias(source, index)),
                Some(on),
            );
        }
    }
    sql
}
