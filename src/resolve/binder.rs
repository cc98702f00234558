//! Binding of AST names to metamodel elements for one concrete choice of
//! root entities.

use std::collections::HashMap;
use std::sync::Arc;

use crate::metamodel::{AssociationKind, EntityDescriptor, Metamodel};
use crate::oql::{
    Assignment, DeleteStatement, EntityRef, Expr, Join, JoinKind, Path, SelectStatement,
    UpdateStatement,
};

use super::query::*;
use super::ResolveError;

pub(super) struct Binder<'a> {
    metamodel: &'a Metamodel,
    /// Chosen entity per root token, in root-token order.
    choices: &'a [Option<Arc<EntityDescriptor>>],
    next_choice: usize,
    sources: Vec<ResolvedSource>,
    aliases: HashMap<String, usize>,
}

impl<'a> Binder<'a> {
    pub(super) fn new(
        metamodel: &'a Metamodel,
        choices: &'a [Option<Arc<EntityDescriptor>>],
    ) -> Self {
        Self {
            metamodel,
            choices,
            next_choice: 0,
            sources: Vec::new(),
            aliases: HashMap::new(),
        }
    }

    pub(super) fn into_sources(self) -> Vec<ResolvedSource> {
        self.sources
    }

    fn root_target(&mut self, written: &str) -> SourceTarget {
        let choice = self.choices.get(self.next_choice).cloned().flatten();
        self.next_choice += 1;
        match choice {
            Some(entity) => SourceTarget::Entity(entity),
            None => SourceTarget::Table(written.to_string()),
        }
    }

    fn push_source(&mut self, source: ResolvedSource) -> Result<usize, ResolveError> {
        let index = self.sources.len();
        if let Some(alias) = &source.alias {
            if self.aliases.insert(alias.clone(), index).is_some() {
                return Err(ResolveError::DuplicateAlias(alias.clone()));
            }
        }
        self.sources.push(source);
        Ok(index)
    }

    fn bind_root(&mut self, entity: &EntityRef) -> Result<usize, ResolveError> {
        let target = self.root_target(&entity.name.value);
        self.push_source(ResolvedSource {
            alias: entity.alias.as_ref().map(|a| a.value.clone()),
            target,
            join: None,
        })
    }

    pub(super) fn bind_select(
        &mut self,
        select: &SelectStatement,
    ) -> Result<ResolvedStatement, ResolveError> {
        for from in &select.from {
            self.bind_root(from)?;
        }
        for join in &select.joins {
            self.bind_join(join)?;
        }

        let selections = if select.selections.is_empty() {
            (0..self.sources.len())
                .filter(|&i| self.sources[i].join.is_none())
                .map(|source| ResolvedSelection {
                    expr: ResolvedExpr::Entity { source },
                    alias: None,
                })
                .collect()
        } else {
            select
                .selections
                .iter()
                .map(|s| {
                    Ok(ResolvedSelection {
                        expr: self.bind_expr(&s.expr)?,
                        alias: s.alias.clone(),
                    })
                })
                .collect::<Result<_, ResolveError>>()?
        };

        let where_clause = self.bind_optional(select.where_clause.as_ref())?;
        let group_by = select
            .group_by
            .iter()
            .map(|e| self.bind_expr(e))
            .collect::<Result<_, _>>()?;
        let having = self.bind_optional(select.having.as_ref())?;
        let order_by = select
            .order_by
            .iter()
            .map(|o| {
                Ok(ResolvedOrder {
                    expr: self.bind_expr(&o.expr)?,
                    descending: o.descending,
                })
            })
            .collect::<Result<_, ResolveError>>()?;

        Ok(ResolvedStatement::Select(ResolvedSelect {
            distinct: select.distinct,
            selections,
            where_clause,
            group_by,
            having,
            order_by,
            limit: select.limit,
            offset: select.offset,
        }))
    }

    pub(super) fn bind_update(
        &mut self,
        update: &UpdateStatement,
    ) -> Result<ResolvedStatement, ResolveError> {
        self.bind_root(&update.target)?;
        let assignments = update
            .assignments
            .iter()
            .map(|a| self.bind_assignment(a))
            .collect::<Result<_, _>>()?;
        let where_clause = self.bind_optional(update.where_clause.as_ref())?;
        Ok(ResolvedStatement::Update(ResolvedUpdate {
            assignments,
            where_clause,
        }))
    }

    pub(super) fn bind_delete(
        &mut self,
        delete: &DeleteStatement,
    ) -> Result<ResolvedStatement, ResolveError> {
        self.bind_root(&delete.target)?;
        let where_clause = self.bind_optional(delete.where_clause.as_ref())?;
        Ok(ResolvedStatement::Delete(ResolvedDelete { where_clause }))
    }

    fn bind_assignment(&mut self, assignment: &Assignment) -> Result<ResolvedAssignment, ResolveError> {
        let target = match self.bind_path(&assignment.path)? {
            ResolvedExpr::Attribute { source: 0, attribute } => AssignmentTarget::Attribute(attribute),
            ResolvedExpr::ForeignKey {
                source: 0,
                association,
            } => AssignmentTarget::ForeignKey(association),
            ResolvedExpr::Column { path } => match (&self.sources[0].target, path.last()) {
                (SourceTarget::Table(_), Some(column)) => AssignmentTarget::Column(column.clone()),
                _ => return Err(ResolveError::InvalidAssignment(assignment.path.to_string())),
            },
            ResolvedExpr::Identifier { source: 0 } => {
                return Err(ResolveError::IdentifierAssignment(
                    assignment.path.to_string(),
                ))
            }
            _ => return Err(ResolveError::InvalidAssignment(assignment.path.to_string())),
        };
        Ok(ResolvedAssignment {
            target,
            value: self.bind_expr(&assignment.value)?,
        })
    }

    fn bind_join(&mut self, join: &Join) -> Result<(), ResolveError> {
        let alias = join.alias.as_ref().map(|a| a.value.clone());

        let Some(&parent) = self.aliases.get(join.target.first()) else {
            // Entity-name join; it consumed a root token.
            let target = self.root_target(&join.target.to_string());
            let index = self.push_source(ResolvedSource {
                alias,
                target,
                join: None,
            })?;
            let condition = self.bind_optional(join.condition.as_ref())?;
            self.sources[index].join = Some(SourceJoin::Root {
                kind: join.kind,
                condition,
            });
            return Ok(());
        };

        // Walk intermediate segments through implicit joins; the last
        // segment gets its own explicit join.
        let segments = &join.target.segments[1..];
        let Some((last, intermediate)) = segments.split_last() else {
            return Err(ResolveError::NotAnAssociation {
                entity: self.source_name(parent),
                attribute: join.target.to_string(),
            });
        };
        let mut owner = parent;
        for segment in intermediate {
            let association = self.association_index(owner, segment)?;
            owner = self.implicit_join(owner, association)?;
        }
        let association = self.association_index(owner, last)?;
        let target = self.association_target(owner, association)?;
        let index = self.push_source(ResolvedSource {
            alias,
            target: SourceTarget::Entity(target),
            join: None,
        })?;
        let condition = self.bind_optional(join.condition.as_ref())?;
        self.sources[index].join = Some(SourceJoin::Association {
            parent: owner,
            association,
            kind: join.kind,
            fetch: join.fetch,
            implicit: false,
            condition,
        });
        Ok(())
    }

    fn source_name(&self, source: usize) -> String {
        match &self.sources[source].target {
            SourceTarget::Entity(entity) => entity.qualified_name.clone(),
            SourceTarget::Table(table) => table.clone(),
        }
    }

    fn association_index(&self, source: usize, name: &str) -> Result<usize, ResolveError> {
        self.sources[source]
            .target
            .entity()
            .and_then(|e| e.association(name))
            .map(|(index, _)| index)
            .ok_or_else(|| ResolveError::NotAnAssociation {
                entity: self.source_name(source),
                attribute: name.to_string(),
            })
    }

    fn association_target(
        &self,
        source: usize,
        association: usize,
    ) -> Result<Arc<EntityDescriptor>, ResolveError> {
        let owner = self.sources[source]
            .target
            .entity()
            .ok_or_else(|| ResolveError::NotAnAssociation {
                entity: self.source_name(source),
                attribute: association.to_string(),
            })?;
        let descriptor = &owner.associations[association];
        self.metamodel
            .by_qualified_name(&descriptor.target)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownEntity(descriptor.target.clone()))
    }

    /// Reuse or create the inner join a path expression navigates through.
    fn implicit_join(&mut self, parent: usize, association: usize) -> Result<usize, ResolveError> {
        let existing = self.sources.iter().position(|s| {
            matches!(
                s.join,
                Some(SourceJoin::Association {
                    parent: p,
                    association: a,
                    implicit: true,
                    ..
                }) if p == parent && a == association
            )
        });
        if let Some(index) = existing {
            return Ok(index);
        }

        if let Some(owner) = self.sources[parent].target.entity() {
            let descriptor = &owner.associations[association];
            if matches!(descriptor.kind, AssociationKind::OneToMany { .. }) {
                return Err(ResolveError::CollectionPath {
                    entity: owner.qualified_name.clone(),
                    association: descriptor.name.clone(),
                });
            }
        }
        let target = self.association_target(parent, association)?;
        self.push_source(ResolvedSource {
            alias: None,
            target: SourceTarget::Entity(target),
            join: Some(SourceJoin::Association {
                parent,
                association,
                kind: JoinKind::Inner,
                fetch: false,
                implicit: true,
                condition: None,
            }),
        })
    }

    fn bind_optional(&mut self, expr: Option<&Expr>) -> Result<Option<ResolvedExpr>, ResolveError> {
        expr.map(|e| self.bind_expr(e)).transpose()
    }

    fn bind_boxed(&mut self, expr: &Expr) -> Result<Box<ResolvedExpr>, ResolveError> {
        Ok(Box::new(self.bind_expr(expr)?))
    }

    pub(super) fn bind_expr(&mut self, expr: &Expr) -> Result<ResolvedExpr, ResolveError> {
        Ok(match expr {
            Expr::Path(path) => self.bind_path(path)?,
            Expr::Literal(literal) => ResolvedExpr::Literal(literal.clone()),
            Expr::Parameter(parameter) => ResolvedExpr::Parameter(parameter.clone()),
            Expr::Binary { left, op, right } => ResolvedExpr::Binary {
                left: self.bind_boxed(left)?,
                op: *op,
                right: self.bind_boxed(right)?,
            },
            Expr::Unary { op, expr } => ResolvedExpr::Unary {
                op: *op,
                expr: self.bind_boxed(expr)?,
            },
            Expr::Function {
                name,
                distinct,
                args,
            } => ResolvedExpr::Function {
                name: name.clone(),
                distinct: *distinct,
                args: args
                    .iter()
                    .map(|a| self.bind_expr(a))
                    .collect::<Result<_, _>>()?,
            },
            Expr::CountStar => ResolvedExpr::CountStar,
            Expr::IsNull { expr, negated } => ResolvedExpr::IsNull {
                expr: self.bind_boxed(expr)?,
                negated: *negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
            } => ResolvedExpr::Like {
                expr: self.bind_boxed(expr)?,
                pattern: self.bind_boxed(pattern)?,
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => ResolvedExpr::InList {
                expr: self.bind_boxed(expr)?,
                list: list
                    .iter()
                    .map(|e| self.bind_expr(e))
                    .collect::<Result<_, _>>()?,
                negated: *negated,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => ResolvedExpr::Between {
                expr: self.bind_boxed(expr)?,
                low: self.bind_boxed(low)?,
                high: self.bind_boxed(high)?,
                negated: *negated,
            },
            Expr::Paren(inner) => ResolvedExpr::Paren(self.bind_boxed(inner)?),
        })
    }

    fn bind_path(&mut self, path: &Path) -> Result<ResolvedExpr, ResolveError> {
        if let Some(&source) = self.aliases.get(path.first()) {
            return self.bind_from(source, &path.segments[1..], path);
        }

        // Unqualified property of an unaliased root entity.
        let implicit_root = self.sources.iter().position(|s| {
            s.alias.is_none()
                && s.join.is_none()
                && s.target
                    .entity()
                    .is_some_and(|e| has_property(e, path.first()))
        });
        match implicit_root {
            Some(source) => self.bind_from(source, &path.segments, path),
            None => Ok(ResolvedExpr::Column {
                path: path.segments.clone(),
            }),
        }
    }

    fn bind_from(
        &mut self,
        source: usize,
        rest: &[String],
        path: &Path,
    ) -> Result<ResolvedExpr, ResolveError> {
        let entity = match &self.sources[source].target {
            SourceTarget::Entity(entity) => Arc::clone(entity),
            SourceTarget::Table(_) => {
                return Ok(ResolvedExpr::Column {
                    path: path.segments.clone(),
                })
            }
        };
        let Some((segment, tail)) = rest.split_first() else {
            return Ok(ResolvedExpr::Entity { source });
        };

        if *segment == entity.identifier.name && tail.is_empty() {
            return Ok(ResolvedExpr::Identifier { source });
        }
        if let Some((attribute, _)) = entity.attribute(segment) {
            if !tail.is_empty() {
                return Err(ResolveError::UnknownAttribute {
                    entity: entity.qualified_name.clone(),
                    attribute: path.to_string(),
                });
            }
            return Ok(ResolvedExpr::Attribute { source, attribute });
        }
        if let Some((association, descriptor)) = entity.association(segment) {
            let to_one = matches!(descriptor.kind, AssociationKind::ToOne { .. });
            if to_one && tail.is_empty() {
                return Ok(ResolvedExpr::ForeignKey {
                    source,
                    association,
                });
            }
            if to_one && tail.len() == 1 {
                let target = self.association_target(source, association)?;
                if tail[0] == target.identifier.name {
                    return Ok(ResolvedExpr::ForeignKey {
                        source,
                        association,
                    });
                }
            }
            if tail.is_empty() && descriptor.is_collection() {
                return Err(ResolveError::CollectionPath {
                    entity: entity.qualified_name.clone(),
                    association: descriptor.name.clone(),
                });
            }
            if tail.is_empty() {
                return Err(ResolveError::InverseReference {
                    entity: entity.qualified_name.clone(),
                    association: descriptor.name.clone(),
                });
            }
            let joined = self.implicit_join(source, association)?;
            return self.bind_from(joined, tail, path);
        }

        Err(ResolveError::UnknownAttribute {
            entity: entity.qualified_name.clone(),
            attribute: segment.clone(),
        })
    }
}

fn has_property(entity: &EntityDescriptor, name: &str) -> bool {
    entity.identifier.name == name
        || entity.attribute(name).is_some()
        || entity.association(name).is_some()
}
