//! Bound query trees.
//!
//! Sources are numbered in declaration order; every bound expression refers
//! to its source by index into [`ResolvedQuery::sources`].

use std::sync::Arc;

use crate::metamodel::EntityDescriptor;
use crate::oql::{BinaryOp, JoinKind, Literal, Parameter, UnaryOp};

/// One concrete query produced by resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    /// Query text with every root token replaced by its qualified name.
    pub text: String,
    pub sources: Vec<ResolvedSource>,
    pub statement: ResolvedStatement,
}

impl ResolvedQuery {
    pub fn source(&self, index: usize) -> &ResolvedSource {
        &self.sources[index]
    }

    /// Entities this query reads or writes, root sources first.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.sources.iter().filter_map(|s| s.target.entity())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub alias: Option<String>,
    pub target: SourceTarget,
    /// `None` for FROM items and mutation targets.
    pub join: Option<SourceJoin>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceTarget {
    Entity(Arc<EntityDescriptor>),
    /// A root name that matched no entity, kept as written.
    Table(String),
}

impl SourceTarget {
    pub fn entity(&self) -> Option<&Arc<EntityDescriptor>> {
        match self {
            SourceTarget::Entity(entity) => Some(entity),
            SourceTarget::Table(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceJoin {
    /// Join along an association of an earlier source.
    Association {
        parent: usize,
        association: usize,
        kind: JoinKind,
        fetch: bool,
        /// Created for a path expression rather than a `join` clause.
        implicit: bool,
        /// Extra `with` condition.
        condition: Option<ResolvedExpr>,
    },
    /// `join Department d on ...`
    Root {
        kind: JoinKind,
        condition: Option<ResolvedExpr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedStatement {
    Select(ResolvedSelect),
    Update(ResolvedUpdate),
    Delete(ResolvedDelete),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSelect {
    pub distinct: bool,
    pub selections: Vec<ResolvedSelection>,
    pub where_clause: Option<ResolvedExpr>,
    pub group_by: Vec<ResolvedExpr>,
    pub having: Option<ResolvedExpr>,
    pub order_by: Vec<ResolvedOrder>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSelection {
    pub expr: ResolvedExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOrder {
    pub expr: ResolvedExpr,
    pub descending: bool,
}

/// Mutation target is always source 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUpdate {
    pub assignments: Vec<ResolvedAssignment>,
    pub where_clause: Option<ResolvedExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAssignment {
    pub target: AssignmentTarget,
    pub value: ResolvedExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentTarget {
    Attribute(usize),
    /// Foreign key column of a to-one association.
    ForeignKey(usize),
    /// Column of a pass-through table.
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDelete {
    pub where_clause: Option<ResolvedExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedExpr {
    /// A whole entity: selected, it is hydrated; compared, its identifier.
    Entity { source: usize },
    Identifier { source: usize },
    Attribute { source: usize, attribute: usize },
    ForeignKey { source: usize, association: usize },
    /// Unbound dotted name, rendered as written.
    Column { path: Vec<String> },
    Literal(Literal),
    Parameter(Parameter),
    Binary {
        left: Box<ResolvedExpr>,
        op: BinaryOp,
        right: Box<ResolvedExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<ResolvedExpr>,
    },
    Function {
        name: String,
        distinct: bool,
        args: Vec<ResolvedExpr>,
    },
    CountStar,
    IsNull {
        expr: Box<ResolvedExpr>,
        negated: bool,
    },
    Like {
        expr: Box<ResolvedExpr>,
        pattern: Box<ResolvedExpr>,
        negated: bool,
    },
    InList {
        expr: Box<ResolvedExpr>,
        list: Vec<ResolvedExpr>,
        negated: bool,
    },
    Between {
        expr: Box<ResolvedExpr>,
        low: Box<ResolvedExpr>,
        high: Box<ResolvedExpr>,
        negated: bool,
    },
    Paren(Box<ResolvedExpr>),
}

impl ResolvedExpr {
    /// Visit this expression and every sub-expression, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ResolvedExpr)) {
        visit(self);
        match self {
            ResolvedExpr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            ResolvedExpr::Unary { expr, .. }
            | ResolvedExpr::IsNull { expr, .. }
            | ResolvedExpr::Paren(expr) => expr.walk(visit),
            ResolvedExpr::Function { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            ResolvedExpr::Like { expr, pattern, .. } => {
                expr.walk(visit);
                pattern.walk(visit);
            }
            ResolvedExpr::InList { expr, list, .. } => {
                expr.walk(visit);
                for item in list {
                    item.walk(visit);
                }
            }
            ResolvedExpr::Between {
                expr, low, high, ..
            } => {
                expr.walk(visit);
                low.walk(visit);
                high.walk(visit);
            }
            _ => {}
        }
    }

    /// Parameters in order of appearance.
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut found = Vec::new();
        self.walk(&mut |e| {
            if let ResolvedExpr::Parameter(p) = e {
                found.push(p);
            }
        });
        found
    }
}
