//! Expression translation state shared by select and mutation planning.

use std::collections::BTreeSet;

use crate::metamodel::{EntityDescriptor, TableRole};
use crate::oql::{self, BinaryOp, Parameter, UnaryOp};
use crate::resolve::{ResolvedExpr, ResolvedQuery, SourceTarget};
use crate::sql::{BinaryOperator, Dialect, Expr, ExprExt, Literal, UnaryOperator};

use super::TranslateError;

/// How column references are qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Scope {
    /// Generated table aliases; any table of any source.
    Aliased,
    /// Single-table statement on table `n` of source 0, qualified by the
    /// table name.
    Table(usize),
}

pub(super) struct Context<'q> {
    pub query: &'q ResolvedQuery,
    pub dialect: Dialect,
    /// Per source, per table index.
    aliases: Vec<Vec<String>>,
    /// Tables each source needs in the FROM clause.
    pub used: Vec<BTreeSet<usize>>,
    pub bindings: Vec<Parameter>,
    pub scope: Scope,
}

impl<'q> Context<'q> {
    pub fn new(query: &'q ResolvedQuery, dialect: Dialect, scope: Scope) -> Self {
        let mut aliases = Vec::with_capacity(query.sources.len());
        let mut used = Vec::with_capacity(query.sources.len());
        for (index, source) in query.sources.iter().enumerate() {
            match &source.target {
                SourceTarget::Entity(entity) => {
                    let initial = entity
                        .name
                        .chars()
                        .find(char::is_ascii_alphabetic)
                        .map(|c| c.to_ascii_lowercase())
                        .unwrap_or('t');
                    aliases.push(
                        (0..entity.tables.len())
                            .map(|k| format!("{initial}{}_{k}", index + 1))
                            .collect(),
                    );
                    // The hierarchy chain is always joined.
                    used.push(
                        entity
                            .tables
                            .iter()
                            .enumerate()
                            .filter(|(k, t)| {
                                *k == 0 || !matches!(t.role, TableRole::Secondary { .. })
                            })
                            .map(|(k, _)| k)
                            .collect(),
                    );
                }
                SourceTarget::Table(table) => {
                    aliases.push(vec![source.alias.clone().unwrap_or_else(|| table.clone())]);
                    used.push(BTreeSet::from([0]));
                }
            }
        }
        Self {
            query,
            dialect,
            aliases,
            used,
            bindings: Vec::new(),
            scope,
        }
    }

    pub fn alias(&self, source: usize, table: usize) -> &str {
        &self.aliases[source][table]
    }

    pub fn entity(&self, source: usize) -> Option<&'q EntityDescriptor> {
        self.query.sources[source].target.entity().map(|e| e.as_ref())
    }

    fn require_entity(&self, source: usize) -> Result<&'q EntityDescriptor, TranslateError> {
        self.entity(source).ok_or_else(|| {
            TranslateError::NotAnEntity(match &self.query.sources[source].target {
                SourceTarget::Table(table) => table.clone(),
                SourceTarget::Entity(entity) => entity.qualified_name.clone(),
            })
        })
    }

    /// Qualified reference to `column` of table `table` of `source`.
    pub fn column(&mut self, source: usize, table: usize, column: &str) -> Result<Expr, TranslateError> {
        match self.scope {
            Scope::Aliased => {
                self.used[source].insert(table);
                Ok(crate::sql::table_col(self.alias(source, table), column))
            }
            Scope::Table(target) => {
                let entity = self.require_entity(source)?;
                if source != 0 || table != target {
                    return Err(TranslateError::CrossTableReference {
                        table: entity.tables[target].name.clone(),
                        column: column.to_string(),
                    });
                }
                Ok(crate::sql::table_col(&entity.tables[target].name, column))
            }
        }
    }

    pub fn identifier(&mut self, source: usize) -> Result<Expr, TranslateError> {
        let entity = self.require_entity(source)?;
        let table = match self.scope {
            Scope::Aliased => entity.root_table_index(),
            Scope::Table(target) => target,
        };
        self.column(source, table, &entity.tables[table].key_column)
    }

    fn parameter(&mut self, parameter: &Parameter) -> Expr {
        self.bindings.push(parameter.clone());
        crate::sql::param(self.bindings.len())
    }

    fn boxed(&mut self, expr: &ResolvedExpr) -> Result<Box<Expr>, TranslateError> {
        Ok(Box::new(self.expr(expr)?))
    }

    pub fn expr(&mut self, expr: &ResolvedExpr) -> Result<Expr, TranslateError> {
        Ok(match expr {
            ResolvedExpr::Entity { source } | ResolvedExpr::Identifier { source } => {
                self.identifier(*source)?
            }
            ResolvedExpr::Attribute { source, attribute } => {
                let entity = self.require_entity(*source)?;
                let descriptor = &entity.attributes[*attribute];
                self.column(*source, descriptor.table, &descriptor.column)?
            }
            ResolvedExpr::ForeignKey {
                source,
                association,
            } => {
                let entity = self.require_entity(*source)?;
                let descriptor = &entity.associations[*association];
                let (column, table) = descriptor.fk_column().ok_or_else(|| {
                    TranslateError::Unsupported(format!(
                        "comparison on collection {}.{}",
                        entity.name, descriptor.name
                    ))
                })?;
                self.column(*source, table, column)?
            }
            ResolvedExpr::Column { path } => Expr::Identifier(self.pass_through_path(path)),
            ResolvedExpr::Literal(literal) => Expr::Literal(literal_to_sql(literal)),
            ResolvedExpr::Parameter(parameter) => self.parameter(parameter),
            ResolvedExpr::Binary { left, op, right } => {
                let op = binary_op(*op);
                let left = self.expr(left)?.parenthesize_below(op.precedence());
                let right = self.expr(right)?.parenthesize_below(op.precedence() + 1);
                left.binary(op, right)
            }
            ResolvedExpr::Unary { op, expr } => {
                let (op, min) = match op {
                    UnaryOp::Not => (UnaryOperator::Not, 3),
                    UnaryOp::Neg => (UnaryOperator::Minus, 7),
                };
                Expr::UnaryOp {
                    op,
                    expr: Box::new(self.expr(expr)?.parenthesize_below(min)),
                }
            }
            ResolvedExpr::Function {
                name,
                distinct,
                args,
            } => Expr::Function {
                name: name.clone(),
                distinct: *distinct,
                args: args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Result<_, _>>()?,
            },
            ResolvedExpr::CountStar => Expr::CountStar,
            ResolvedExpr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(self.expr(expr)?.parenthesize_below(5)),
                negated: *negated,
            },
            ResolvedExpr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: Box::new(self.expr(expr)?.parenthesize_below(5)),
                pattern: Box::new(self.expr(pattern)?.parenthesize_below(5)),
                negated: *negated,
            },
            ResolvedExpr::InList {
                expr,
                list,
                negated,
            } => Expr::In {
                expr: Box::new(self.expr(expr)?.parenthesize_below(5)),
                values: list
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<_, _>>()?,
                negated: *negated,
            },
            ResolvedExpr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: Box::new(self.expr(expr)?.parenthesize_below(5)),
                low: Box::new(self.expr(low)?.parenthesize_below(5)),
                high: Box::new(self.expr(high)?.parenthesize_below(5)),
                negated: *negated,
            },
            ResolvedExpr::Paren(inner) => Expr::Paren(self.boxed(inner)?),
        })
    }

    /// Single-table statements cannot use the query alias; qualify with
    /// the table name instead.
    fn pass_through_path(&self, path: &[String]) -> Vec<String> {
        if let (Scope::Table(_), Some(source)) = (self.scope, self.query.sources.first()) {
            if let (Some(alias), SourceTarget::Table(table)) = (&source.alias, &source.target) {
                if path.len() > 1 && path[0] == *alias {
                    let mut rewritten = path.to_vec();
                    rewritten[0] = table.clone();
                    return rewritten;
                }
            }
        }
        path.to_vec()
    }
}

pub(super) fn literal_to_sql(literal: &oql::Literal) -> Literal {
    match literal {
        oql::Literal::String(s) => Literal::String(s.clone()),
        oql::Literal::Integer(n) => Literal::Int(*n),
        oql::Literal::Decimal(f) => Literal::Float(*f),
        oql::Literal::Boolean(b) => Literal::Bool(*b),
        oql::Literal::Null => Literal::Null,
    }
}

fn binary_op(op: BinaryOp) -> BinaryOperator {
    match op {
        BinaryOp::Or => BinaryOperator::Or,
        BinaryOp::And => BinaryOperator::And,
        BinaryOp::Eq => BinaryOperator::Eq,
        BinaryOp::Ne => BinaryOperator::Ne,
        BinaryOp::Lt => BinaryOperator::Lt,
        BinaryOp::Gt => BinaryOperator::Gt,
        BinaryOp::Lte => BinaryOperator::Lte,
        BinaryOp::Gte => BinaryOperator::Gte,
        BinaryOp::Add => BinaryOperator::Plus,
        BinaryOp::Sub => BinaryOperator::Minus,
        BinaryOp::Mul => BinaryOperator::Mul,
        BinaryOp::Div => BinaryOperator::Div,
        BinaryOp::Mod => BinaryOperator::Mod,
        BinaryOp::Concat => BinaryOperator::Concat,
    }
}
