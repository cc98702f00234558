//! DML (Data Manipulation Language) support: INSERT, UPDATE, DELETE.
//!
//! # Examples
//!
//! ```ignore
//! use relata::sql::dml::{Insert, Update, Delete};
//! use relata::sql::expr::{col, param, ExprExt};
//!
//! let insert = Insert::into("tabEmployees")
//!     .columns(["id", "name"])
//!     .values([param(1), param(2)]);
//!
//! let update = Update::table("tabEmployees")
//!     .set("name", param(1))
//!     .filter(col("id").eq(param(2)));
//!
//! let delete = Delete::from("tabEmployees").filter(col("id").eq(param(1)));
//! ```

use super::dialect::Dialect;
use super::expr::Expr;
use super::token::{Token, TokenStream};

/// INSERT statement.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn values(mut self, vals: impl IntoIterator<Item = impl Into<Expr>>) -> Self {
        self.values = vals.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Insert)
            .space()
            .push(Token::Into)
            .space()
            .push(Token::Ident(self.table.clone()))
            .space()
            .lparen();
        ts.comma_separated(&self.columns, |ts, col| {
            ts.push(Token::Ident(col.clone()));
        });
        ts.rparen().space().push(Token::Values).space().lparen();
        ts.comma_separated(&self.values, |ts, val| {
            ts.append(&val.to_tokens_for_dialect(dialect));
        });
        ts.rparen();
        ts
    }
}

/// UPDATE statement. Assigned columns are never qualified; the filter
/// qualifies columns with the table name itself.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            where_clause: None,
        }
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(expr);
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Update)
            .space()
            .push(Token::Ident(self.table.clone()))
            .space()
            .push(Token::Set)
            .space();
        ts.comma_separated(&self.assignments, |ts, (column, value)| {
            ts.push(Token::Ident(column.clone()))
                .space()
                .push(Token::Eq)
                .space()
                .append(&value.to_tokens_for_dialect(dialect));
        });
        if let Some(filter) = &self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&filter.to_tokens_for_dialect(dialect));
        }
        ts
    }
}

/// DELETE statement.
#[derive(Debug, Clone)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Expr>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Some(expr);
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Delete)
            .space()
            .push(Token::From)
            .space()
            .push(Token::Ident(self.table.clone()));
        if let Some(filter) = &self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&filter.to_tokens_for_dialect(dialect));
        }
        ts
    }
}
