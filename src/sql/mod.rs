//! SQL generation module.
//!
//! A type-safe builder for the statements the engine emits:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`dml`] - INSERT, UPDATE, DELETE
//! - [`ddl`] - CREATE TABLE for schema export
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod ddl;
pub mod dialect;
pub mod dml;
pub mod expr;
pub mod query;
pub mod token;

#[cfg(test)]
pub mod test_utils;

pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    col, lit_int, lit_null, lit_str, param, table_col, BinaryOperator, Expr, ExprExt, Literal,
    UnaryOperator,
};
pub use query::{Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
pub use token::{Token, TokenStream};

pub use ddl::{ColumnDef, CreateTable, SqlType, TableConstraint};
pub use dml::{Delete, Insert, Update};
