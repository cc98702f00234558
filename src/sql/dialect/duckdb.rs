//! DuckDB dialect.
//!
//! PostgreSQL-compatible quoting and booleans, `?` placeholders.

use super::helpers;
use super::SqlDialect;
use crate::sql::ddl::SqlType;

#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_duckdb(name)
    }

    fn emit_data_type(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Real => "DOUBLE",
            SqlType::Text => "VARCHAR",
            SqlType::Blob => "BLOB",
            other => helpers::emit_data_type_ansi(other),
        }
    }
}
