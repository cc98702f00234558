//! PostgreSQL dialect.
//!
//! - ANSI identifier quoting (`"`)
//! - Numbered `$n` placeholders
//! - Native boolean type (true/false)

use super::helpers;
use super::SqlDialect;
use crate::sql::ddl::SqlType;

#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_postgres(name)
    }

    fn emit_data_type(&self, ty: SqlType) -> &'static str {
        helpers::emit_data_type_ansi(ty)
    }
}
