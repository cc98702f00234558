//! MySQL dialect.
//!
//! - Backtick identifier quoting (`` `name` ``)
//! - Boolean is TINYINT(1), rendered 1/0
//! - `||` is logical OR by default, so concatenation uses CONCAT()

use super::helpers;
use super::SqlDialect;
use crate::sql::ddl::SqlType;

#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn supports_concat_operator(&self) -> bool {
        false
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }

    fn emit_data_type(&self, ty: SqlType) -> &'static str {
        match ty {
            SqlType::Integer => "BIGINT",
            SqlType::Real => "DOUBLE",
            SqlType::Text => "TEXT",
            SqlType::Boolean => "TINYINT(1)",
            SqlType::Blob => "BLOB",
        }
    }
}
