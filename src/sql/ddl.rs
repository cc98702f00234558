//! DDL (Data Definition Language) support for schema export.
//!
//! # Examples
//!
//! ```ignore
//! use relata::sql::ddl::{ColumnDef, CreateTable, SqlType, TableConstraint};
//! use relata::sql::Dialect;
//!
//! let table = CreateTable::new("tabEmployees")
//!     .if_not_exists()
//!     .column(ColumnDef::new("id", SqlType::Integer).not_null())
//!     .column(ColumnDef::new("name", SqlType::Text))
//!     .constraint(TableConstraint::primary_key(["id"]));
//!
//! println!("{}", table.to_sql(Dialect::Sqlite));
//! ```

use serde::{Deserialize, Serialize};

use super::dialect::{Dialect, SqlDialect};
use super::token::{Token, TokenStream};

/// Portable column type; each dialect maps it to a concrete type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
}

/// CREATE TABLE statement.
#[derive(Debug, Clone)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct CreateTable {
    pub if_not_exists: bool,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

impl CreateTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            if_not_exists: false,
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Add IF NOT EXISTS where the dialect supports it.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }

    pub fn constraint(mut self, constraint: TableConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Create).space().push(Token::Table);

        if self.if_not_exists && dialect.supports_if_not_exists() {
            ts.space()
                .push(Token::If)
                .space()
                .push(Token::Not)
                .space()
                .push(Token::Exists);
        }

        ts.space().push(Token::Ident(self.name.clone())).space().lparen();

        let mut first = true;
        for col in &self.columns {
            if !first {
                ts.comma().space();
            }
            first = false;
            ts.append(&col.to_tokens(dialect));
        }
        for constraint in &self.constraints {
            if !first {
                ts.comma().space();
            }
            first = false;
            ts.append(&constraint.to_tokens());
        }

        ts.rparen();
        ts
    }
}

/// Column definition for CREATE TABLE.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: SqlType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: SqlType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.name.clone()))
            .space()
            .push(Token::Raw(dialect.emit_data_type(self.data_type).into()));
        if !self.nullable {
            ts.space().push(Token::Not).space().push(Token::Null);
        }
        ts
    }
}

/// Table-level constraints.
#[derive(Debug, Clone)]
pub enum TableConstraint {
    PrimaryKey {
        columns: Vec<String>,
    },
    ForeignKey {
        columns: Vec<String>,
        references_table: String,
        references_columns: Vec<String>,
    },
}

impl TableConstraint {
    pub fn primary_key(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        TableConstraint::PrimaryKey {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn foreign_key(
        columns: impl IntoIterator<Item = impl Into<String>>,
        references_table: impl Into<String>,
        references_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TableConstraint::ForeignKey {
            columns: columns.into_iter().map(Into::into).collect(),
            references_table: references_table.into(),
            references_columns: references_columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            TableConstraint::PrimaryKey { columns } => {
                ts.push(Token::Primary).space().push(Token::Key).space();
                push_column_list(&mut ts, columns);
            }
            TableConstraint::ForeignKey {
                columns,
                references_table,
                references_columns,
            } => {
                ts.push(Token::Foreign).space().push(Token::Key).space();
                push_column_list(&mut ts, columns);
                ts.space()
                    .push(Token::References)
                    .space()
                    .push(Token::Ident(references_table.clone()))
                    .space();
                push_column_list(&mut ts, references_columns);
            }
        }
        ts
    }
}

fn push_column_list(ts: &mut TokenStream, columns: &[String]) {
    ts.lparen();
    ts.comma_separated(columns, |ts, c| {
        ts.push(Token::Ident(c.clone()));
    });
    ts.rparen();
}
