//! Object query language: lexer, parser and syntax tree.
//!
//! ```ignore
//! use relata::oql;
//!
//! let ast = oql::parse("select e from Employee e where e.name = 'O''Brien'")?;
//! ```

pub mod ast;
mod error;
pub mod lexer;
mod parser;
pub mod span;

pub use ast::*;
pub use error::{SyntaxError, SyntaxErrorKind};
pub use parser::parse;
pub use span::{Span, Spanned};
