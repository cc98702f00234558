//! # Relata
//!
//! An object-relational persistence engine: object queries translated to
//! multi-dialect SQL, sessions with an identity map, and unit-of-work
//! flushing with dirty checking.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Object query text                        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [oql]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     QueryAst                             │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [resolve] + metamodel, import caches
//! ┌─────────────────────────────────────────────────────────┐
//! │        ResolvedQuery (one per concrete entity)           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [translate]
//! ┌─────────────────────────────────────────────────────────┐
//! │            SQL text + parameter bindings                 │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [engine] connection, hydration
//! ┌─────────────────────────────────────────────────────────┐
//! │     Session identity map  ──[flush]──▶  INSERT/UPDATE/   │
//! │                                         DELETE           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod flush;
pub mod metamodel;
pub mod oql;
pub mod resolve;
pub mod schema;
pub mod session;
pub mod sql;
pub mod translate;

pub use error::{Error, Result};
pub use factory::SessionFactory;
pub use session::{Entity, Session, Status};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::engine::{Connection, KeyValue, SqliteConnection, Value};
    pub use crate::factory::{SessionFactory, SessionFactoryBuilder};
    pub use crate::metamodel::{
        Association, Attribute, EntityBuilder, IdGenerator, Metamodel, ResultSetMapping,
        ValueType,
    };
    pub use crate::session::{Entity, ResultValue, Session, SessionError, Status};
    pub use crate::sql::Dialect;
}
