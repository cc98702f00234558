//! Execution engine: values, rows, the connection contract, the SQLite
//! adapter and hydration of rows into managed instances.

pub mod connection;
pub mod hydrate;
pub mod row;
pub mod sqlite;
pub mod value;

pub use connection::{Connection, ConnectionError};
pub use hydrate::{hydrate, native_row_mapping, native_scalar, Hydrated, HydrationError};
pub use row::{Row, Rows};
pub use sqlite::SqliteConnection;
pub use value::{KeyValue, Value};
