//! Data models shared by the library and the command-line front end.

pub mod connection;
pub mod query;

pub use connection::DatabaseType;
pub use query::{
    DEFAULT_STATEMENT_TIMEOUT_SECS, ExecResult, NULL_SENTINEL, QueryParam, RowMap,
};
