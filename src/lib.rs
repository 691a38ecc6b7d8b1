//! dbaccess library
//!
//! A uniform data-access layer over SQL databases (SQLite, PostgreSQL,
//! MySQL/MariaDB): pool configuration, transactional execution and
//! cancellable, typed streaming of query results.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, DatabaseUrl, PoolConfig, RollbackPolicy};
pub use db::{Backend, Conn, Cursor, DbConn, Scanner, Tx};
pub use error::{DbError, DbResult};
pub use models::{DatabaseType, ExecResult, NULL_SENTINEL, QueryParam, RowMap};
