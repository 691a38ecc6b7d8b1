//! Parameter binding utilities for database queries.
//!
//! This module provides functions to bind `QueryParam` values to database-specific
//! query objects. Each backend folds its parameter list through one of these.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
    }
}
