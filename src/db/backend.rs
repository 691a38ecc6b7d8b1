//! Per-engine capabilities consumed by the connection, cursor and scanner.
//!
//! Every engine runs on its own concrete `sqlx` driver (no `AnyPool`), so
//! each implementation below only wires the shared executor plumbing to that
//! engine's parameter binder and text renderer.

use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types;
use crate::models::{DatabaseType, ExecResult, QueryParam};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use sqlx::query::Query;
use sqlx::{Database, Either, Executor, IntoArguments, MySql, Pool, Postgres, Sqlite};

/// Raw multi-result-set stream: `Right` carries a row, `Left` ends one statement.
pub type RowStream<'e, DB> = BoxStream<
    'e,
    Result<Either<<DB as Database>::QueryResult, <DB as Database>::Row>, sqlx::Error>,
>;

type Binder<'q, DB> = fn(
    Query<'q, DB, <DB as Database>::Arguments<'q>>,
    &'q QueryParam,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>;

/// A database engine usable behind [`Conn`](crate::db::Conn).
pub trait Backend: Database {
    const KIND: DatabaseType;

    /// Stream all result sets of `sql` on a pooled connection.
    fn fetch_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self>;

    /// Stream all result sets of `sql` on a dedicated connection.
    fn fetch_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self>;

    fn execute_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>>;

    fn execute_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>>;

    fn exec_result(result: &Self::QueryResult) -> ExecResult;

    /// Native textual rendering of one column; `None` for SQL NULL.
    fn column_text(row: &Self::Row, idx: usize) -> Result<Option<String>, sqlx::Error>;
}

// Without parameters the statement goes out unprepared, which is what lets a
// single call carry several statements on MySQL and PostgreSQL.
fn fetch_with<'e, DB, E>(
    executor: E,
    sql: &'e str,
    params: &'e [QueryParam],
    bind: Binder<'e, DB>,
) -> RowStream<'e, DB>
where
    DB: Database,
    E: Executor<'e, Database = DB> + 'e,
    <DB as Database>::Arguments<'e>: IntoArguments<'e, DB>,
{
    if params.is_empty() {
        executor.fetch_many(sql)
    } else {
        executor.fetch_many(params.iter().fold(sqlx::query(sql), bind))
    }
}

fn execute_with<'e, DB, E>(
    executor: E,
    sql: &'e str,
    params: &'e [QueryParam],
    bind: Binder<'e, DB>,
) -> BoxFuture<'e, Result<DB::QueryResult, sqlx::Error>>
where
    DB: Database,
    E: Executor<'e, Database = DB> + 'e,
    <DB as Database>::Arguments<'e>: IntoArguments<'e, DB>,
{
    if params.is_empty() {
        executor.execute(sql)
    } else {
        executor.execute(params.iter().fold(sqlx::query(sql), bind))
    }
}

/// Zero means the connection has not generated an id.
fn insert_id(id: i64) -> Option<i64> {
    (id != 0).then_some(id)
}

impl Backend for MySql {
    const KIND: DatabaseType = DatabaseType::MySQL;

    fn fetch_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self> {
        fetch_with(pool, sql, params, bind_mysql_param)
    }

    fn fetch_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self> {
        fetch_with(conn, sql, params, bind_mysql_param)
    }

    fn execute_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>> {
        execute_with(pool, sql, params, bind_mysql_param)
    }

    fn execute_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>> {
        execute_with(conn, sql, params, bind_mysql_param)
    }

    fn exec_result(result: &Self::QueryResult) -> ExecResult {
        ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id())
                .ok()
                .and_then(insert_id),
        }
    }

    fn column_text(row: &Self::Row, idx: usize) -> Result<Option<String>, sqlx::Error> {
        types::mysql::column_text(row, idx)
    }
}

impl Backend for Postgres {
    const KIND: DatabaseType = DatabaseType::PostgreSQL;

    fn fetch_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self> {
        fetch_with(pool, sql, params, bind_postgres_param)
    }

    fn fetch_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self> {
        fetch_with(conn, sql, params, bind_postgres_param)
    }

    fn execute_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>> {
        execute_with(pool, sql, params, bind_postgres_param)
    }

    fn execute_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>> {
        execute_with(conn, sql, params, bind_postgres_param)
    }

    fn exec_result(result: &Self::QueryResult) -> ExecResult {
        ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        }
    }

    fn column_text(row: &Self::Row, idx: usize) -> Result<Option<String>, sqlx::Error> {
        types::postgres::column_text(row, idx)
    }
}

impl Backend for Sqlite {
    const KIND: DatabaseType = DatabaseType::SQLite;

    fn fetch_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self> {
        fetch_with(pool, sql, params, bind_sqlite_param)
    }

    fn fetch_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> RowStream<'e, Self> {
        fetch_with(conn, sql, params, bind_sqlite_param)
    }

    fn execute_pool<'e>(
        pool: &'e Pool<Self>,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>> {
        execute_with(pool, sql, params, bind_sqlite_param)
    }

    fn execute_conn<'e>(
        conn: &'e mut Self::Connection,
        sql: &'e str,
        params: &'e [QueryParam],
    ) -> BoxFuture<'e, Result<Self::QueryResult, sqlx::Error>> {
        execute_with(conn, sql, params, bind_sqlite_param)
    }

    fn exec_result(result: &Self::QueryResult) -> ExecResult {
        ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: insert_id(result.last_insert_rowid()),
        }
    }

    fn column_text(row: &Self::Row, idx: usize) -> Result<Option<String>, sqlx::Error> {
        types::sqlite::column_text(row, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kinds() {
        assert_eq!(<MySql as Backend>::KIND, DatabaseType::MySQL);
        assert_eq!(<Postgres as Backend>::KIND, DatabaseType::PostgreSQL);
        assert_eq!(<Sqlite as Backend>::KIND, DatabaseType::SQLite);
    }

    #[test]
    fn test_insert_id_zero_is_none() {
        assert_eq!(insert_id(0), None);
        assert_eq!(insert_id(7), Some(7));
    }
}
