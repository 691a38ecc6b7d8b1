//! Integration tests for transaction functionality against SQLite.

use dbaccess::config::{PoolConfig, RollbackPolicy};
use dbaccess::db::{Conn, Scanner};
use dbaccess::error::DbError;
use dbaccess::models::{QueryParam, RowMap};
use futures_util::StreamExt;
use sqlx::Sqlite;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// Create a test SQLite database with an `accounts` table.
async fn create_test_conn() -> (Conn<Sqlite>, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("Failed to create temp file");
    let url = format!("sqlite:{}?mode=rwc", temp_file.path().display());
    let config = PoolConfig {
        max_open_connections: 3,
        max_idle_connections: 1,
        ..PoolConfig::default()
    };
    let conn = Conn::<Sqlite>::connect(&url, &config)
        .await
        .expect("Failed to connect");

    conn.exec(
        &CancellationToken::new(),
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)",
        &[],
    )
    .await
    .unwrap();

    (conn, temp_file)
}

async fn count_accounts(conn: &Conn<Sqlite>) -> i64 {
    let cancel = CancellationToken::new();
    let cursor = conn
        .query(&cancel, "SELECT count(*) FROM accounts", &[])
        .await
        .unwrap();
    let mut scanner = Scanner::<_, (i64,)>::new(cursor);
    let (count,) = scanner.scan_first().await.unwrap();
    scanner.close().unwrap();
    count
}

#[tokio::test]
async fn test_exec_in_transaction_commits() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    let result = conn
        .exec_in_transaction(
            &cancel,
            "INSERT INTO accounts (id, owner, balance) VALUES (?, ?, ?)",
            &[
                QueryParam::Int(1),
                QueryParam::from("alice"),
                QueryParam::Int(100),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert_eq!(count_accounts(&conn).await, 1);
}

#[tokio::test]
async fn test_exec_in_transaction_failure_leaves_no_writes() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    // The second row violates NOT NULL, so neither row may persist
    let err = conn
        .exec_in_transaction(
            &cancel,
            "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 10), (2, NULL, 20)",
            &[],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Database { .. }));
    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_with_transaction_commits_all_statements() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    conn.with_transaction(&cancel, |tx| {
        Box::pin(async move {
            tx.exec(
                "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100)",
                &[],
            )
            .await?;
            tx.exec(
                "INSERT INTO accounts (id, owner, balance) VALUES (2, 'bob', 50)",
                &[],
            )
            .await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(count_accounts(&conn).await, 2);
}

#[tokio::test]
async fn test_with_transaction_body_failure_reports_rollback_outcome() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    // Duplicate primary key on the second insert
    let result = conn
        .with_transaction(&cancel, |tx| {
            Box::pin(async move {
                tx.exec(
                    "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100)",
                    &[],
                )
                .await?;
                tx.exec(
                    "INSERT INTO accounts (id, owner, balance) VALUES (1, 'mallory', 0)",
                    &[],
                )
                .await?;
                Ok(())
            })
        })
        .await;

    // The rollback succeeded, and that is what gets reported
    assert!(result.is_ok());
    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_with_transaction_body_failure_combined_policy_returns_cause() {
    let (conn, _file) = create_test_conn().await;
    let conn = conn.with_rollback_policy(RollbackPolicy::Combine);
    let cancel = CancellationToken::new();

    let result = conn
        .with_transaction(&cancel, |tx| {
            Box::pin(async move {
                tx.exec(
                    "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100)",
                    &[],
                )
                .await?;
                tx.exec("INSERT INTO no_such_table VALUES (1)", &[]).await?;
                Ok(())
            })
        })
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
    assert!(err.to_string().contains("no_such_table"));
    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_query_in_transaction_cursor_survives_commit() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();
    conn.exec(
        &cancel,
        "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100), (2, 'bob', 50)",
        &[],
    )
    .await
    .unwrap();

    let cursor = conn
        .query_in_transaction(
            &cancel,
            "SELECT owner FROM accounts ORDER BY id; SELECT sum(balance) AS total FROM accounts",
            &[],
        )
        .await
        .unwrap();

    // The transaction is over: the pool can serve writes while the cursor is open
    conn.exec(&cancel, "DELETE FROM accounts", &[]).await.unwrap();

    let mut scanner: Scanner<'_, Sqlite> = Scanner::new(cursor);
    let owners: Vec<RowMap> = scanner
        .scan_to_row_map(cancel.clone())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(owners.len(), 2);
    assert_eq!(owners[0]["owner"], "alice");
    assert_eq!(owners[1]["owner"], "bob");

    assert!(scanner.has_next_result_set().await);
    let totals: Vec<RowMap> = scanner
        .scan_to_row_map(cancel.clone())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(totals[0]["total"], "150");
    assert!(!scanner.has_next_result_set().await);
    scanner.close().unwrap();
}

#[tokio::test]
async fn test_query_in_transaction_failure() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    let err = conn
        .query_in_transaction(&cancel, "SELECT * FROM missing_table", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));

    // The connection went back to the pool in a usable state
    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_explicit_transaction_rollback() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    let mut tx = conn.begin(&cancel).await.unwrap();
    assert!(tx.id().starts_with("tx_"));
    tx.exec(
        "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100)",
        &[],
    )
    .await
    .unwrap();

    // Uncommitted writes are visible inside the transaction
    {
        let cursor = tx
            .query("SELECT id, owner, balance FROM accounts", &[])
            .await
            .unwrap();
        let mut scanner = Scanner::<_, (i64, String, i64)>::new(cursor);
        let row = scanner.scan_first().await.unwrap();
        assert_eq!(row, (1, "alice".to_string(), 100));
        scanner.close().unwrap();
    }

    tx.rollback().await.unwrap();
    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_explicit_transaction_commit() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    let mut tx = conn.begin(&cancel).await.unwrap();
    let result = tx
        .exec(
            "INSERT INTO accounts (owner, balance) VALUES (?, ?)",
            &[QueryParam::from("carol"), QueryParam::Int(7)],
        )
        .await
        .unwrap();
    assert_eq!(result.last_insert_id, Some(1));
    tx.commit().await.unwrap();

    assert_eq!(count_accounts(&conn).await, 1);
}

#[tokio::test]
async fn test_dropped_transaction_is_rolled_back() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    {
        let mut tx = conn.begin(&cancel).await.unwrap();
        tx.exec(
            "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100)",
            &[],
        )
        .await
        .unwrap();
    }

    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_begin_with_cancelled_token() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = conn.begin(&cancel).await.unwrap_err();
    assert!(matches!(err, DbError::Cancelled { .. }));

    let err = conn
        .exec_in_transaction(&cancel, "DELETE FROM accounts", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Cancelled { .. }));
}

// Ending the transaction from SQL makes the executor's own rollback fail
// with "no transaction is active".

#[tokio::test]
async fn test_exec_in_transaction_rollback_failure_masks_statement_error() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    let err = conn
        .exec_in_transaction(
            &cancel,
            "ROLLBACK; INSERT INTO no_such_table VALUES (1)",
            &[],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Transaction { .. }), "{:?}", err);
    assert!(err.to_string().contains("Rollback failed"), "{}", err);
    assert!(!err.to_string().contains("no_such_table"));
}

#[tokio::test]
async fn test_with_transaction_rollback_failure_is_reported() {
    let (conn, _file) = create_test_conn().await;
    let cancel = CancellationToken::new();

    let err = conn
        .with_transaction(&cancel, |tx| {
            Box::pin(async move {
                tx.exec(
                    "INSERT INTO accounts (id, owner, balance) VALUES (1, 'alice', 100)",
                    &[],
                )
                .await?;
                tx.exec("ROLLBACK", &[]).await?;
                tx.exec("INSERT INTO no_such_table VALUES (1)", &[]).await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::Transaction { .. }), "{:?}", err);
    assert!(err.to_string().contains("Rollback failed"), "{}", err);
    assert_eq!(count_accounts(&conn).await, 0);
}

#[tokio::test]
async fn test_with_transaction_rollback_failure_combined_policy_keeps_both() {
    let (conn, _file) = create_test_conn().await;
    let conn = conn.with_rollback_policy(RollbackPolicy::Combine);
    let cancel = CancellationToken::new();

    let err = conn
        .with_transaction(&cancel, |tx| {
            Box::pin(async move {
                tx.exec("ROLLBACK", &[]).await?;
                tx.exec("INSERT INTO no_such_table VALUES (1)", &[]).await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();

    match err {
        DbError::RollbackFailed {
            cause, rollback, ..
        } => {
            assert!(cause.contains("no_such_table"), "{}", cause);
            assert!(rollback.contains("Rollback failed"), "{}", rollback);
        }
        other => panic!("expected RollbackFailed, got {:?}", other),
    }
}
