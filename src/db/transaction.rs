//! Transaction handle and the transactional executors.
//!
//! A [`Tx`] owns one in-flight transaction on a dedicated pool connection.
//! `commit` and `rollback` consume it, and dropping it unterminated rolls
//! the transaction back when the connection returns to the pool.
//!
//! The executors on [`Conn`] wrap a single statement or a caller-supplied
//! body in begin/commit, rolling back on failure. What they report when the
//! rollback itself fails is decided by the connection's [`RollbackPolicy`].

use crate::config::RollbackPolicy;
use crate::db::backend::Backend;
use crate::db::cursor::Cursor;
use crate::db::pool::{Conn, guarded};
use crate::error::{DbError, DbResult};
use crate::models::{ExecResult, QueryParam};
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;
use sqlx::{Database, Transaction};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Generate a unique transaction ID.
pub(crate) fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// One in-flight transaction.
pub struct Tx<DB: Database> {
    inner: Transaction<'static, DB>,
    id: String,
    cancel: CancellationToken,
    statement_timeout: Duration,
}

impl<DB: Backend> Tx<DB> {
    pub(crate) fn new(
        inner: Transaction<'static, DB>,
        id: String,
        cancel: CancellationToken,
        statement_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            id,
            cancel,
            statement_timeout,
        }
    }

    /// Correlation id, `tx_` followed by 32 hex digits.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn exec(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<ExecResult> {
        debug!(transaction_id = %self.id, params = params.len(), "Executing statement");
        let fut = DB::execute_conn(&mut *self.inner, sql, params);
        let result = guarded(&self.cancel, self.statement_timeout, "exec", async {
            fut.await.map_err(DbError::from)
        })
        .await?;
        Ok(DB::exec_result(&result))
    }

    /// Run a statement inside the transaction.
    ///
    /// The cursor borrows the transaction, so it has to be closed (or
    /// dropped) before the next statement or the commit.
    pub async fn query<'t>(
        &'t mut self,
        sql: &'t str,
        params: &'t [QueryParam],
    ) -> DbResult<Cursor<'t, DB>> {
        debug!(transaction_id = %self.id, params = params.len(), "Executing query");
        let mut cursor = Cursor::new(DB::fetch_conn(&mut *self.inner, sql, params));
        guarded(&self.cancel, self.statement_timeout, "query", cursor.prime()).await?;
        Ok(cursor)
    }

    pub async fn commit(self) -> DbResult<()> {
        let Self { inner, id, .. } = self;
        inner
            .commit()
            .await
            .map_err(|e| DbError::transaction(format!("Commit failed: {}", e), &id))?;
        info!(transaction_id = %id, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        let Self { inner, id, .. } = self;
        inner
            .rollback()
            .await
            .map_err(|e| DbError::transaction(format!("Rollback failed: {}", e), &id))?;
        info!(transaction_id = %id, "Transaction rolled back");
        Ok(())
    }
}

impl<DB: Database> std::fmt::Debug for Tx<DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

impl<DB: Backend> Conn<DB> {
    /// Run one write statement in its own transaction.
    pub async fn exec_in_transaction(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<ExecResult> {
        let mut tx = self.begin(cancel).await?;
        match tx.exec(sql, params).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(err) => Err(self.abort(tx, err).await),
        }
    }

    /// Run a query in its own transaction and return a cursor that outlives it.
    ///
    /// The transaction's connection goes back to the pool on commit, so every
    /// result set is read inside the transaction and replayed by the cursor.
    pub async fn query_in_transaction(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Cursor<'static, DB>> {
        let mut tx = self.begin(cancel).await?;
        let stream = DB::fetch_conn(&mut *tx.inner, sql, params);
        let collected = guarded(cancel, self.statement_timeout(), "query", async {
            stream
                .try_collect::<Vec<_>>()
                .await
                .map_err(DbError::from_stream)
        })
        .await;

        match collected {
            Ok(steps) => {
                tx.commit().await?;
                Ok(Cursor::buffered(steps))
            }
            Err(err) => Err(self.abort(tx, err).await),
        }
    }

    /// Run `body` inside a transaction.
    ///
    /// Commits when `body` succeeds. When it fails the transaction is rolled
    /// back, and under [`RollbackPolicy::ReportRollback`] the result is the
    /// rollback outcome: a failed body whose rollback succeeds yields `Ok(())`.
    ///
    /// ```ignore
    /// conn.with_transaction(&cancel, |tx| {
    ///     Box::pin(async move {
    ///         tx.exec("UPDATE accounts SET balance = balance - 10 WHERE id = 1", &[]).await?;
    ///         tx.exec("UPDATE accounts SET balance = balance + 10 WHERE id = 2", &[]).await?;
    ///         Ok(())
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn with_transaction<F>(&self, cancel: &CancellationToken, body: F) -> DbResult<()>
    where
        F: for<'t> FnOnce(&'t mut Tx<DB>) -> BoxFuture<'t, DbResult<()>>,
    {
        let mut tx = self.begin(cancel).await?;
        let id = tx.id().to_string();
        match body(&mut tx).await {
            Ok(()) => tx.commit().await,
            Err(err) => {
                let rollback = tx.rollback().await;
                resolve_body_failure(self.rollback_policy(), err, rollback, &id)
            }
        }
    }

    async fn abort(&self, tx: Tx<DB>, cause: DbError) -> DbError {
        let id = tx.id().to_string();
        let rollback = tx.rollback().await;
        resolve_statement_failure(self.rollback_policy(), cause, rollback, &id)
    }
}

/// Error reported when a statement failed and the transaction was rolled back.
fn resolve_statement_failure(
    policy: RollbackPolicy,
    cause: DbError,
    rollback: DbResult<()>,
    transaction_id: &str,
) -> DbError {
    let Err(rollback_err) = rollback else {
        return cause;
    };
    match policy {
        RollbackPolicy::ReportRollback => {
            warn!(
                transaction_id = %transaction_id,
                error = %cause,
                "Statement error superseded by rollback failure"
            );
            rollback_err
        }
        RollbackPolicy::Combine => DbError::rollback_failed(&cause, &rollback_err, transaction_id),
    }
}

/// Outcome of a transaction whose body failed.
fn resolve_body_failure(
    policy: RollbackPolicy,
    cause: DbError,
    rollback: DbResult<()>,
    transaction_id: &str,
) -> DbResult<()> {
    match policy {
        RollbackPolicy::ReportRollback => {
            warn!(
                transaction_id = %transaction_id,
                error = %cause,
                "Transaction body failed, reporting rollback outcome"
            );
            rollback
        }
        RollbackPolicy::Combine => Err(resolve_statement_failure(
            policy,
            cause,
            rollback,
            transaction_id,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cause() -> DbError {
        DbError::database("UNIQUE constraint failed", Some("2067".to_string()), "fix data")
    }

    fn rollback_failure() -> DbError {
        DbError::transaction("Rollback failed: connection reset", "tx_1")
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 3 + 32); // "tx_" + 32 hex chars
        assert_ne!(id, generate_transaction_id());
    }

    #[test]
    fn test_statement_failure_keeps_cause_when_rollback_succeeds() {
        for policy in [RollbackPolicy::ReportRollback, RollbackPolicy::Combine] {
            let err = resolve_statement_failure(policy, cause(), Ok(()), "tx_1");
            assert!(err.to_string().contains("UNIQUE constraint failed"));
        }
    }

    #[test]
    fn test_statement_failure_masked_by_rollback_error() {
        let err = resolve_statement_failure(
            RollbackPolicy::ReportRollback,
            cause(),
            Err(rollback_failure()),
            "tx_1",
        );
        assert!(matches!(err, DbError::Transaction { .. }));
        assert!(!err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn test_statement_failure_combined_with_rollback_error() {
        let err = resolve_statement_failure(
            RollbackPolicy::Combine,
            cause(),
            Err(rollback_failure()),
            "tx_1",
        );
        assert!(matches!(err, DbError::RollbackFailed { .. }));
        let msg = err.to_string();
        assert!(msg.contains("UNIQUE constraint failed"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_body_failure_reports_rollback_outcome() {
        let result = resolve_body_failure(RollbackPolicy::ReportRollback, cause(), Ok(()), "tx_1");
        assert!(result.is_ok());

        let result = resolve_body_failure(
            RollbackPolicy::ReportRollback,
            cause(),
            Err(rollback_failure()),
            "tx_1",
        );
        assert!(matches!(result, Err(DbError::Transaction { .. })));
    }

    #[test]
    fn test_body_failure_combined_returns_cause() {
        let result = resolve_body_failure(RollbackPolicy::Combine, cause(), Ok(()), "tx_1");
        assert!(matches!(result, Err(DbError::Database { .. })));
    }
}
