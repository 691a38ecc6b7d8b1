//! Typed and untyped views over a [`Cursor`].
//!
//! The scanner turns raw rows into records (`T: FromRow`) or into
//! [`RowMap`]s of natively rendered text. Scans are exposed as pull-based
//! streams: the cursor advances only when the consumer asks for the next
//! element, and a cancellation token ends the stream without closing the
//! cursor.

use crate::db::backend::Backend;
use crate::db::cursor::Cursor;
use crate::error::{DbError, DbResult};
use crate::models::{NULL_SENTINEL, RowMap};
use futures_util::stream::{self, Stream, StreamExt};
use sqlx::{Database, FromRow};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reads records of type `T` out of a cursor.
pub struct Scanner<'c, DB: Backend, T = ()> {
    cursor: Cursor<'c, DB>,
    scan_error: Option<DbError>,
    _record: PhantomData<fn() -> T>,
}

impl<'c, DB: Backend, T> Scanner<'c, DB, T> {
    pub fn new(cursor: Cursor<'c, DB>) -> Self {
        Self {
            cursor,
            scan_error: None,
            _record: PhantomData,
        }
    }

    /// Column names of the current result set.
    pub async fn columns(&mut self) -> DbResult<Vec<String>> {
        self.cursor.columns().await
    }

    /// Stream every remaining row of the current result set as a [`RowMap`].
    ///
    /// Values are rendered with the engine's own textual conversion, SQL
    /// NULL becomes [`NULL_SENTINEL`]. Fails up front if the columns cannot
    /// be read.
    pub async fn scan_to_row_map(
        &mut self,
        cancel: CancellationToken,
    ) -> DbResult<impl Stream<Item = RowMap> + Send + '_> {
        let columns = self.cursor.columns().await?;

        Ok(stream::unfold(
            (self, columns, cancel),
            |(scanner, columns, cancel)| async move {
                if !advance_unless_cancelled(&mut scanner.cursor, &cancel).await {
                    return None;
                }
                let row = scanner.cursor.row()?;
                match render_row::<DB>(row, &columns) {
                    Ok(map) => Some((map, (scanner, columns, cancel))),
                    Err(err) => {
                        warn!(error = %err, "Row rendering failed, ending scan");
                        scanner.scan_error = Some(err);
                        None
                    }
                }
            },
        )
        .fuse())
    }

    /// Reuse the cursor for records of another type, e.g. for a following
    /// result set with a different shape.
    pub fn with_record<U>(self) -> Scanner<'c, DB, U> {
        Scanner {
            cursor: self.cursor,
            scan_error: self.scan_error,
            _record: PhantomData,
        }
    }

    /// Discard the rest of the current result set and move to the next one.
    pub async fn has_next_result_set(&mut self) -> bool {
        self.cursor.next_result_set().await
    }

    /// First scan failure, else the cursor's terminal error.
    pub fn error(&self) -> Option<&DbError> {
        self.scan_error.as_ref().or_else(|| self.cursor.error())
    }

    /// Release the underlying cursor.
    pub fn close(self) -> DbResult<()> {
        self.cursor.close()
    }
}

impl<'c, DB, T> Scanner<'c, DB, T>
where
    DB: Backend,
    T: for<'r> FromRow<'r, DB::Row> + Send,
{
    /// Decode exactly one row.
    ///
    /// Returns [`DbError::NoRows`] when the result set is empty and the
    /// cursor's own error when it failed before yielding a row.
    pub async fn scan_first(&mut self) -> DbResult<T> {
        if !self.cursor.advance().await {
            return Err(self.cursor.error().cloned().unwrap_or(DbError::NoRows));
        }
        let row = self
            .cursor
            .row()
            .ok_or_else(|| DbError::internal("Cursor advanced without a row"))?;
        match T::from_row(row) {
            Ok(record) => Ok(record),
            Err(err) => {
                let err = DbError::from(err);
                self.scan_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Stream every remaining row of the current result set as `T`.
    ///
    /// The stream ends at the end of the set, on the first decode failure
    /// (kept for [`Scanner::error`]), or silently once `cancel` fires.
    pub fn scan_all(&mut self, cancel: CancellationToken) -> impl Stream<Item = T> + Send + '_ {
        stream::unfold((self, cancel), |(scanner, cancel)| async move {
            if !advance_unless_cancelled(&mut scanner.cursor, &cancel).await {
                return None;
            }
            let row = scanner.cursor.row()?;
            match T::from_row(row) {
                Ok(record) => Some((record, (scanner, cancel))),
                Err(err) => {
                    let err = DbError::from(err);
                    warn!(error = %err, "Record decoding failed, ending scan");
                    scanner.scan_error = Some(err);
                    None
                }
            }
        })
        .fuse()
    }
}

impl<DB: Backend, T> std::fmt::Debug for Scanner<'_, DB, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("cursor", &self.cursor)
            .field("scan_error", &self.scan_error)
            .finish()
    }
}

impl<'c, DB: Backend, T> From<Cursor<'c, DB>> for Scanner<'c, DB, T> {
    fn from(cursor: Cursor<'c, DB>) -> Self {
        Self::new(cursor)
    }
}

async fn advance_unless_cancelled<DB: Database>(
    cursor: &mut Cursor<'_, DB>,
    cancel: &CancellationToken,
) -> bool {
    if cancel.is_cancelled() {
        debug!(rows_read = cursor.rows_read(), "Scan cancelled");
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Scan cancelled while waiting for a row");
            false
        }
        // A row pulled before the token fired is still delivered
        more = cursor.advance() => more,
    }
}

fn render_row<DB: Backend>(row: &DB::Row, columns: &[String]) -> DbResult<RowMap> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let text = DB::column_text(row, idx)?.unwrap_or_else(|| NULL_SENTINEL.to_string());
            Ok((name.clone(), text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::{Either, Sqlite};
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_while_waiting_for_row_ends_scan() {
        let cursor = Cursor::<Sqlite>::new(stream::pending().boxed());
        let mut scanner = Scanner::<_, (i64,)>::new(cursor);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let rows: Vec<(i64,)> = tokio::time::timeout(
            Duration::from_secs(5),
            scanner.scan_all(cancel).collect(),
        )
        .await
        .expect("scan did not observe cancellation");
        assert!(rows.is_empty());
        assert!(scanner.error().is_none());
        scanner.close().unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_token_ends_scan_before_advancing() {
        let cursor = Cursor::<Sqlite>::buffered(vec![Either::Left(Default::default())]);
        let mut scanner = Scanner::<_, (i64,)>::new(cursor);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let rows: Vec<(i64,)> = scanner.scan_all(cancel).collect().await;
        assert!(rows.is_empty());
        assert_eq!(scanner.cursor.rows_read(), 0);
    }
}
