//! Server-side iteration state of one executed statement.
//!
//! A cursor walks the rows of the current result set one at a time and can
//! move on to the next result set when the statement text held several
//! statements. Rows are pulled from the driver only when the caller advances,
//! so nothing is buffered beyond a single look-ahead step.

use crate::db::backend::RowStream;
use crate::error::{DbError, DbResult};
use futures_util::StreamExt;
use futures_util::stream;
use sqlx::{Column, Database, Either, Row};
use tracing::debug;

enum Step<R> {
    Row(R),
    EndOfSet,
}

/// An open result stream.
///
/// Dropping the cursor releases its connection; [`Cursor::close`] does the
/// same explicitly and consumes the cursor, so it cannot be closed twice.
pub struct Cursor<'c, DB: Database> {
    stream: RowStream<'c, DB>,
    peeked: Option<Step<DB::Row>>,
    current: Option<DB::Row>,
    /// The current result set has no rows left.
    set_done: bool,
    /// The driver stream has ended (or failed).
    exhausted: bool,
    error: Option<DbError>,
    rows_read: u64,
}

impl<'c, DB: Database> Cursor<'c, DB> {
    pub(crate) fn new(stream: RowStream<'c, DB>) -> Self {
        Self {
            stream,
            peeked: None,
            current: None,
            set_done: false,
            exhausted: false,
            error: None,
            rows_read: 0,
        }
    }

    /// Wait for the first response so statement errors surface at query time.
    pub(crate) async fn prime(&mut self) -> DbResult<()> {
        if self.peeked.is_some() {
            return Ok(());
        }
        match self.pull().await {
            Some(step) => {
                self.peeked = Some(step);
                Ok(())
            }
            None => match self.error.take() {
                Some(err) => Err(err),
                None => Ok(()),
            },
        }
    }

    // Cancel-safe: the only await is on the stream itself.
    async fn pull(&mut self) -> Option<Step<DB::Row>> {
        if let Some(step) = self.peeked.take() {
            return Some(step);
        }
        if self.exhausted {
            return None;
        }
        match self.stream.next().await {
            Some(Ok(Either::Right(row))) => Some(Step::Row(row)),
            Some(Ok(Either::Left(_))) => Some(Step::EndOfSet),
            Some(Err(err)) => {
                self.exhausted = true;
                self.error = Some(DbError::from_stream(err));
                None
            }
            None => {
                self.exhausted = true;
                None
            }
        }
    }

    /// Column names of the current result set.
    ///
    /// A result set that has no rows reports no columns.
    pub async fn columns(&mut self) -> DbResult<Vec<String>> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if let Some(row) = &self.current {
            return Ok(column_names::<DB>(row));
        }
        if self.set_done {
            return Ok(Vec::new());
        }
        if self.peeked.is_none() {
            match self.pull().await {
                Some(step) => self.peeked = Some(step),
                None => {
                    if let Some(err) = &self.error {
                        return Err(err.clone());
                    }
                }
            }
        }
        match &self.peeked {
            Some(Step::Row(row)) => Ok(column_names::<DB>(row)),
            _ => Ok(Vec::new()),
        }
    }

    /// Move to the next row of the current result set.
    ///
    /// Returns `false` at the end of the set or when the stream failed; check
    /// [`Cursor::error`] to tell the two apart.
    pub async fn advance(&mut self) -> bool {
        self.current = None;
        if self.set_done {
            return false;
        }
        match self.pull().await {
            Some(Step::Row(row)) => {
                self.current = Some(row);
                self.rows_read += 1;
                true
            }
            Some(Step::EndOfSet) | None => {
                self.set_done = true;
                false
            }
        }
    }

    /// The row the cursor is positioned on.
    pub fn row(&self) -> Option<&DB::Row> {
        self.current.as_ref()
    }

    /// Discard what is left of the current result set and position at the
    /// start of the next one. Returns `false` when there is none.
    pub async fn next_result_set(&mut self) -> bool {
        while !self.set_done {
            self.advance().await;
        }
        self.current = None;
        if self.error.is_some() {
            return false;
        }
        match self.pull().await {
            Some(step) => {
                self.peeked = Some(step);
                self.set_done = false;
                true
            }
            None => false,
        }
    }

    /// The error that ended the stream, if any.
    pub fn error(&self) -> Option<&DbError> {
        self.error.as_ref()
    }

    /// Rows delivered so far across all result sets.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Release the cursor and its connection, unread rows included.
    pub fn close(self) -> DbResult<()> {
        debug!(
            rows_read = self.rows_read,
            drained = self.exhausted,
            "Closing cursor"
        );
        drop(self.stream);
        Ok(())
    }
}

impl<DB: Database> Cursor<'static, DB> {
    /// Replay responses that were read ahead of time.
    pub(crate) fn buffered(steps: Vec<Either<DB::QueryResult, DB::Row>>) -> Self {
        Self::new(stream::iter(steps.into_iter().map(Ok)).boxed())
    }
}

impl<DB: Database> std::fmt::Debug for Cursor<'_, DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("rows_read", &self.rows_read)
            .field("set_done", &self.set_done)
            .field("exhausted", &self.exhausted)
            .field("error", &self.error)
            .finish()
    }
}

fn column_names<DB: Database>(row: &DB::Row) -> Vec<String> {
    row.columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect()
}
