//! Pull-based cursor over a query result set.
//!
//! A [`Cursor`] owns the row stream of one query, and through it the pooled
//! connection the query runs on. Rows are pulled one at a time with
//! [`Cursor::next`]; nothing is read ahead except the single row taken by
//! [`Cursor::prime`].

use std::future::Future;
use std::pin::Pin;

use futures::{Stream, StreamExt, stream};

use crate::error::Result;
use crate::types::{Column, Row};

/// Boxed stream of decoded rows backing a cursor.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row>> + Send>>;

/// Something that can execute a query and hand back a cursor.
///
/// The connection pool is injected into the server through this trait, so
/// tests can serve scripted result sets without a database.
pub trait QuerySource: Send + Sync + 'static {
    /// Submit `sql` verbatim and open a cursor over its result.
    ///
    /// Errors returned here happen before the response is committed.
    fn open(&self, sql: String) -> impl Future<Output = Result<Cursor>> + Send;
}

/// Forward-only, non-restartable cursor over a result set.
pub struct Cursor {
    columns: Vec<Column>,
    rows: RowStream,
    primed: Option<Row>,
    done: bool,
}

impl Cursor {
    /// Create a cursor from column metadata and a row stream.
    pub fn new(columns: Vec<Column>, rows: RowStream) -> Self {
        Self {
            columns,
            rows,
            primed: None,
            done: false,
        }
    }

    /// Column metadata, available before iteration starts.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Pull the first row ahead of time.
    ///
    /// Execution errors raised while producing the first row surface here,
    /// while they can still become an HTTP status.
    pub async fn prime(mut self) -> Result<Self> {
        match self.rows.next().await {
            Some(Ok(row)) => self.primed = Some(row),
            Some(Err(e)) => return Err(e),
            None => self.finish(),
        }
        Ok(self)
    }

    /// Advance by one row.
    ///
    /// Returns `Ok(None)` at the end of the result set. After the end or an
    /// error the cursor stays exhausted and keeps returning `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.primed.take() {
            return Ok(Some(row));
        }
        if self.done {
            return Ok(None);
        }
        match self.rows.next().await {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => {
                self.finish();
                Err(e)
            }
            None => {
                self.finish();
                Ok(None)
            }
        }
    }

    /// Whether the cursor has been fully consumed or has failed.
    pub fn is_exhausted(&self) -> bool {
        self.done && self.primed.is_none()
    }

    /// Release the row stream and its connection.
    pub fn close(self) {
        tracing::debug!(
            columns = self.columns.len(),
            exhausted = self.is_exhausted(),
            "cursor closed"
        );
    }

    // Drops the underlying stream right away so the connection goes back to
    // the pool without waiting for the cursor itself to be dropped.
    fn finish(&mut self) {
        self.done = true;
        self.rows = Box::pin(stream::empty());
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("columns", &self.columns)
            .field("primed", &self.primed.is_some())
            .field("done", &self.done)
            .finish()
    }
}
