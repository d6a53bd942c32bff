//! PostgreSQL query source.
//!
//! [`PgSource`] wraps a connection pool and implements [`QuerySource`]: it
//! checks out a connection, prepares the statement to learn the result
//! columns, and returns a [`Cursor`] whose row stream owns the connection for
//! as long as rows are being read. Column values are decoded from their
//! binary wire form by [`crate::wire`].

use async_stream::stream;
use futures::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, PgValueFormat};
use sqlx::{Column as _, Executor, Postgres, Row as _, Statement as _, TypeInfo as _, ValueRef as _};

use crate::config::Config;
use crate::cursor::{Cursor, QuerySource};
use crate::error::{Error, Result};
use crate::types::{Column, Row};
use crate::value::Value;
use crate::wire;

/// Pool-backed query source.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone, Debug)]
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from the configuration and wrap it.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(Error::Connection)?;

        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl QuerySource for PgSource {
    async fn open(&self, sql: String) -> Result<Cursor> {
        let mut conn = self.pool.acquire().await.map_err(Error::Connection)?;

        // Preparing first gives us the column list even for empty results,
        // and rejects bad SQL before anything is streamed.
        let columns: Vec<Column> = {
            let statement = (&mut *conn).prepare(&sql).await.map_err(Error::Query)?;
            statement
                .columns()
                .iter()
                .map(|c| Column::new(c.name(), c.ordinal(), c.type_info().name()))
                .collect()
        };
        tracing::debug!(columns = columns.len(), "statement prepared");

        let layout = columns.clone();
        let rows = stream! {
            let mut conn = conn;
            let mut fetched = sqlx::query::<Postgres>(&sql).fetch(&mut *conn);
            loop {
                match fetched.try_next().await {
                    Ok(Some(row)) => yield decode_row(&row, &layout),
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::Database(e));
                        break;
                    }
                }
            }
        };

        Ok(Cursor::new(columns, Box::pin(rows)))
    }
}

/// Decode every column of a row into values.
fn decode_row(row: &PgRow, columns: &[Column]) -> Result<Row> {
    columns.iter().map(|column| decode_value(row, column)).collect()
}

fn decode_value(row: &PgRow, column: &Column) -> Result<Value> {
    let raw = row
        .try_get_raw(column.ordinal)
        .map_err(|source| decode_error(column, source))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let decoded = match raw.format() {
        PgValueFormat::Binary => raw.as_bytes().and_then(|bytes| wire::decode(column.kind, bytes)),
        PgValueFormat::Text => raw.as_str().map(|text| Value::Text(text.to_owned())),
    };
    decoded.map_err(|e| decode_error(column, sqlx::Error::Decode(e)))
}

fn decode_error(column: &Column, source: sqlx::Error) -> Error {
    Error::Decode {
        column: column.name.clone(),
        source,
    }
}
