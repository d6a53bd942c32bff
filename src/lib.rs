//! # query-stream
//!
//! HTTP service that runs SQL against PostgreSQL and streams the result set
//! back as gzip-compressed JSON records, without ever holding the whole
//! result in memory.
//!
//! ## Why?
//!
//! The usual "fetch everything, serialize once" handler falls over on large
//! result sets:
//!
//! ```ignore
//! // Every row is in memory before the first byte goes out
//! let rows: Vec<PgRow> = sqlx::query(sql).fetch_all(&pool).await?;
//! Json(to_json(rows))
//! ```
//!
//! `query-stream` pulls one row at a time from a server-side cursor and
//! writes it straight into the compressed response:
//!
//! ```text
//! POST /query  {"query": "SELECT 1 AS a, 2 AS b"}
//!
//! {"columns":["a","b"]}
//! {"rows":[[1,2]]}
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use query_stream::{AppState, Config, PgSource, serve};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let source = PgSource::connect(&config).await?;
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//!     serve(listener, AppState::new(source)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Bounded memory**: one batch of rows plus the deflate window per request
//! - **Backpressure**: rows are read only as fast as the client accepts bytes
//! - **Schema first**: the column header is sent even for empty results
//! - **Honest failures**: errors after the 200 cut the gzip stream short
//!   instead of pretending the result was complete

pub mod config;
pub mod cursor;
pub mod encoder;
pub mod error;
pub mod postgres;
pub mod server;
pub mod types;
pub mod value;
pub mod wire;

// Re-export main types at crate root
pub use config::Config;
pub use cursor::{Cursor, QuerySource, RowStream};
pub use encoder::{EncoderSettings, StreamEncoder, stream_response};
pub use error::{Error, Result};
pub use postgres::PgSource;
pub use server::{AppState, router, serve};
pub use types::{Column, ColumnKind, QueryRequest, Row};
pub use value::Value;
