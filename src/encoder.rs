//! Gzip-compressed, newline-delimited JSON response encoding.
//!
//! A response body is one gzip member containing a sequence of independent
//! JSON records, each followed by `\n`:
//!
//! ```text
//! {"columns":["id","name"]}
//! {"rows":[[1,"a"]]}
//! {"rows":[[2,"b"]]}
//! ```
//!
//! The header record always comes first, even when there are no rows. A
//! body that ends without the gzip trailer means the query failed after the
//! response was committed, and the rows received so far must not be treated
//! as complete.

use std::io::Write;

use async_stream::stream;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::{FutureExt, Stream};
use serde::Serialize;

use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::types::{Column, Row};

/// Framing and compression parameters for response streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderSettings {
    /// Maximum rows per `{"rows": ...}` record.
    pub batch_size: usize,
    /// Number of row records between gzip sync flushes.
    ///
    /// The stream is also flushed whenever the cursor has no row ready, so
    /// this only bounds how long a fast query can go between flushes.
    pub flush_records: usize,
    /// Gzip level, 0 (store) to 9 (best).
    pub compression_level: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            flush_records: 64,
            compression_level: 6,
        }
    }
}

#[derive(Serialize)]
struct HeaderRecord<'a> {
    columns: Vec<&'a str>,
}

#[derive(Serialize)]
struct BatchRecord<'a> {
    rows: &'a [Row],
}

/// Incremental encoder for one response body.
///
/// Compressed output accumulates in an internal buffer that the caller drains
/// with [`take_output`](Self::take_output) after every write, so memory stays
/// bounded by one batch plus the deflate window.
pub struct StreamEncoder {
    gz: GzEncoder<Vec<u8>>,
    settings: EncoderSettings,
    records: u64,
    rows: u64,
    unflushed: usize,
}

impl StreamEncoder {
    /// Open the gzip stream and write the header record.
    ///
    /// The header is sync-flushed so a client can read the schema before the
    /// first row arrives.
    pub fn begin(columns: &[Column], settings: EncoderSettings) -> Result<Self> {
        let mut encoder = Self {
            gz: GzEncoder::new(Vec::new(), Compression::new(settings.compression_level)),
            settings,
            records: 0,
            rows: 0,
            unflushed: 0,
        };

        let header = HeaderRecord {
            columns: columns.iter().map(|c| c.name.as_str()).collect(),
        };
        encoder.write_record(&header)?;
        encoder.flush()?;

        Ok(encoder)
    }

    /// Write one record holding `rows`, in order.
    ///
    /// An empty slice writes nothing.
    pub fn write_batch(&mut self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        self.write_record(&BatchRecord { rows })?;
        self.rows += rows.len() as u64;
        self.unflushed += 1;
        if self.unflushed >= self.settings.flush_records {
            self.flush()?;
        }
        Ok(())
    }

    /// Sync-flush the compressor so everything written so far can be decoded.
    pub fn flush(&mut self) -> Result<()> {
        self.gz.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    /// Whether records were written since the last sync flush.
    pub fn has_unflushed(&self) -> bool {
        self.unflushed > 0
    }

    /// Drain the compressed bytes produced so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(self.gz.get_mut())
    }

    /// Number of records written, header included.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Number of rows written.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Finish the gzip member and return the remaining bytes, trailer included.
    pub fn end(self) -> Result<Vec<u8>> {
        Ok(self.gz.finish()?)
    }

    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.gz, record)?;
        self.gz.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }
}

enum PumpState {
    Pending,
    Streaming(StreamEncoder),
    Completed,
    Failed,
}

/// Drives a cursor through an encoder, one output chunk per step.
struct ResponsePump {
    cursor: Option<Cursor>,
    settings: EncoderSettings,
    batch: Vec<Row>,
    state: PumpState,
}

impl ResponsePump {
    fn new(cursor: Cursor, settings: EncoderSettings) -> Self {
        Self {
            cursor: Some(cursor),
            batch: Vec::with_capacity(settings.batch_size),
            settings,
            state: PumpState::Pending,
        }
    }

    fn rows_written(&self) -> u64 {
        match &self.state {
            PumpState::Streaming(encoder) => encoder.rows(),
            _ => 0,
        }
    }

    /// Produce the next chunk of compressed output, or `None` once the body
    /// is complete.
    async fn step(&mut self) -> Result<Option<Vec<u8>>> {
        if let PumpState::Pending = self.state {
            let Some(cursor) = self.cursor.as_ref() else {
                return Ok(None);
            };
            let mut encoder = StreamEncoder::begin(cursor.columns(), self.settings)?;
            let header = encoder.take_output();
            self.state = PumpState::Streaming(encoder);
            return Ok(Some(header));
        }

        loop {
            let PumpState::Streaming(encoder) = &mut self.state else {
                return Ok(None);
            };
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };

            let next = match cursor.next().now_or_never() {
                Some(next) => next?,
                None => {
                    // The cursor would block: hand out what is buffered first
                    if !self.batch.is_empty() {
                        encoder.write_batch(&self.batch)?;
                        self.batch.clear();
                    }
                    if encoder.has_unflushed() {
                        encoder.flush()?;
                    }
                    let output = encoder.take_output();
                    if !output.is_empty() {
                        return Ok(Some(output));
                    }
                    cursor.next().await?
                }
            };

            match next {
                Some(row) => {
                    self.batch.push(row);
                    if self.batch.len() < self.settings.batch_size {
                        continue;
                    }
                }
                None => return self.finish().map(Some),
            }

            encoder.write_batch(&self.batch)?;
            self.batch.clear();

            let output = encoder.take_output();
            if !output.is_empty() {
                return Ok(Some(output));
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<u8>> {
        let PumpState::Streaming(mut encoder) = std::mem::replace(&mut self.state, PumpState::Failed) else {
            return Ok(Vec::new());
        };

        encoder.write_batch(&self.batch)?;
        self.batch.clear();

        let (records, rows) = (encoder.records(), encoder.rows());
        let mut tail = encoder.take_output();
        tail.extend(encoder.end()?);

        self.state = PumpState::Completed;
        self.release();
        tracing::info!(rows, records, "query stream completed");
        Ok(tail)
    }

    /// Abandon the response after a mid-stream failure.
    ///
    /// The encoder is dropped without writing the gzip trailer, so the client
    /// sees a truncated body.
    fn abort(&mut self, error: &Error) {
        let rows = self.rows_written();
        self.state = PumpState::Failed;
        self.batch.clear();
        self.release();
        tracing::error!(rows, error = %error, "query stream aborted after response was committed");
    }

    fn release(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

impl Drop for ResponsePump {
    fn drop(&mut self) {
        if matches!(self.state, PumpState::Pending | PumpState::Streaming(_)) {
            tracing::warn!(
                rows = self.rows_written(),
                "response stream dropped before completion, releasing cursor"
            );
            self.release();
        }
    }
}

/// Turn a cursor into the compressed response body.
///
/// Rows are only pulled when the consumer polls for more output, so a slow
/// client slows down reading from the database. A failure after the header
/// has been produced ends the stream with an error and no gzip trailer.
pub fn stream_response(
    cursor: Cursor,
    settings: EncoderSettings,
) -> impl Stream<Item = Result<Vec<u8>>> + Send + 'static {
    let mut pump = ResponsePump::new(cursor, settings);

    stream! {
        loop {
            match pump.step().await {
                Ok(Some(chunk)) => yield Ok(chunk),
                Ok(None) => break,
                Err(e) => {
                    pump.abort(&e);
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::RowStream;
    use crate::value::Value;
    use flate2::read::GzDecoder;
    use futures::{StreamExt, stream};
    use std::io::Read;

    fn gunzip(bytes: &[u8]) -> std::io::Result<String> {
        let mut out = String::new();
        GzDecoder::new(bytes).read_to_string(&mut out)?;
        Ok(out)
    }

    fn records(text: &str) -> Vec<serde_json::Value> {
        serde_json::Deserializer::from_str(text)
            .into_iter::<serde_json::Value>()
            .map(|r| r.unwrap())
            .collect()
    }

    fn columns() -> Vec<Column> {
        vec![Column::new("a", 0, "INT4"), Column::new("b", 1, "TEXT")]
    }

    fn row(n: i64) -> Row {
        vec![Value::Int(n), Value::Text(format!("r{}", n))]
    }

    fn cursor(items: Vec<Result<Row>>) -> Cursor {
        let rows: RowStream = Box::pin(stream::iter(items));
        Cursor::new(columns(), rows)
    }

    fn settings(batch_size: usize) -> EncoderSettings {
        EncoderSettings {
            batch_size,
            ..EncoderSettings::default()
        }
    }

    async fn drain(cursor: Cursor, settings: EncoderSettings) -> (Vec<u8>, Option<Error>) {
        let mut body = Box::pin(stream_response(cursor, settings));
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(c) => bytes.extend(c),
                Err(e) => return (bytes, Some(e)),
            }
        }
        (bytes, None)
    }

    // =========================================================================
    // StreamEncoder
    // =========================================================================

    #[test]
    fn test_header_only() {
        let mut encoder = StreamEncoder::begin(&columns(), EncoderSettings::default()).unwrap();
        let mut bytes = encoder.take_output();
        assert!(!bytes.is_empty(), "header should be flushed immediately");
        bytes.extend(encoder.end().unwrap());

        assert_eq!(gunzip(&bytes).unwrap(), "{\"columns\":[\"a\",\"b\"]}\n");
    }

    #[test]
    fn test_no_columns() {
        let encoder = StreamEncoder::begin(&[], EncoderSettings::default()).unwrap();
        let bytes = encoder.end().unwrap();
        assert_eq!(gunzip(&bytes).unwrap(), "{\"columns\":[]}\n");
    }

    #[test]
    fn test_batch_records() {
        let mut encoder = StreamEncoder::begin(&columns(), EncoderSettings::default()).unwrap();
        encoder.write_batch(&[row(1)]).unwrap();
        encoder.write_batch(&[row(2), row(3)]).unwrap();
        encoder.write_batch(&[]).unwrap();
        assert_eq!(encoder.records(), 3);
        assert_eq!(encoder.rows(), 3);

        let text = gunzip(&encoder.end().unwrap()).unwrap();
        assert_eq!(
            text,
            concat!(
                "{\"columns\":[\"a\",\"b\"]}\n",
                "{\"rows\":[[1,\"r1\"]]}\n",
                "{\"rows\":[[2,\"r2\"],[3,\"r3\"]]}\n",
            )
        );
    }

    #[test]
    fn test_uncompressed_level() {
        let settings = EncoderSettings {
            compression_level: 0,
            ..EncoderSettings::default()
        };
        let mut encoder = StreamEncoder::begin(&columns(), settings).unwrap();
        encoder.write_batch(&[row(1)]).unwrap();
        let text = gunzip(&encoder.end().unwrap()).unwrap();
        assert_eq!(records(&text).len(), 2);
    }

    // =========================================================================
    // stream_response
    // =========================================================================

    #[tokio::test]
    async fn test_stream_empty_result() {
        let (bytes, err) = drain(cursor(vec![]), settings(1)).await;
        assert!(err.is_none());

        let recs = records(&gunzip(&bytes).unwrap());
        assert_eq!(recs, vec![serde_json::json!({"columns": ["a", "b"]})]);
    }

    #[tokio::test]
    async fn test_stream_one_row_per_record() {
        let items = (1..=4).map(|n| Ok(row(n))).collect();
        let (bytes, err) = drain(cursor(items), settings(1)).await;
        assert!(err.is_none());

        let recs = records(&gunzip(&bytes).unwrap());
        assert_eq!(recs.len(), 5);
        assert_eq!(recs[0], serde_json::json!({"columns": ["a", "b"]}));
        for (i, rec) in recs[1..].iter().enumerate() {
            let n = i as i64 + 1;
            assert_eq!(rec, &serde_json::json!({"rows": [[n, format!("r{}", n)]]}));
        }
    }

    #[tokio::test]
    async fn test_stream_batches_preserve_order_and_count() {
        let items = (1..=7).map(|n| Ok(row(n))).collect();
        let (bytes, err) = drain(cursor(items), settings(3)).await;
        assert!(err.is_none());

        let recs = records(&gunzip(&bytes).unwrap());
        let sizes: Vec<usize> = recs[1..]
            .iter()
            .map(|r| r["rows"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let ids: Vec<i64> = recs[1..]
            .iter()
            .flat_map(|r| r["rows"].as_array().unwrap().clone())
            .map(|row| row[0].as_i64().unwrap())
            .collect();
        assert_eq!(ids, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stream_mid_stream_error_truncates() {
        let failure = Err(Error::Database(sqlx::Error::Protocol("server closed".to_string())));
        let items = vec![Ok(row(1)), Ok(row(2)), failure, Ok(row(4))];
        let (bytes, err) = drain(cursor(items), settings(1)).await;

        assert!(matches!(err, Some(Error::Database(_))));
        assert!(!bytes.is_empty(), "header was already sent");
        assert!(gunzip(&bytes).is_err(), "body must not be a complete gzip stream");
    }

    #[tokio::test]
    async fn test_idle_cursor_flushes_buffered_rows() {
        // Two rows are ready, then the query stalls
        let rows: RowStream = Box::pin(stream::iter(vec![Ok(row(1)), Ok(row(2))]).chain(stream::pending()));
        let settings = EncoderSettings {
            batch_size: 4,
            ..EncoderSettings::default()
        };
        let mut body = Box::pin(stream_response(Cursor::new(columns(), rows), settings));

        let mut bytes = body.next().await.unwrap().unwrap();
        let chunk = body
            .next()
            .now_or_never()
            .expect("buffered rows must not wait for the next row")
            .unwrap()
            .unwrap();
        bytes.extend(chunk);

        let mut text = Vec::new();
        let _ = GzDecoder::new(&bytes[..]).read_to_end(&mut text);
        let recs = records(&String::from_utf8(text).unwrap());
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1], serde_json::json!({"rows": [[1, "r1"], [2, "r2"]]}));

        assert!(body.next().now_or_never().is_none(), "nothing left to send while stalled");
    }

    #[tokio::test]
    async fn test_stream_stops_after_error() {
        let failure = Err(Error::Database(sqlx::Error::Protocol("boom".to_string())));
        let mut body = Box::pin(stream_response(cursor(vec![failure, Ok(row(2))]), settings(1)));

        assert!(body.next().await.unwrap().is_ok());
        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.is_none());
    }
}
