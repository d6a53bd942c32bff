//! HTTP surface: the `/query` route and its error mapping.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cursor::QuerySource;
use crate::encoder::{EncoderSettings, stream_response};
use crate::error::{Error, Result};
use crate::types::QueryRequest;

/// Shared state handed to every request.
pub struct AppState<S> {
    /// Where queries are executed.
    pub source: S,
    /// Framing and compression for response bodies.
    pub encoder: EncoderSettings,
    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl<S: QuerySource> AppState<S> {
    /// State with default encoder settings and a 1 MiB body limit.
    pub fn new(source: S) -> Self {
        Self {
            source,
            encoder: EncoderSettings::default(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Build the application router.
pub fn router<S: QuerySource>(state: AppState<S>) -> Router {
    let body_limit = state.max_body_bytes;
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::HEAD])
        .allow_headers([
            header::ORIGIN,
            header::ACCEPT,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-requested-with"),
        ]);

    Router::new()
        .route("/query", post(query_handler::<S>).fallback(method_not_allowed))
        .with_state(Arc::new(state))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the router on `listener` until Ctrl-C.
pub async fn serve<S: QuerySource>(listener: TcpListener, state: AppState<S>) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("query-stream listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// # POST /query
///
/// Executes the query and streams its result. Everything up to and including
/// the first row happens before the 200 is committed; failures there become
/// a 4xx/5xx with a plain-text body.
async fn query_handler<S: QuerySource>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Result<Response> {
    let request: QueryRequest = serde_json::from_slice(&body).map_err(Error::InvalidBody)?;

    let cursor = state.source.open(request.query).await?;
    let cursor = cursor.prime().await.map_err(into_query_error)?;
    tracing::info!(columns = cursor.columns().len(), "streaming query result");

    let body = Body::from_stream(stream_response(cursor, state.encoder));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_ENCODING, HeaderValue::from_static("gzip")),
        ],
        body,
    )
        .into_response())
}

async fn method_not_allowed() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Invalid request method")
}

// A first-row failure is still ahead of the commit point, so it is reported
// the same way as a rejected statement.
fn into_query_error(error: Error) -> Error {
    match error {
        Error::Database(e) => Error::Query(e),
        Error::Decode { source, .. } => Error::Query(source),
        other => other,
    }
}

/// Converts pre-stream errors into plain-text HTTP responses.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidBody(_) | Error::Query(_) => StatusCode::BAD_REQUEST,
            Error::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            Error::InvalidBody(_) => "Invalid request body".to_string(),
            Error::Query(e) => format!("Query error: {}", e),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        (status, message).into_response()
    }
}
