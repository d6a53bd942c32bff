use anyhow::Context;
use query_stream::{AppState, Config, PgSource, serve};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let source = PgSource::connect(&config)
        .await
        .context("Unable to connect to database")?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Unable to bind {}", config.listen_addr))?;

    let state = AppState {
        source,
        encoder: config.encoder,
        max_body_bytes: config.max_body_bytes,
    };
    serve(listener, state).await?;

    Ok(())
}
