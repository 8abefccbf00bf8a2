use anyhow::{Context, Result};
use roster::{api, member_router, stream, AppState, Config, HttpGateway, InMemoryStore, Reconciler};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,roster=debug".into()),
        )
        .init();

    let config = Config::from_env().context("load configuration")?;
    tracing::info!(topic = %config.stream.topic, "starting roster");

    let gateway = HttpGateway::new(config.gateway.clone()).context("build gateway client")?;
    let reconciler = Arc::new(Reconciler::new(Arc::new(InMemoryStore::new()), Arc::new(gateway)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = stream::spawn(
        config.stream.clone(),
        member_router(Arc::clone(&reconciler)),
        shutdown_rx.clone(),
    );

    let app = api::router(AppState {
        reconciler,
        stream_state: tasks.consumer.state(),
    });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "HTTP API listening");

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(reason = %e, "listen for ctrl-c");
        }
        tracing::info!("shutting down");
        let _ = shutdown_tx.send(true);
    });

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server")?;
    tasks.join().await;
    Ok(())
}
