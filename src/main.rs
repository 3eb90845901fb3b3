use anyhow::Context;
use core_runtime::config::RelayConfig;
use core_runtime::logging::{init_logging, LoggingConfig};
use core_service::{CoreDependencies, CoreService};
use playback_relay::create_router;
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default()).context("failed to initialize logging")?;

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    let deps = CoreDependencies::desktop(&config).context("failed to create host bridges")?;
    let port = config.port;
    let core = CoreService::bootstrap(config, deps).context("failed to start relay core")?;

    core.session().start();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, auth_url = %core.config().auth_url(), "Playback relay listening");

    axum::serve(listener, create_router(core.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    core.session().stop();
    info!("Playback relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
