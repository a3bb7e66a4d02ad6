use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::domain::error::{AppError, Result};
use crate::infrastructure::bootstrap::bootstrap;
use crate::infrastructure::config::AppConfig;
use crate::interfaces::http::start_server;

pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let config = AppConfig::load()?;
    let shutdown = CancellationToken::new();
    let services = bootstrap(&config, shutdown.clone()).await?;

    let (host, port) = config.bind_address();
    let server = start_server(services.state.clone(), &host, port)?;
    let handle = server.handle();
    info!(host = %host, port, "HTTP server listening");

    let server_task = tokio::spawn(server);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
    handle.stop(true).await;
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "HTTP server stopped with an error"),
        Err(err) => return Err(AppError::Internal(format!("HTTP server task failed: {err}"))),
    }

    services.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
