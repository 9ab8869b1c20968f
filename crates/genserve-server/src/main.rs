use clap::Parser;
use genserve_server::server::{
    config::{CliArgs, ServerConfig},
    engine::ReplayEngine,
    service::{context::ServiceContext, handler::router},
    telemetry::init_telemetry,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let engine = Arc::new(ReplayEngine::new(&config));
    let ctx = ServiceContext::new(engine.clone(), config.clone());
    let app = router(ctx.clone());

    let res = if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            let uds_path = config.server_addr.clone();
            let listener = UnixListener::bind(&uds_path)?;
            log_startup_info(&uds_path, &config);
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(ctx))
                .await;
            // A panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let listener = TcpListener::bind(&config.server_addr).await?;
        log_startup_info(&config.server_addr, &config);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(ctx))
            .await
    };

    engine.shutdown().await;
    tracing::info!("Service shut down successfully");
    providers.shutdown();

    res?;
    Ok(())
}

fn log_startup_info(addr: &str, config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting generation service on {} with full config: {:#?}",
            addr,
            config
        );
    } else {
        tracing::info!(
            "Starting generation service on {} with {} workers",
            addr,
            config.num_workers
        );
    }
}

/// Resolves once Ctrl+C or SIGTERM is received and the service has drained.
///
/// In-flight sessions get `SHUTDOWN_TIMEOUT` to finish; the rest are
/// cancelled (and aborted in the engine) before the listener stops.
async fn shutdown_signal(ctx: ServiceContext) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    ctx.shutdown().await;
}
