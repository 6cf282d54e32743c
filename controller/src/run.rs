//! Server startup and graceful shutdown.

use alloc::sync::Arc;
use core::net::{IpAddr, SocketAddr};

use eyre::WrapErr as _;
use tokio::{net, signal};
use tracing::info;

use crate::app::{AppState, coordinator::Coordinator};
use crate::config::ControllerConfig;
use crate::http::server;
use crate::provider::InstanceBackend;

/// Creates a future that resolves when a shutdown signal is received.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to create SIGTERM signal handler");
        let _ = sigterm.recv().await;
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Builds the coordinator and serves the control surface until shutdown.
///
/// In-flight operations are abandoned on shutdown; the next process start
/// reconciles against the provider before trusting any phase.
///
/// # Errors
///
/// Returns an error if the bind address is invalid or the listener cannot be
/// bound.
pub async fn start(config: ControllerConfig, backend: InstanceBackend) -> eyre::Result<()> {
    let listen_ip: IpAddr = config
        .server
        .bind
        .parse()
        .wrap_err(format!("Invalid bind address: {}", config.server.bind))?;
    let addr = SocketAddr::from((listen_ip, config.server.port));

    let coordinator = Coordinator::new(backend, config.policy.clone());
    let app_state = AppState {
        config: Arc::new(config),
        coordinator,
    };
    let app = server::create_app(app_state);

    let listener = net::TcpListener::bind(addr)
        .await
        .wrap_err(format!("Failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    let served = axum::serve(listener, app);
    tokio::select! {
        result = served => result?,
        () = shutdown_signal() => {
            info!("Received shutdown, shutting down");
        }
    }

    Ok(())
}
