//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so integration tests can
//! spin up a real server on an ephemeral port, exercise the webhook and
//! health endpoints, and shut it down cleanly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::poller::UpdateHandler;
use crate::server::http::{create_router, HttpConfig};

/// Everything needed to start a server.
pub struct ServerConfig {
    pub handler: Arc<dyn UpdateHandler>,
    pub http_config: HttpConfig,
    pub bind_address: SocketAddr,
}

impl ServerConfig {
    /// Minimal config suitable for integration tests: binds to
    /// `127.0.0.1:0` (OS-assigned port) with the default webhook path.
    pub fn for_testing(handler: Arc<dyn UpdateHandler>) -> Self {
        ServerConfig {
            handler,
            http_config: HttpConfig::default(),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

/// Handle to a running server. Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The full local address (ip + port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// A sender for wiring additional background tasks (e.g. the poll loop)
    /// to the same shutdown signal.
    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Trigger graceful shutdown and await the server task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(target: "server", "server task returned error: {}", e),
            Ok(Err(e)) => error!(target: "server", "server task panicked: {}", e),
            Err(_) => warn!(target: "server", "server task did not finish within 5s timeout"),
        }
    }
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(
    config: ServerConfig,
) -> Result<ServerHandle, Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = create_router(&config.http_config, config.handler);

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;

    info!(
        target: "server",
        addr = %local_addr,
        webhook_path = %config.http_config.webhook_path,
        "server listening"
    );

    // Spawn axum::serve as a background tokio task with graceful shutdown
    let mut shutdown_watch = shutdown_rx.clone();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                loop {
                    if *shutdown_watch.borrow() {
                        break;
                    }
                    if shutdown_watch.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
    })
}
