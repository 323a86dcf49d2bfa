//! HTTP server wiring.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::AdmissionLayer;
use crate::error::{Result, WardenError};

/// Build the protected router: the downstream handler behind admission control.
pub fn protected_router(admission: AdmissionLayer) -> Router {
    Router::new().route("/", get(hello)).layer(admission)
}

async fn hello() -> &'static str {
    "Hello, World!"
}

/// An HTTP listener serving one router.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Name used in logs
    name: &'static str,
    /// Routes to serve
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(name: &'static str, addr: SocketAddr, router: Router) -> Self {
        Self { addr, name, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests finish.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(server = self.name, addr = %self.addr, error = %e, "Failed to bind");
            WardenError::Io(e)
        })?;

        info!(
            server = self.name,
            addr = %self.addr,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(server = self.name, error = %e, "HTTP server failed");
            WardenError::Io(e)
        })
    }
}
