use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use warden::config::WardenConfig;
use warden::http::{admin_router, protected_router, Admission, AdmissionLayer, HttpServer};
use warden::ratelimit::{
    spawn_sweeper, CounterStore, MemoryStore, RateLimiter, RedisStore, ScopeSelector,
};

/// Fixed-window admission control for HTTP services.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the protected service listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Warden admission control");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = WardenConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = ?config.server.admin_addr,
        tokens = config.limits.tokens.len(),
        "Configuration loaded"
    );

    // The memory store is always the secondary; it doubles as the primary
    // when no Redis URL is configured
    let memory = Arc::new(MemoryStore::new());
    let primary: Arc<dyn CounterStore> = match config.store.redis() {
        Some(redis) => {
            info!(url = %redis.url, "Using Redis as the primary counter store");
            Arc::new(RedisStore::new(&redis)?)
        }
        None => {
            warn!("No Redis URL configured, counting in memory only");
            memory.clone()
        }
    };
    let sweeper = spawn_sweeper(memory.clone(), config.store.sweep_interval());

    let limiter = Arc::new(RateLimiter::new(primary, memory));
    let admission = Admission::new(
        limiter.clone(),
        ScopeSelector::new(config.limits.clone()),
        config.server.api_key_header_name()?,
    );
    info!("Rate limiter initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let protected = HttpServer::new(
        "protected",
        config.server.listen_addr,
        protected_router(AdmissionLayer::new(admission)),
    );
    let mut protected =
        tokio::spawn(protected.serve_with_shutdown(wait_for(shutdown_rx.clone())));

    let mut admin = config.server.admin_addr.map(|addr| {
        let server = HttpServer::new("admin", addr, admin_router(limiter.clone()));
        tokio::spawn(server.serve_with_shutdown(wait_for(shutdown_rx.clone())))
    });

    // Either listener failing (e.g. to bind) ends the process without waiting for a signal
    let mut protected_done = false;
    let mut admin_done = false;
    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut protected => {
            protected_done = true;
            result??;
        }
        result = wait_for_admin(&mut admin) => {
            admin_done = true;
            result??;
        }
    }
    let _ = shutdown_tx.send(true);

    if !protected_done {
        protected.await??;
    }
    if let Some(admin) = admin {
        if !admin_done {
            admin.await??;
        }
    }
    sweeper.abort();

    info!("Warden admission control stopped");
    Ok(())
}

/// Wait for the admin listener, or forever when it is disabled.
async fn wait_for_admin(
    admin: &mut Option<JoinHandle<warden::error::Result<()>>>,
) -> Result<warden::error::Result<()>, JoinError> {
    match admin {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Resolve once the shutdown flag is raised.
async fn wait_for(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
