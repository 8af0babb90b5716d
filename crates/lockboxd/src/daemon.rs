//! Daemon lifecycle: storage, services, signals, bounded drain on shutdown

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lockbox_core::config::VaultConfig;
use lockbox_storage::{BlobLayout, RecordStore, ResourceStore, UserStore};
use lockbox_transfer::{Pipeline, ShutdownCoordinator, ShutdownOutcome};

use crate::auth::{AuthInterceptor, AuthService, TokenRegistry};
use crate::grpc::{self, Endpoint};
use crate::metrics::{HealthState, TransferMetrics};
use crate::resources::ResourcesService;

pub async fn run(config: VaultConfig) -> Result<()> {
    info!("daemon starting");

    let store: Arc<dyn ResourceStore> = Arc::new(
        RecordStore::open(&config.storage.db_path)
            .with_context(|| format!("opening record store {}", config.storage.db_path.display()))?,
    );
    let users_path = UserStore::path_beside(&config.storage.db_path);
    let users = Arc::new(
        UserStore::open(&users_path)
            .with_context(|| format!("opening user store {}", users_path.display()))?,
    );
    let blobs = BlobLayout::new(&config.storage.blob_dir);
    blobs.ensure().await?;
    info!(
        db = %config.storage.db_path.display(),
        blobs = %blobs.root().display(),
        "storage ready"
    );

    let coordinator = Arc::new(ShutdownCoordinator::new(&config.shutdown));

    // Start Prometheus metrics endpoint
    let mut registry = prometheus_client::registry::Registry::default();
    let metrics = TransferMetrics::register(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            coordinator: coordinator.clone(),
            storage: config.storage.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let endpoint = match &config.daemon.listen {
        Some(addr) => Endpoint::Tcp(
            addr.parse()
                .with_context(|| format!("invalid listen address {addr}"))?,
        ),
        None => Endpoint::Unix(config.daemon.socket.clone()),
    };

    // The gRPC server stops once draining is over, whichever way it ended.
    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        coordinator.on_release(move || stop.cancel());
    }
    if let Endpoint::Unix(socket) = &endpoint {
        let socket = socket.clone();
        coordinator.on_release(move || {
            let _ = std::fs::remove_file(&socket);
        });
    }

    let tokens = TokenRegistry::default();
    let pipeline = Pipeline::new(&config.transfer).with_max_size(config.storage.max_blob_size);
    let router = grpc::router(
        AuthService::new(users, tokens.clone()),
        ResourcesService::new(store, blobs, pipeline, coordinator.clone(), metrics),
        AuthInterceptor::new(tokens),
    );

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            match wait_for_signal().await {
                Ok(signal) => info!(signal, "shutdown signal received"),
                Err(e) => error!("signal handler failed: {e}  (shutting down)"),
            }
            if coordinator.request_shutdown().await == ShutdownOutcome::TimedOut {
                error!("forced shutdown");
            }
        });
    }

    notify_ready();
    grpc::serve(&endpoint, router, stop).await?;

    info!("daemon stopped");
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        ctrl_c = tokio::signal::ctrl_c() => ctrl_c.map(|()| "SIGINT"),
    }
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
