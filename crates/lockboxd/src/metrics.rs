//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness probe (500 when storage is unreachable)
//!   GET /readyz   Readiness probe (503 once shutdown has begun)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;
use std::path::Path;
use std::sync::Arc;

use lockbox_core::config::StorageConfig;
use lockbox_transfer::ShutdownCoordinator;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    Upload,
    Download,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Ok,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TransferLabels {
    direction: Direction,
    outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DirectionLabels {
    direction: Direction,
}

/// File transfer counters, cheap to clone into transfer tasks
#[derive(Clone, Debug, Default)]
pub struct TransferMetrics {
    transfers: Family<TransferLabels, Counter>,
    bytes: Family<DirectionLabels, Counter>,
    in_flight: Gauge,
}

impl TransferMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "lockbox_transfers",
            "File transfers by direction and outcome",
            metrics.transfers.clone(),
        );
        registry.register(
            "lockbox_transfer_bytes",
            "Payload bytes moved by file transfers",
            metrics.bytes.clone(),
        );
        registry.register(
            "lockbox_transfers_in_flight",
            "File transfers currently running",
            metrics.in_flight.clone(),
        );
        metrics
    }

    /// Count one transfer as running until the returned handle is finished or dropped.
    pub fn begin(&self, direction: Direction) -> TransferTracker {
        self.in_flight.inc();
        TransferTracker {
            metrics: self.clone(),
            direction,
        }
    }
}

#[must_use]
#[derive(Debug)]
pub struct TransferTracker {
    metrics: TransferMetrics,
    direction: Direction,
}

impl TransferTracker {
    pub fn finish<E>(self, result: Result<u64, &E>) {
        let outcome = match result {
            Ok(bytes) => {
                self.metrics
                    .bytes
                    .get_or_create(&DirectionLabels {
                        direction: self.direction,
                    })
                    .inc_by(bytes);
                Outcome::Ok
            }
            Err(_) => Outcome::Error,
        };
        self.metrics
            .transfers
            .get_or_create(&TransferLabels {
                direction: self.direction,
                outcome,
            })
            .inc();
    }
}

impl Drop for TransferTracker {
    fn drop(&mut self) {
        self.metrics.in_flight.dec();
    }
}

/// Shared health state for the HTTP endpoints
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub storage: StorageConfig,
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9190")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: 200 while the blob directory and the record database are reachable.
async fn healthz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match check_storage(&state.storage).await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(reason) => {
            tracing::warn!("health check failed: {reason}");
            (StatusCode::INTERNAL_SERVER_ERROR, reason)
        }
    }
}

async fn check_storage(storage: &StorageConfig) -> Result<(), String> {
    let blobs = tokio::fs::metadata(&storage.blob_dir)
        .await
        .map_err(|e| format!("blob dir {}: {e}", storage.blob_dir.display()))?;
    if !blobs.is_dir() {
        return Err(format!("blob dir {} is not a directory", storage.blob_dir.display()));
    }

    // The database file appears on the first write; until then its directory must exist.
    let db = &storage.db_path;
    match tokio::fs::metadata(db).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(format!("database {} is not a file", db.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let parent = db.parent().unwrap_or(Path::new("."));
            match tokio::fs::metadata(parent).await {
                Ok(meta) if meta.is_dir() => Ok(()),
                _ => Err(format!("database dir {} is unreachable", parent.display())),
            }
        }
        Err(e) => Err(format!("database {}: {e}", db.display())),
    }
}

/// Readiness probe: 200 while admitting transfers, 503 while draining.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if state.coordinator.is_admitting() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    }
}
