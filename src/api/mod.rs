// src/api/mod.rs

//! The orchestration API boundary: the sole external entry point by which
//! CLI and peer agents change orchestration intent (spec.md §4.5/§6). Two
//! transports share one action set: the `axum` HTTP surface (`http`, `sse`)
//! and the raw framed-JSON UNIX socket protocol (`wire`).

pub mod http;
pub mod snapshot;
pub mod sse;
pub mod wire;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::events::EventBus;
pub use http::AppState;
use snapshot::ClusterSnapshot;

/// Runs the HTTP API server on `addr` until `cancel` fires, mirroring
/// `server/metrics_server.rs`'s bind/serve/graceful-shutdown idiom.
pub async fn run_http_server(addr: std::net::SocketAddr, state: AppState, cancel: CancellationToken) {
    let app = http::router(state);
    info!(%addr, "orchestration API listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind orchestration API listener");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("orchestration API shutting down");
        })
        .await
        .ok();
}

/// Spawns the snapshot maintainer and returns the snapshot handle, for
/// wiring into `AppState`.
pub async fn spawn_snapshot(bus: EventBus, cancel: CancellationToken) -> ClusterSnapshot {
    let snapshot = ClusterSnapshot::new();
    let snap = snapshot.clone();
    let bus_for_task = bus.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = snapshot::run(snap, bus_for_task) => {}
        }
    });
    snapshot
}
