// src/server/initialization.rs

//! Handles the complete daemon initialization process: filesystem layout,
//! the event bus, and the heartbeat controller. Mirrors the teacher's
//! `initialization::setup` staging (state first, listeners and background
//! actors after), minus persistence loading and TLS, which do not apply to
//! this daemon's scope.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::context::ServerContext;
use crate::api;
use crate::config::Config;
use crate::core::events::EventBus;
use crate::core::hbctrl::{self, HeartbeatTransport, UdpRingTransport};

/// Initializes all daemon components before the actor fleet is spawned.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    setup_filesystem_layout(&config).await?;

    let cancel = CancellationToken::new();
    let bus = EventBus::new();

    let transports: Vec<Arc<dyn HeartbeatTransport>> = config
        .heartbeats
        .iter()
        .map(|hb| {
            Arc::new(UdpRingTransport::new(
                hb.name.clone(),
                hb.peers.clone(),
                hb.bind_addr,
                hb.poll_interval,
            )) as Arc<dyn HeartbeatTransport>
        })
        .collect();

    let hb_aggregator = hbctrl::spawn(
        bus.clone(),
        config.localhost.clone(),
        transports,
        config.heartbeat_timeout,
        cancel.clone(),
    )
    .await;

    let snapshot = api::spawn_snapshot(bus.clone(), cancel.clone()).await;

    Ok(ServerContext {
        config: Arc::new(config),
        bus,
        snapshot,
        hb_aggregator,
        cancel,
        background_tasks: JoinSet::new(),
    })
}

/// `certs/`, `lsnr/`, `var/` under the configured root, per spec.md §6. The
/// certs directory is meant to live on tmpfs (`nosuid,nodev,noexec,size=1m`)
/// mounted by the process supervisor; mounting it is out of scope here, but
/// the directory is created with owner-only permissions regardless of
/// backing filesystem.
async fn setup_filesystem_layout(config: &Config) -> Result<()> {
    for dir in [config.certs_dir(), config.lsnr_dir(), config.var_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    let certs_dir = config.certs_dir();
    let metadata = tokio::fs::metadata(&certs_dir).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o700);
    tokio::fs::set_permissions(&certs_dir, perms)
        .await
        .with_context(|| format!("failed to set permissions on {}", certs_dir.display()))?;
    Ok(())
}

fn log_startup_info(config: &Config) {
    info!(
        localhost = %config.localhost,
        raw_port = config.raw_port,
        https_port = config.https_port,
        root = %config.root,
        "clustord starting"
    );
    if config.cluster_nodes.is_empty() {
        return;
    }
    info!(nodes = ?config.cluster_nodes, "initial cluster membership");
}
