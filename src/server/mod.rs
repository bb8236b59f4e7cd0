// src/server/mod.rs

//! Assembles and runs the daemon: `initialization::setup` builds a
//! `ServerContext`, this module spawns the actor fleet and external
//! surfaces onto it, then waits for a shutdown signal.

mod context;
mod initialization;
mod metrics_server;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::core::imon::crm::LoggingCrm;
use crate::core::imon::{self, ImonState, ImonTunables};
use crate::core::model::instance::InstanceConfig;
use crate::core::nmon::{self, ClusterConfig, NmonState};
use crate::core::path::Path as ObjPath;

pub use context::ServerContext;

/// Runs the daemon to completion: spawn every actor and external surface,
/// then block until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let mut ctx = initialization::setup(config).await?;

    spawn_nmon(&mut ctx);
    spawn_imons(&mut ctx);
    spawn_api(&mut ctx);
    spawn_metrics(&mut ctx);

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    ctx.cancel.cancel();

    while ctx.background_tasks.join_next().await.is_some() {}
    info!("clustord stopped");
    Ok(())
}

fn spawn_nmon(ctx: &mut ServerContext) {
    let cluster = ClusterConfig::new(ctx.config.cluster_nodes.clone());
    let state = NmonState::new(ctx.config.localhost.clone(), cluster);
    let bus = ctx.bus.clone();
    let cancel = ctx.cancel.clone();
    ctx.background_tasks
        .spawn(async move { nmon::run(state, bus, cancel).await });
}

/// One `imon` actor per object this node is in scope for.
fn spawn_imons(ctx: &mut ServerContext) {
    for object in &ctx.config.objects {
        if !object.scope.iter().any(|n| n == &ctx.config.localhost) {
            continue;
        }
        let path = match object.path.parse::<ObjPath>() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(path = %object.path, error = %e, "skipping unparsable object path");
                continue;
            }
        };
        let mut state = ImonState::new(path, ctx.config.localhost.clone());
        let mut config = InstanceConfig::new(
            object.scope.clone(),
            object.topology,
            object.placement_policy,
        );
        config.restart_limit = object.restart_limit;
        state.config = Some(config);
        state.view.scope = object.scope.clone();

        let bus = ctx.bus.clone();
        let cancel = ctx.cancel.clone();
        let tunables = ImonTunables {
            ready_duration: ctx.config.ready_duration,
            drain_duration: ctx.config.drain_duration,
        };
        let crm = Arc::new(LoggingCrm);
        ctx.background_tasks
            .spawn(async move { imon::run(state, bus, crm, tunables, cancel).await });
    }
}

fn spawn_api(ctx: &mut ServerContext) {
    let state = AppState {
        bus: ctx.bus.clone(),
        snapshot: ctx.snapshot.clone(),
        localhost: ctx.config.localhost.clone(),
        set_monitor_deadline: ctx.config.set_monitor_deadline,
    };
    let addr = match ctx.config.raw_addr() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "invalid raw listen address, API server not started");
            return;
        }
    };
    let cancel = ctx.cancel.clone();
    ctx.background_tasks
        .spawn(async move { api::run_http_server(addr, state, cancel).await });
}

fn spawn_metrics(ctx: &mut ServerContext) {
    let port = ctx.config.metrics_port;
    let cancel = ctx.cancel.clone();
    ctx.background_tasks
        .spawn(async move { metrics_server::run_metrics_server(port, cancel).await });
}
