// src/api/snapshot.rs

//! A read-only cluster snapshot maintained purely from bus events, for the
//! orchestration API's GET-style endpoints (`/daemon/status`, the SSE
//! stream's initial catch-up). This is deliberately NOT the per-actor
//! `ClusterView` each imon/nmon keeps privately (spec.md §5 "no singleton")
//! — it is a read cache serving external clients, updated asynchronously
//! and always a little behind the authoritative per-actor state.

use std::sync::Arc;

use dashmap::DashMap;

use crate::core::events::{BusMessage, EventBus, Filter, MessageKind};
use crate::core::model::{InstanceMonitor, InstanceStatus, NodeMonitor, NodeStatus};

#[derive(Clone, Default)]
pub struct ClusterSnapshot {
    pub inst_status: Arc<DashMap<(String, String), InstanceStatus>>,
    pub inst_monitor: Arc<DashMap<(String, String), InstanceMonitor>>,
    pub node_monitor: Arc<DashMap<String, NodeMonitor>>,
    pub node_status: Arc<DashMap<String, NodeStatus>>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Runs forever, keeping `snapshot` up to date. Intended to be spawned once
/// alongside the HTTP/SSE servers.
pub async fn run(snapshot: ClusterSnapshot, bus: EventBus) {
    let filters = vec![
        Filter::new(MessageKind::ObjectStatusUpdated),
        Filter::new(MessageKind::InstanceMonitorUpdated),
        Filter::new(MessageKind::InstanceMonitorDeleted),
        Filter::new(MessageKind::NodeMonitorUpdated),
        Filter::new(MessageKind::NodeStatusUpdated),
    ];
    let mut sub = bus.subscribe("api-snapshot", filters, Some(4096), None);
    while let Some(env) = sub.recv().await {
        match env.message {
            BusMessage::ObjectStatusUpdated { path, node, status } => {
                snapshot.inst_status.insert((path.to_string(), node), status);
            }
            BusMessage::InstanceMonitorUpdated { path, node, monitor } => {
                snapshot
                    .inst_monitor
                    .insert((path.to_string(), node), monitor);
            }
            BusMessage::InstanceMonitorDeleted { path, node } => {
                snapshot.inst_monitor.remove(&(path.to_string(), node));
            }
            BusMessage::NodeMonitorUpdated { node, monitor } => {
                snapshot.node_monitor.insert(node, monitor);
            }
            BusMessage::NodeStatusUpdated { node, status } => {
                snapshot.node_status.insert(node, status);
            }
            _ => {}
        }
    }
}
