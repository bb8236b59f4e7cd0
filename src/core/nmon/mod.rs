// src/core/nmon/mod.rs

//! The Node Monitor: one actor per process, tracking the local node's
//! administrative state and mediating cluster-membership mutations through
//! the singleton cluster-config object. Grounded in `daemon/nmon` (state
//! machine) and `daemon/nmon/cluster_config.go` (join/leave handling).

pub mod cluster_config;

use std::collections::HashMap;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::events::{node_label, BusMessage, Envelope, EventBus, Filter, MessageKind};
use crate::core::model::node::{NodeMonitor, NodeMonitorState, NodeStatus};
use crate::core::path::Path;

pub use cluster_config::ClusterConfig;

/// The nmon actor's owned state.
pub struct NmonState {
    pub localhost: String,
    pub monitor: NodeMonitor,
    pub status: NodeStatus,
    pub peer_status: HashMap<String, NodeStatus>,
    pub cluster: ClusterConfig,
    pub change: bool,
}

impl NmonState {
    pub fn new(localhost: String, cluster: ClusterConfig) -> Self {
        Self {
            localhost,
            monitor: NodeMonitor::default(),
            status: NodeStatus::default(),
            peer_status: HashMap::new(),
            cluster,
            change: false,
        }
    }

    /// A split is observed when at least one peer believes a different
    /// membership list than ours (the cheap proxy used here, in place of
    /// replicating om3's full quorum calculation, which is out of scope).
    fn recompute_split(&mut self) {
        let is_split = self.peer_status.values().any(|s| s.is_split);
        if is_split != self.status.is_split {
            self.status.is_split = is_split;
            self.status.updated = Utc::now();
            self.change = true;
        }
    }
}

/// Runs the nmon actor until `cancel` fires.
pub async fn run(mut state: NmonState, bus: EventBus, cancel: CancellationToken) {
    let filters = vec![
        Filter::new(MessageKind::NodeStatusUpdated),
        Filter::new(MessageKind::JoinRequest),
        Filter::new(MessageKind::LeaveRequest),
        Filter::new(MessageKind::SetNodeMonitor),
    ];
    let mut sub = bus.subscribe("nmon", filters, None, None);
    info!(node = %state.localhost, "nmon started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(env) = sub.recv() => {
                handle_message(&mut state, &bus, env).await;
            }
        }
        publish_if_changed(&mut state, &bus);
    }
    info!(node = %state.localhost, "nmon stopped");
}

async fn handle_message(state: &mut NmonState, bus: &EventBus, env: Envelope) {
    match env.message {
        BusMessage::NodeStatusUpdated { node, status } if node != state.localhost => {
            state.peer_status.insert(node, status);
            state.recompute_split();
        }
        BusMessage::JoinRequest { node } => on_join_request(state, bus, node),
        BusMessage::LeaveRequest { node } => on_leave_request(state, bus, node),
        BusMessage::SetNodeMonitor { node, target_state } if node == state.localhost => {
            set_state(state, target_state);
        }
        _ => {}
    }
}

/// `onJoinRequest`: append to cluster membership, or report why not.
fn on_join_request(state: &mut NmonState, bus: &EventBus, node: String) {
    info!(%node, "join request");
    if state.cluster.nodes.iter().any(|n| n == &node) {
        bus.publish(
            BusMessage::JoinIgnored { node: node.clone() },
            node_label(&node),
        );
        return;
    }
    match state.cluster.add_node(node.clone()) {
        Ok(()) => {
            // Success is implicit: the subsequent ObjectStatusUpdated on
            // the ccfg path closes the loop, matching the original's
            // "no direct publication on success" behavior.
        }
        Err(e) => bus.publish(
            BusMessage::JoinError {
                node: node.clone(),
                reason: e.to_string(),
            },
            node_label(&node),
        ),
    }
}

/// `onLeaveRequest`: remove from cluster membership, or report why not.
fn on_leave_request(state: &mut NmonState, bus: &EventBus, node: String) {
    info!(%node, "leave request");
    if !state.cluster.nodes.iter().any(|n| n == &node) {
        bus.publish(
            BusMessage::LeaveIgnored { node: node.clone() },
            node_label(&node),
        );
        return;
    }
    match state.cluster.remove_node(&node) {
        Ok(()) => {}
        Err(e) => bus.publish(
            BusMessage::LeaveError {
                node: node.clone(),
                reason: e.to_string(),
            },
            node_label(&node),
        ),
    }
}

fn publish_if_changed(state: &mut NmonState, bus: &EventBus) {
    if !state.change {
        return;
    }
    state.change = false;
    bus.publish(
        BusMessage::NodeMonitorUpdated {
            node: state.localhost.clone(),
            monitor: state.monitor.clone(),
        },
        node_label(&state.localhost),
    );
    bus.publish(
        BusMessage::NodeStatusUpdated {
            node: state.localhost.clone(),
            status: state.status.clone(),
        },
        node_label(&state.localhost),
    );
}

/// Sets the local admin state, e.g. from a `/node/monitor` request.
pub fn set_state(state: &mut NmonState, new: NodeMonitorState) {
    if state.monitor.state != new {
        state.monitor.state = new;
        state.monitor.state_updated = Utc::now();
        state.change = true;
    }
}

/// The well-known cluster-config path referenced by `ClusterConfig`.
pub fn ccfg_path() -> Path {
    Path::cluster_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_request_for_known_node_is_ignored() {
        let cluster = ClusterConfig::new(vec!["n1".into(), "n2".into()]);
        let mut state = NmonState::new("n1".into(), cluster);
        assert!(state.cluster.nodes.contains(&"n2".to_string()));
        let bus = EventBus::new();
        let mut sub = bus.subscribe(
            "test",
            vec![
                Filter::new(MessageKind::JoinIgnored),
                Filter::new(MessageKind::JoinError),
            ],
            None,
            None,
        );

        let before = state.cluster.nodes.clone();
        on_join_request(&mut state, &bus, "n2".into());
        assert_eq!(before, state.cluster.nodes, "a re-issued join must not mutate membership");

        let env = sub.recv().await.expect("join ignored published");
        match env.message {
            BusMessage::JoinIgnored { node } => assert_eq!(node, "n2"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn split_observed_from_any_peer() {
        let cluster = ClusterConfig::new(vec!["n1".into(), "n2".into()]);
        let mut state = NmonState::new("n1".into(), cluster);
        let mut peer = NodeStatus::default();
        peer.is_split = true;
        state.peer_status.insert("n2".into(), peer);
        state.recompute_split();
        assert!(state.status.is_split);
    }
}
