// src/core/model/cluster_view.rs

//! The per-actor cluster-view cache: each imon/nmon actor keeps its own copy,
//! updated only from bus events, per the "no singleton" rule in the
//! concurrency model. Never shared between actors.

use std::collections::HashMap;

use super::instance::{InstanceConfig, InstanceMonitor, InstanceStatus};
use super::node::{NodeMonitor, NodeStats, NodeStatus};

/// The aggregate of local + received remote instance/node state for one path,
/// as consumed by one imon actor.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub config: Option<InstanceConfig>,
    pub inst_status: HashMap<String, InstanceStatus>,
    pub inst_monitor: HashMap<String, InstanceMonitor>,
    pub node_status: HashMap<String, NodeStatus>,
    pub node_monitor: HashMap<String, NodeMonitor>,
    pub node_stats: HashMap<String, NodeStats>,
    pub scope: Vec<String>,
}

impl ClusterView {
    pub fn new(scope: Vec<String>) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    /// All instance monitors known for this path, local node included.
    pub fn all_instance_monitors<'a>(
        &'a self,
        localhost: &str,
        local: &'a InstanceMonitor,
    ) -> HashMap<String, &'a InstanceMonitor> {
        let mut m: HashMap<String, &InstanceMonitor> = self
            .inst_monitor
            .iter()
            .map(|(k, v)| (k.clone(), v))
            .collect();
        m.insert(localhost.to_string(), local);
        m
    }

    pub fn has_other_node_doing(&self, localhost: &str) -> bool {
        self.inst_monitor
            .iter()
            .any(|(node, mon)| node != localhost && mon.state.is_doing())
    }
}
