// src/core/model/mod.rs

//! Data model shared across imon, nmon and the orchestration API: the
//! per-instance config/status/monitor triple, node-level monitor/status/stats,
//! and the per-actor cluster-view cache that aggregates them.

pub mod cluster_view;
pub mod instance;
pub mod node;

pub use instance::{
    Instance, InstanceConfig, InstanceMonitor, InstanceStatus, MonitorRestart, Provisioned,
    Topology,
};
pub use node::{HeartbeatPeerStatus, NodeMonitor, NodeMonitorState, NodeStats, NodeStatus};
