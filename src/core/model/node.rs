// src/core/model/node.rs

//! Node-level monitor/status/stats and heartbeat peer liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::{GlobalExpect, LocalExpect};

/// The administrative state of a node, owned by its nmon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeMonitorState {
    #[default]
    Init,
    Idle,
    Frozen,
    Thawing,
    Joining,
    Leaving,
    Shutting,
    Maintenance,
}

impl NodeMonitorState {
    /// Whether a node in this state can host an HA leader: it must not be
    /// mid-membership-change, mid-shutdown, or under maintenance.
    pub fn is_rankable(self) -> bool {
        matches!(
            self,
            NodeMonitorState::Idle | NodeMonitorState::Frozen | NodeMonitorState::Thawing
        )
    }
}

/// One node's monitor state, as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMonitor {
    pub state: NodeMonitorState,
    pub local_expect: LocalExpect,
    pub global_expect: GlobalExpect,
    pub state_updated: DateTime<Utc>,
}

impl Default for NodeMonitor {
    fn default() -> Self {
        Self {
            state: NodeMonitorState::default(),
            local_expect: LocalExpect::Empty,
            global_expect: GlobalExpect::Empty,
            state_updated: Utc::now(),
        }
    }
}

/// One node's aggregate status, independent of any single object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub frozen: DateTime<Utc>,
    pub is_split: bool,
    pub updated: DateTime<Utc>,
}

impl NodeStatus {
    pub fn is_frozen(&self) -> bool {
        self.frozen.timestamp() != 0
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            frozen: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            is_split: false,
            updated: Utc::now(),
        }
    }
}

/// Scoring/load information used by the `score` placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeStats {
    pub score: u64,
    pub load_avg: f64,
}

/// `(beating, last)` for one (peer, heartbeat-transport) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPeerStatus {
    pub beating: bool,
    pub last: DateTime<Utc>,
}

impl Default for HeartbeatPeerStatus {
    fn default() -> Self {
        Self {
            beating: false,
            last: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }
}
