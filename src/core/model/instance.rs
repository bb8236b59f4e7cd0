// src/core/model/instance.rs

//! The instance data model: `(path, node)` carries a nullable Config, Status
//! and Monitor, per the union of fields found across the historical
//! `InstanceMonitor` definitions (see DESIGN.md's Open Question entry).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Availability of an instance, as reported by the CRM status action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Avail {
    Up,
    Down,
    Warn,
    StandbyUp,
    StandbyDown,
    NotApplicable,
    Undef,
}

/// Tri-state provisioned flag: an object may be provisioned on some but not
/// all of its resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Provisioned {
    True,
    False,
    Mixed,
    NotApplicable,
}

/// Orchestration policy: whether the daemon manages the instance at all.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrchestratePolicy {
    /// Fully managed: imon starts/stops/places the instance automatically.
    #[default]
    Ha,
    /// Never automatically managed.
    No,
    /// Started once at boot, otherwise left alone.
    Start,
}

/// Placement policy: how candidate nodes are ranked for leadership.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PlacementPolicy {
    #[default]
    NodesOrder,
    Spread,
    Score,
    Shift,
    LoadAvg,
}

/// Object topology: a single active instance (failover) or several
/// concurrently-up instances bounded by `flex_min/target/max` (flex).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Topology {
    #[default]
    Failover,
    Flex,
}

/// The static, versioned configuration of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub checksum: String,
    pub orchestrate: OrchestratePolicy,
    pub placement_policy: PlacementPolicy,
    pub topology: Topology,
    pub priority: i32,
    pub flex_min: usize,
    pub flex_target: usize,
    pub flex_max: usize,
    /// The ordered list of nodes this object may run on.
    pub scope: Vec<String>,
    /// Number of automatic restart attempts allowed after a `start-failed`
    /// before the failure becomes terminal (fatal-per-instance, requires
    /// `clear`). `0` means no automatic retry.
    pub restart_limit: u32,
    pub updated: DateTime<Utc>,
}

impl InstanceConfig {
    pub fn new(scope: Vec<String>, topology: Topology, placement_policy: PlacementPolicy) -> Self {
        Self {
            checksum: String::new(),
            orchestrate: OrchestratePolicy::Ha,
            placement_policy,
            topology,
            priority: 0,
            flex_min: 1,
            flex_target: 1,
            flex_max: 1,
            scope,
            restart_limit: 0,
            updated: Utc::now(),
        }
    }
}

/// Per-resource status, keyed by resource id, as reported by the CRM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceStatus {
    pub label: String,
    pub status: String,
}

/// The observed status of an instance, as last reported by the CRM `status`
/// action (or a peer's propagation of it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub avail: Avail,
    pub overall: Avail,
    pub provisioned: Provisioned,
    /// Zero (the Unix epoch) means thawed; any other value is the freeze time.
    pub frozen: DateTime<Utc>,
    pub resources: HashMap<String, ResourceStatus>,
    pub up_instances_count: usize,
    pub flex_target: usize,
    pub preserved: bool,
    pub updated: DateTime<Utc>,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self {
            avail: Avail::Undef,
            overall: Avail::Undef,
            provisioned: Provisioned::NotApplicable,
            frozen: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            resources: HashMap::new(),
            up_instances_count: 0,
            flex_target: 1,
            preserved: false,
            updated: Utc::now(),
        }
    }
}

impl InstanceStatus {
    pub fn is_frozen(&self) -> bool {
        self.frozen.timestamp() != 0
    }
}

/// Cluster-wide desired end-state for an object, as seen by one imon.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GlobalExpect {
    #[default]
    Empty,
    Unset,
    Placed,
    #[strum(serialize = "placed@")]
    #[serde(rename = "placed@")]
    PlacedAt,
    Started,
    Stopped,
    Frozen,
    Thawed,
    Provisioned,
    Unprovisioned,
    Purged,
    Aborted,
}

/// Per-instance desired end-state; only `started` is meaningful today.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LocalExpect {
    #[default]
    Empty,
    Unset,
    Started,
}

/// Options that qualify a `global_expect` value, currently only used by
/// `placed@` to carry an explicit destination node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GlobalExpectOptions {
    pub destination: Vec<String>,
}

/// The orchestration state machine's states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Idle,
    Ready,
    Starting,
    Stopping,
    Thawing,
    Freezing,
    Provisioning,
    Unprovisioning,
    Purging,
    Booting,
    Shutdown,
    WaitLeader,
    WaitNonLeader,
    WaitParents,
    WaitChildren,
    WaitPriors,
    StartFailed,
    StopFailed,
    PurgeFailed,
    ThawedFailed,
    FrozenFailed,
    ProvisioningFailed,
    UnprovisioningFailed,
}

impl MonitorState {
    /// Resting states: no in-flight CRM action, no timer pending.
    pub fn is_resting(self) -> bool {
        matches!(self, MonitorState::Idle | MonitorState::Ready)
    }

    /// Transient "doing" states: an async CRM action or grace timer is
    /// outstanding. Used by the abort-on-concurrent-doing rule.
    pub fn is_doing(self) -> bool {
        !self.is_resting() && !self.is_failed()
    }

    pub fn is_failed(self) -> bool {
        matches!(
            self,
            MonitorState::StartFailed
                | MonitorState::StopFailed
                | MonitorState::PurgeFailed
                | MonitorState::ThawedFailed
                | MonitorState::FrozenFailed
                | MonitorState::ProvisioningFailed
                | MonitorState::UnprovisioningFailed
        )
    }
}

/// Tracks restart attempts for one resource id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitorRestart {
    pub retries: u32,
    pub updated: DateTime<Utc>,
}

/// The orchestration state of one instance: the heart of the data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceMonitor {
    pub state: MonitorState,
    pub local_expect: LocalExpect,
    pub global_expect: GlobalExpect,
    pub global_expect_options: GlobalExpectOptions,
    pub is_leader: bool,
    pub is_ha_leader: bool,
    pub state_updated: DateTime<Utc>,
    pub local_expect_updated: DateTime<Utc>,
    pub global_expect_updated: DateTime<Utc>,
    pub candidate_orchestration_id: Option<Uuid>,
    pub restart_table: HashMap<String, MonitorRestart>,
}

impl Default for InstanceMonitor {
    fn default() -> Self {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        Self {
            state: MonitorState::Idle,
            local_expect: LocalExpect::Unset,
            global_expect: GlobalExpect::Unset,
            global_expect_options: GlobalExpectOptions::default(),
            is_leader: false,
            is_ha_leader: false,
            state_updated: epoch,
            local_expect_updated: epoch,
            global_expect_updated: epoch,
            candidate_orchestration_id: None,
            restart_table: HashMap::new(),
        }
    }
}

/// `(Config, Status, Monitor)` together describe one instance of one object
/// on one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub config: Option<InstanceConfig>,
    pub status: Option<InstanceStatus>,
    pub monitor: Option<InstanceMonitor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_monitor_is_idle_and_unset() {
        let m = InstanceMonitor::default();
        assert_eq!(m.state, MonitorState::Idle);
        assert_eq!(m.global_expect, GlobalExpect::Unset);
        assert!(!m.is_leader);
    }

    #[test]
    fn doing_failed_resting_are_exhaustive_and_disjoint() {
        for state in [
            MonitorState::Idle,
            MonitorState::Ready,
            MonitorState::Starting,
            MonitorState::StartFailed,
        ] {
            let flags = [state.is_resting(), state.is_doing(), state.is_failed()];
            assert_eq!(flags.iter().filter(|b| **b).count(), 1, "{state:?}");
        }
    }

    #[test]
    fn frozen_zero_means_thawed() {
        let s = InstanceStatus::default();
        assert!(!s.is_frozen());
    }
}
