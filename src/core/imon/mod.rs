// src/core/imon/mod.rs

//! The Instance Monitor: one actor per locally-scoped object instance,
//! owning that instance's orchestration state machine. Grounded in
//! `daemon/monitor/imon/main.go`'s `worker()` select loop.

pub mod crm;
pub mod leader;
pub mod orchestrate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::events::{
    path_label, BusMessage, Envelope, EventBus, Filter, MessageKind, MonitorUpdate,
};
use crate::core::errors::OrchestratorError;
use crate::core::model::cluster_view::ClusterView;
use crate::core::model::instance::{
    GlobalExpect, InstanceConfig, InstanceMonitor, InstanceStatus, MonitorRestart, MonitorState,
    PlacementPolicy, Topology,
};
use crate::core::path::Path;

use crm::{CrmAction, CrmVerb};
use orchestrate::{ActiveCheck, Decision};

/// How long imon waits in `ready` before promoting to `starting`, per
/// spec's split-detection grace window.
const DEFAULT_READY_DURATION: Duration = Duration::from_secs(5);
/// How long an actor drains its channels after cancellation before exiting.
const DEFAULT_DRAIN_DURATION: Duration = Duration::from_millis(40);

/// The mutable state owned by one imon actor.
pub struct ImonState {
    pub path: Path,
    pub localhost: String,
    pub config: Option<InstanceConfig>,
    pub status: InstanceStatus,
    pub monitor: InstanceMonitor,
    pub view: ClusterView,
    pub node_frozen: bool,
    pub scaler_slice_index: usize,
    pub change: bool,
}

impl ImonState {
    pub fn new(path: Path, localhost: String) -> Self {
        Self {
            path,
            localhost,
            config: None,
            status: InstanceStatus::default(),
            monitor: InstanceMonitor::default(),
            view: ClusterView::default(),
            node_frozen: false,
            scaler_slice_index: 0,
            change: false,
        }
    }

    pub fn config_policy(&self) -> PlacementPolicy {
        self.config
            .as_ref()
            .map(|c| c.placement_policy)
            .unwrap_or(PlacementPolicy::NodesOrder)
    }

    pub fn config_topology(&self) -> Topology {
        self.config
            .as_ref()
            .map(|c| c.topology)
            .unwrap_or(Topology::Failover)
    }
}

/// Tunables carried from `config::Config`.
#[derive(Debug, Clone, Copy)]
pub struct ImonTunables {
    pub ready_duration: Duration,
    pub drain_duration: Duration,
}

impl Default for ImonTunables {
    fn default() -> Self {
        Self {
            ready_duration: DEFAULT_READY_DURATION,
            drain_duration: DEFAULT_DRAIN_DURATION,
        }
    }
}

/// A CRM action completed; fed back on the actor's private command channel,
/// never touching `ImonState` from the action task itself.
struct CmdActionDone {
    from: MonitorState,
    to: MonitorState,
    verb: CrmVerb,
}

/// A pending ready->doing promotion, armed while waiting out ReadyDuration.
struct PendingReady {
    doing: MonitorState,
    verb: CrmVerb,
    success: MonitorState,
    error: MonitorState,
    active: ActiveCheck,
}

/// Runs one imon actor until `cancel` fires. Subscribes to every bus
/// message kind this path cares about, label-filtered to `{path}` (plus an
/// unlabeled subscription for node-scoped messages, which carry no path
/// label).
pub async fn run(
    mut state: ImonState,
    bus: EventBus,
    crm: Arc<dyn CrmAction>,
    tunables: ImonTunables,
    cancel: CancellationToken,
) {
    let path_str = state.path.to_string();
    let filters = vec![
        Filter::new(MessageKind::ObjectStatusUpdated).with_label("path", path_str.clone()),
        Filter::new(MessageKind::SetInstanceMonitor).with_label("path", path_str.clone()),
        Filter::new(MessageKind::InstanceMonitorUpdated).with_label("path", path_str.clone()),
        Filter::new(MessageKind::InstanceMonitorDeleted).with_label("path", path_str.clone()),
        Filter::new(MessageKind::NodeMonitorUpdated),
        Filter::new(MessageKind::NodeStatusUpdated),
        Filter::new(MessageKind::NodeStatsUpdated),
    ];
    let mut sub = bus.subscribe(format!("imon-{path_str}"), filters, None, None);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<CmdActionDone>(16);
    let mut pending_ready: Option<PendingReady> = None;
    let mut ready_timer: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

    info!(path = %state.path, "imon started");
    tick(&mut state, &bus, &crm, &cmd_tx, &mut pending_ready, &mut ready_timer, tunables);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            Some(env) = sub.recv() => {
                handle_message(&mut state, env);
                tick(&mut state, &bus, &crm, &cmd_tx, &mut pending_ready, &mut ready_timer, tunables);
            }
            Some(done) = cmd_rx.recv() => {
                apply_action_done(&mut state, done);
                tick(&mut state, &bus, &crm, &cmd_tx, &mut pending_ready, &mut ready_timer, tunables);
            }
            _ = async {
                match ready_timer.as_mut() {
                    Some(t) => t.as_mut().await,
                    None => std::future::pending().await,
                }
            }, if ready_timer.is_some() => {
                ready_timer = None;
                if let Some(p) = pending_ready.take() {
                    promote_ready(&mut state, &bus, &crm, &cmd_tx, p);
                }
            }
        }
        publish_if_changed(&mut state, &bus);
    }

    drain(&mut sub, tunables.drain_duration).await;
    bus.publish(
        BusMessage::InstanceMonitorDeleted {
            path: state.path.clone(),
            node: state.localhost.clone(),
        },
        path_label(&state.path),
    );
    info!(path = %state.path, "imon stopped");
}

async fn drain(sub: &mut crate::core::events::Subscription, duration: Duration) {
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            msg = sub.recv() => if msg.is_none() { break },
        }
    }
}

fn handle_message(state: &mut ImonState, env: Envelope) {
    match env.message {
        BusMessage::ObjectStatusUpdated { node, status, .. } => {
            if node == state.localhost {
                state.status = status;
            } else if state
                .view
                .inst_status
                .get(&node)
                .map(|s| s.updated < status.updated)
                .unwrap_or(true)
            {
                state.view.inst_status.insert(node, status);
            }
        }
        BusMessage::SetInstanceMonitor { node, value, .. } => {
            let result = apply_set_instance_monitor(state, &value);
            if let Some(ack) = env.ack {
                ack.ack(result);
            }
            debug!(path = %state.path, from = %node, "applied set instance monitor");
        }
        BusMessage::InstanceMonitorUpdated { node, monitor, .. } => {
            if node != state.localhost {
                state.view.inst_monitor.insert(node, monitor);
            }
        }
        BusMessage::InstanceMonitorDeleted { node, .. } => {
            if node != state.localhost {
                state.view.inst_monitor.remove(&node);
            }
        }
        BusMessage::NodeMonitorUpdated { node, monitor } => {
            state.view.node_monitor.insert(node, monitor);
        }
        BusMessage::NodeStatusUpdated { node, status } => {
            if node == state.localhost {
                state.node_frozen = status.is_frozen();
            }
            state.view.node_status.insert(node, status);
        }
        BusMessage::NodeStatsUpdated { node, stats } => {
            state.view.node_stats.insert(node, stats);
        }
        _ => {}
    }
}

/// `doStatus`/`doGlobalExpect`/`doLocalExpect` from `main_cmd.go`, collapsed
/// into one pass: applies a client-requested monitor mutation and decides
/// whether to ack success or conflict.
fn apply_set_instance_monitor(
    state: &mut ImonState,
    value: &MonitorUpdate,
) -> Result<(), OrchestratorError> {
    if let Some(new_state) = value.state {
        if new_state != state.monitor.state {
            state.monitor.state = new_state;
            state.monitor.state_updated = Utc::now();
            state.change = true;
        }
    }

    if let Some(ge) = value.global_expect {
        if ge != GlobalExpect::Empty {
            if ge == GlobalExpect::Started {
                if let (false, reason) = leader::is_startable(state) {
                    info!(path = %state.path, reason, "set started rejected");
                    return Ok(());
                }
            }
            for (node, mon) in state.view.inst_monitor.iter() {
                if mon.global_expect != GlobalExpect::Empty
                    && mon.global_expect != ge
                    && mon.global_expect_updated > state.monitor.global_expect_updated
                {
                    return Err(OrchestratorError::Conflict(format!(
                        "global expect is already {} on node {node}",
                        mon.global_expect
                    )));
                }
            }
            if ge != state.monitor.global_expect {
                state.monitor.global_expect = ge;
                state.monitor.global_expect_options =
                    value.global_expect_options.clone().unwrap_or_default();
                state.monitor.global_expect_updated = Utc::now();
                state.monitor.candidate_orchestration_id =
                    Some(value.candidate_orchestration_id);
                state.change = true;
            }
        }
    }

    if let Some(le) = value.local_expect {
        if le != crate::core::model::instance::LocalExpect::Empty
            && le != state.monitor.local_expect
        {
            state.monitor.local_expect = le;
            state.monitor.local_expect_updated = Utc::now();
            state.change = true;
        }
    }

    Ok(())
}

/// One orchestration loop step: recompute leadership, converge, dispatch.
fn tick(
    state: &mut ImonState,
    bus: &EventBus,
    crm: &Arc<dyn CrmAction>,
    cmd_tx: &mpsc::Sender<CmdActionDone>,
    pending_ready: &mut Option<PendingReady>,
    ready_timer: &mut Option<std::pin::Pin<Box<tokio::time::Sleep>>>,
    tunables: ImonTunables,
) {
    update_leadership(state);
    converge_global_expect(state);

    if pending_ready.is_some() {
        // Already waiting out ReadyDuration; nothing new to dispatch.
        return;
    }

    match orchestrate::orchestrate(state) {
        Decision::NoOp => {}
        Decision::Enter {
            doing,
            verb,
            success,
            error,
            active,
        } => {
            if doing == MonitorState::Starting && state.monitor.state != MonitorState::Ready {
                state.monitor.state = MonitorState::Ready;
                state.monitor.state_updated = Utc::now();
                state.change = true;
                *pending_ready = Some(PendingReady {
                    doing,
                    verb,
                    success,
                    error,
                    active,
                });
                *ready_timer = Some(Box::pin(tokio::time::sleep(tunables.ready_duration)));
            } else {
                spawn_action(state, bus, crm, cmd_tx, doing, verb, success, error);
            }
        }
    }
}

/// Re-validates leadership after the ReadyDuration grace window and either
/// promotes to the doing state or falls back to idle if an earlier-ranked
/// peer started first.
fn promote_ready(
    state: &mut ImonState,
    bus: &EventBus,
    crm: &Arc<dyn CrmAction>,
    cmd_tx: &mpsc::Sender<CmdActionDone>,
    pending: PendingReady,
) {
    if state.monitor.state != MonitorState::Ready {
        return;
    }
    let still_active = match &pending.active {
        ActiveCheck::Leader => state.monitor.is_leader,
        ActiveCheck::Destination(want) => want == &state.localhost,
    };
    if !still_active || state.view.has_other_node_doing(&state.localhost) {
        warn!(path = %state.path, "ready gate expired without authority, falling back to idle");
        state.monitor.state = MonitorState::Idle;
        state.monitor.state_updated = Utc::now();
        state.change = true;
        return;
    }
    spawn_action(
        state,
        bus,
        crm,
        cmd_tx,
        pending.doing,
        pending.verb,
        pending.success,
        pending.error,
    );
}

fn spawn_action(
    state: &mut ImonState,
    _bus: &EventBus,
    crm: &Arc<dyn CrmAction>,
    cmd_tx: &mpsc::Sender<CmdActionDone>,
    doing: MonitorState,
    verb: CrmVerb,
    success: MonitorState,
    error: MonitorState,
) {
    state.monitor.state = doing;
    state.monitor.state_updated = Utc::now();
    state.change = true;

    let crm = crm.clone();
    let path = state.path.clone();
    let cmd_tx = cmd_tx.clone();
    tokio::spawn(async move {
        let outcome = crm.run(verb, &path).await;
        let to = if outcome.is_ok() { success } else { error };
        if outcome.is_err() {
            warn!(%path, ?verb, "crm action failed");
        }
        let _ = cmd_tx.send(CmdActionDone { from: doing, to, verb }).await;
    });
}

/// Applies a completed CRM action's outcome, honoring the restart policy
/// (spec.md §7) for a failed `start`: retried up to `restart_limit` times
/// before becoming fatal-per-instance (terminal, requires `clear`). Any
/// other verb's failure, and any success, is applied directly.
fn apply_action_done(state: &mut ImonState, done: CmdActionDone) {
    if state.monitor.state != done.from {
        return;
    }
    if done.verb == CrmVerb::Start && done.to == MonitorState::StartFailed {
        let limit = state.config.as_ref().map(|c| c.restart_limit).unwrap_or(0);
        let entry = state
            .monitor
            .restart_table
            .entry("instance".to_string())
            .or_insert_with(MonitorRestart::default);
        entry.retries += 1;
        entry.updated = Utc::now();
        if entry.retries <= limit {
            info!(
                path = %state.path,
                retries = entry.retries,
                limit,
                "start failed, retrying per restart policy"
            );
            state.monitor.state = MonitorState::Idle;
        } else {
            warn!(
                path = %state.path,
                retries = entry.retries,
                limit,
                "restart policy exhausted, start-failed is now fatal-per-instance"
            );
            state.monitor.state = MonitorState::StartFailed;
        }
    } else {
        if !done.to.is_failed() {
            state.monitor.restart_table.clear();
        }
        state.monitor.state = done.to;
    }
    state.monitor.state_updated = Utc::now();
    state.change = true;
}

fn update_leadership(state: &mut ImonState) {
    let is_leader = leader::is_leader(state);
    if is_leader != state.monitor.is_leader {
        state.monitor.is_leader = is_leader;
        state.change = true;
    }
    let is_ha_leader = leader::is_ha_leader(state);
    if is_ha_leader != state.monitor.is_ha_leader {
        state.monitor.is_ha_leader = is_ha_leader;
        state.change = true;
    }
}

/// Adopts a peer's `global_expect` if it is strictly newer than ours (ties
/// broken by the lexicographically greatest node name), per the convergence
/// rule in spec.md §3/§4.2.
fn converge_global_expect(state: &mut ImonState) {
    let mut winner: Option<(&str, &InstanceMonitor)> = None;
    for (node, mon) in state.view.inst_monitor.iter() {
        let newer = mon.global_expect_updated > state.monitor.global_expect_updated
            || (mon.global_expect_updated == state.monitor.global_expect_updated
                && node.as_str() > state.localhost.as_str());
        if !newer {
            continue;
        }
        if winner
            .map(|(_, w)| mon.global_expect_updated >= w.global_expect_updated)
            .unwrap_or(true)
        {
            winner = Some((node.as_str(), mon));
        }
    }
    if let Some((_, mon)) = winner {
        if mon.global_expect != state.monitor.global_expect
            || mon.global_expect_options != state.monitor.global_expect_options
        {
            state.monitor.global_expect = mon.global_expect;
            state.monitor.global_expect_options = mon.global_expect_options.clone();
            state.monitor.global_expect_updated = mon.global_expect_updated;
            state.change = true;
        }
    }
}

fn publish_if_changed(state: &mut ImonState, bus: &EventBus) {
    if !state.change {
        return;
    }
    state.change = false;
    bus.publish(
        BusMessage::InstanceMonitorUpdated {
            path: state.path.clone(),
            node: state.localhost.clone(),
            monitor: state.monitor.clone(),
        },
        path_label(&state.path),
    );
}

/// Convenience used by `nmon`/API code that needs a snapshot without
/// reaching into actor-private state: every imon publishes its monitor on
/// every change, so callers read the cluster view they themselves keep.
pub fn all_instance_monitors<'a>(
    localhost: &'a str,
    local: &'a InstanceMonitor,
    remote: &'a HashMap<String, InstanceMonitor>,
) -> HashMap<&'a str, &'a InstanceMonitor> {
    let mut m: HashMap<&str, &InstanceMonitor> = remote.iter().map(|(k, v)| (k.as_str(), v)).collect();
    m.insert(localhost, local);
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::Kind;

    #[tokio::test]
    async fn idempotent_set_produces_one_change() {
        let mut state = ImonState::new(Path::new("default", Kind::Svc, "s1"), "n1".into());
        let value = MonitorUpdate {
            global_expect: Some(GlobalExpect::Started),
            ..Default::default()
        };
        state.config = Some(InstanceConfig::new(
            vec!["n1".into()],
            Topology::Failover,
            PlacementPolicy::NodesOrder,
        ));
        state.view.scope = vec!["n1".into()];
        apply_set_instance_monitor(&mut state, &value).unwrap();
        assert!(state.change);
        state.change = false;
        apply_set_instance_monitor(&mut state, &value).unwrap();
        assert!(!state.change, "second identical set must be a no-op");
    }

    #[tokio::test]
    async fn conflicting_set_is_rejected() {
        let mut state = ImonState::new(Path::new("default", Kind::Svc, "s1"), "n1".into());
        state.config = Some(InstanceConfig::new(
            vec!["n1".into(), "n2".into()],
            Topology::Failover,
            PlacementPolicy::NodesOrder,
        ));
        state.view.scope = vec!["n1".into(), "n2".into()];
        let mut peer_mon = InstanceMonitor::default();
        peer_mon.global_expect = GlobalExpect::Stopped;
        peer_mon.global_expect_updated = Utc::now() + chrono::Duration::seconds(10);
        state.view.inst_monitor.insert("n2".into(), peer_mon);

        let value = MonitorUpdate {
            global_expect: Some(GlobalExpect::Started),
            ..Default::default()
        };
        let result = apply_set_instance_monitor(&mut state, &value);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_failure_retries_up_to_restart_limit_then_goes_fatal() {
        let mut state = ImonState::new(Path::new("default", Kind::Svc, "s1"), "n1".into());
        let mut config = InstanceConfig::new(
            vec!["n1".into()],
            Topology::Failover,
            PlacementPolicy::NodesOrder,
        );
        config.restart_limit = 2;
        state.config = Some(config);
        state.view.scope = vec!["n1".into()];

        for expected_retries in 1..=2 {
            state.monitor.state = MonitorState::Starting;
            apply_action_done(
                &mut state,
                CmdActionDone {
                    from: MonitorState::Starting,
                    to: MonitorState::StartFailed,
                    verb: CrmVerb::Start,
                },
            );
            assert_eq!(
                state.monitor.state,
                MonitorState::Idle,
                "retry {expected_retries} should fall back to idle, not terminal"
            );
            assert_eq!(
                state.monitor.restart_table.get("instance").unwrap().retries,
                expected_retries
            );
        }

        // Third failure exceeds the limit of 2: now terminal.
        state.monitor.state = MonitorState::Starting;
        apply_action_done(
            &mut state,
            CmdActionDone {
                from: MonitorState::Starting,
                to: MonitorState::StartFailed,
                verb: CrmVerb::Start,
            },
        );
        assert_eq!(state.monitor.state, MonitorState::StartFailed);
    }

    #[tokio::test]
    async fn successful_start_clears_restart_table() {
        let mut state = ImonState::new(Path::new("default", Kind::Svc, "s1"), "n1".into());
        state
            .monitor
            .restart_table
            .insert("instance".into(), crate::core::model::instance::MonitorRestart {
                retries: 1,
                updated: Utc::now(),
            });
        state.monitor.state = MonitorState::Starting;
        apply_action_done(
            &mut state,
            CmdActionDone {
                from: MonitorState::Starting,
                to: MonitorState::Idle,
                verb: CrmVerb::Start,
            },
        );
        assert_eq!(state.monitor.state, MonitorState::Idle);
        assert!(state.monitor.restart_table.is_empty());
    }
}
