use std::sync::Arc;
use std::time::Duration;

use clustord::core::events::{BusMessage, EventBus, Filter, MessageKind, MonitorUpdate};
use clustord::core::imon::crm::LoggingCrm;
use clustord::core::imon::{self, ImonState, ImonTunables};
use clustord::core::model::instance::{
    GlobalExpect, GlobalExpectOptions, InstanceConfig, MonitorState, PlacementPolicy, Topology,
};
use clustord::core::model::node::NodeMonitorState;
use clustord::core::nmon::{self, ClusterConfig, NmonState};
use clustord::core::path::{Kind, Path};
use tokio_util::sync::CancellationToken;

fn fast_tunables() -> ImonTunables {
    ImonTunables {
        ready_duration: Duration::from_millis(5),
        drain_duration: Duration::from_millis(20),
    }
}

async fn wait_for_global_expect(
    sub: &mut clustord::core::events::Subscription,
    want: GlobalExpect,
    localhost_of_interest: &str,
) {
    loop {
        let env = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for convergence")
            .expect("bus closed");
        if let BusMessage::InstanceMonitorUpdated { node, monitor, .. } = env.message {
            if node == localhost_of_interest && monitor.global_expect == want {
                return;
            }
        }
    }
}

/// *Convergence* (spec.md §8): two imon actors for the same path, wired to
/// one shared bus, end up agreeing on `global_expect` after a single
/// `SetInstanceMonitor` broadcast.
#[tokio::test]
async fn two_nodes_converge_on_global_expect() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let scope = vec!["n1".to_string(), "n2".to_string()];
    let path = Path::new("default", Kind::Svc, "s1");

    let mut sub = bus.subscribe(
        "test-observer",
        vec![Filter::new(MessageKind::InstanceMonitorUpdated)],
        None,
        None,
    );

    for localhost in ["n1", "n2"] {
        let mut state = ImonState::new(path.clone(), localhost.to_string());
        state.config = Some(InstanceConfig::new(
            scope.clone(),
            Topology::Failover,
            PlacementPolicy::NodesOrder,
        ));
        state.view.scope = scope.clone();
        let crm = Arc::new(LoggingCrm);
        tokio::spawn(imon::run(
            state,
            bus.clone(),
            crm,
            fast_tunables(),
            cancel.clone(),
        ));
    }

    bus.publish(
        BusMessage::SetInstanceMonitor {
            path: path.clone(),
            node: "n1".to_string(),
            value: MonitorUpdate {
                global_expect: Some(GlobalExpect::Stopped),
                ..Default::default()
            },
        },
        clustord::core::events::path_label(&path),
    );

    wait_for_global_expect(&mut sub, GlobalExpect::Stopped, "n1").await;
    wait_for_global_expect(&mut sub, GlobalExpect::Stopped, "n2").await;

    cancel.cancel();
}

async fn wait_for_monitor_state(
    sub: &mut clustord::core::events::Subscription,
    want: MonitorState,
    localhost_of_interest: &str,
) {
    loop {
        let env = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for state transition")
            .expect("bus closed");
        if let BusMessage::InstanceMonitorUpdated { node, monitor, .. } = env.message {
            if node == localhost_of_interest && monitor.state == want {
                return;
            }
        }
    }
}

/// spec.md §8 scenario 2: 2-node failover cluster, `nodes order` policy,
/// `placed@` with an explicit `destination=[n2]`. n2 is not the
/// nodes-order leader, but must still start on the destination; n1 must
/// not (bug: `orchestrate_placed` used to delegate to `orchestrate_started`,
/// which gated on `is_leader` instead of the resolved destination, so the
/// non-leader destination got stuck in `WaitLeader` forever).
#[tokio::test]
async fn placed_at_explicit_destination_starts_only_on_destination() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let scope = vec!["n1".to_string(), "n2".to_string()];
    let path = Path::new("default", Kind::Svc, "s1");

    let mut sub = bus.subscribe(
        "test-observer",
        vec![Filter::new(MessageKind::InstanceMonitorUpdated)],
        None,
        None,
    );

    for localhost in ["n1", "n2"] {
        let mut state = ImonState::new(path.clone(), localhost.to_string());
        state.config = Some(InstanceConfig::new(
            scope.clone(),
            Topology::Failover,
            PlacementPolicy::NodesOrder,
        ));
        state.view.scope = scope.clone();
        let crm = Arc::new(LoggingCrm);
        tokio::spawn(imon::run(
            state,
            bus.clone(),
            crm,
            fast_tunables(),
            cancel.clone(),
        ));
    }

    bus.publish(
        BusMessage::SetInstanceMonitor {
            path: path.clone(),
            node: "n1".to_string(),
            value: MonitorUpdate {
                global_expect: Some(GlobalExpect::PlacedAt),
                global_expect_options: Some(GlobalExpectOptions {
                    destination: vec!["n2".to_string()],
                }),
                ..Default::default()
            },
        },
        clustord::core::events::path_label(&path),
    );

    // n2 is the destination but ranks second under `nodes order`; it must
    // still reach `starting`, not get stuck in `wait_leader`.
    wait_for_monitor_state(&mut sub, MonitorState::Starting, "n2").await;

    cancel.cancel();
}

/// spec.md §8 scenario 3: `placed_at` naming a destination outside the
/// object's scope resolves to no candidate at all; no node should ever
/// enter `starting`/`stopping` for it.
#[tokio::test]
async fn placed_at_out_of_scope_destination_is_a_no_op() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let scope = vec!["n1".to_string(), "n2".to_string()];
    let path = Path::new("default", Kind::Svc, "s1");

    let mut sub = bus.subscribe(
        "test-observer",
        vec![Filter::new(MessageKind::InstanceMonitorUpdated)],
        None,
        None,
    );

    for localhost in ["n1", "n2"] {
        let mut state = ImonState::new(path.clone(), localhost.to_string());
        state.config = Some(InstanceConfig::new(
            scope.clone(),
            Topology::Failover,
            PlacementPolicy::NodesOrder,
        ));
        state.view.scope = scope.clone();
        let crm = Arc::new(LoggingCrm);
        tokio::spawn(imon::run(
            state,
            bus.clone(),
            crm,
            fast_tunables(),
            cancel.clone(),
        ));
    }

    bus.publish(
        BusMessage::SetInstanceMonitor {
            path: path.clone(),
            node: "n1".to_string(),
            value: MonitorUpdate {
                global_expect: Some(GlobalExpect::PlacedAt),
                global_expect_options: Some(GlobalExpectOptions {
                    destination: vec!["n99".to_string()],
                }),
                ..Default::default()
            },
        },
        clustord::core::events::path_label(&path),
    );

    let saw_action = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            let env = sub.recv().await.expect("bus closed");
            if let BusMessage::InstanceMonitorUpdated { monitor, .. } = env.message {
                if matches!(monitor.state, MonitorState::Starting | MonitorState::Stopping) {
                    return;
                }
            }
        }
    })
    .await;
    assert!(
        saw_action.is_err(),
        "an unresolvable destination must never dispatch start/stop"
    );

    cancel.cancel();
}

/// Exercises the bus-mediated path `/node/monitor`/`/node/clear` use:
/// `BusMessage::SetNodeMonitor` mutates nmon's own admin state even though
/// the HTTP layer never reaches into `NmonState` directly.
#[tokio::test]
async fn set_node_monitor_flips_local_admin_state() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let cluster = ClusterConfig::new(vec!["n1".to_string()]);
    let state = NmonState::new("n1".to_string(), cluster);

    let mut sub = bus.subscribe(
        "test-observer",
        vec![Filter::new(MessageKind::NodeMonitorUpdated)],
        None,
        None,
    );

    tokio::spawn(nmon::run(state, bus.clone(), cancel.clone()));

    bus.publish(
        BusMessage::SetNodeMonitor {
            node: "n1".to_string(),
            target_state: NodeMonitorState::Frozen,
        },
        clustord::core::events::node_label("n1"),
    );

    let env = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("timed out")
        .expect("bus closed");
    if let BusMessage::NodeMonitorUpdated { node, monitor } = env.message {
        assert_eq!(node, "n1");
        assert_eq!(monitor.state, NodeMonitorState::Frozen);
    } else {
        panic!("unexpected message");
    }

    cancel.cancel();
}

/// A `SetNodeMonitor` naming a different node must never mutate this
/// node's own admin state.
#[tokio::test]
async fn set_node_monitor_ignores_foreign_node() {
    let bus = EventBus::new();
    let cancel = CancellationToken::new();
    let cluster = ClusterConfig::new(vec!["n1".to_string(), "n2".to_string()]);
    let state = NmonState::new("n1".to_string(), cluster);

    tokio::spawn(nmon::run(state, bus.clone(), cancel.clone()));

    let mut sub = bus.subscribe(
        "test-observer",
        vec![Filter::new(MessageKind::NodeMonitorUpdated)],
        None,
        None,
    );

    bus.publish(
        BusMessage::SetNodeMonitor {
            node: "n2".to_string(),
            target_state: NodeMonitorState::Frozen,
        },
        clustord::core::events::node_label("n2"),
    );

    let result = tokio::time::timeout(Duration::from_millis(150), sub.recv()).await;
    assert!(result.is_err(), "n1's nmon must not react to n2's SetNodeMonitor");

    cancel.cancel();
}
