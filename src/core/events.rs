// src/core/events.rs

//! The process-wide event bus: in-process publish/subscribe with topic
//! filters, per-subscriber timeouts, bounded per-subscriber queues, and a
//! single-shot acknowledgement mechanism. Every actor in the daemon (imon,
//! nmon, hbctrl, the orchestration API) is a publisher, a subscriber, or
//! both; this module is the only object shared among them.
//!
//! Generalizes the teacher's single-purpose `EventBus` (one `broadcast` +
//! one `mpsc` sender wired to AOF/replication) into a named-subscription
//! registry with generic type+label filtering.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::errors::OrchestratorError;
use crate::core::model::instance::{GlobalExpect, GlobalExpectOptions, LocalExpect, MonitorState};
use crate::core::model::node::NodeMonitorState;
use crate::core::model::{
    HeartbeatPeerStatus, InstanceMonitor, InstanceStatus, NodeMonitor, NodeStats, NodeStatus,
};
use crate::core::path::Path;

/// Default bound of a subscriber's delivery channel.
const DEFAULT_QUEUE_DEPTH: usize = 1024;
/// Default per-subscriber delivery timeout before a message is dropped.
const DEFAULT_SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(1);

/// A label set attached to a published message, e.g. `{path: "default/svc/s1"}`.
pub type Labels = Vec<(&'static str, String)>;

pub fn path_label(p: &Path) -> Labels {
    vec![("path", p.to_string())]
}

pub fn node_label(node: &str) -> Labels {
    vec![("node", node.to_string())]
}

/// The discriminant used for subscription filtering, one per `BusMessage`
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ObjectStatusUpdated,
    SetInstanceMonitor,
    InstanceMonitorUpdated,
    InstanceMonitorDeleted,
    NodeMonitorUpdated,
    NodeStatusUpdated,
    NodeStatsUpdated,
    JoinRequest,
    LeaveRequest,
    SetNodeMonitor,
    JoinIgnored,
    JoinError,
    LeaveIgnored,
    LeaveError,
    HbBeating,
    HbStale,
    SubscriberSlow,
}

/// A mutation of instance-monitor intent requested by an external client or
/// a peer, carried by `BusMessage::SetInstanceMonitor`.
#[derive(Debug, Clone, Default)]
pub struct MonitorUpdate {
    pub state: Option<MonitorState>,
    pub local_expect: Option<LocalExpect>,
    pub global_expect: Option<GlobalExpect>,
    pub global_expect_options: Option<GlobalExpectOptions>,
    pub candidate_orchestration_id: Uuid,
}

/// All message types that flow across the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    ObjectStatusUpdated {
        path: Path,
        node: String,
        status: InstanceStatus,
    },
    /// Requests a change to one instance's monitor. `node` is always the
    /// requester's local node; the ack is written by the owning imon.
    SetInstanceMonitor {
        path: Path,
        node: String,
        value: MonitorUpdate,
    },
    InstanceMonitorUpdated {
        path: Path,
        node: String,
        monitor: InstanceMonitor,
    },
    InstanceMonitorDeleted {
        path: Path,
        node: String,
    },
    NodeMonitorUpdated {
        node: String,
        monitor: NodeMonitor,
    },
    NodeStatusUpdated {
        node: String,
        status: NodeStatus,
    },
    NodeStatsUpdated {
        node: String,
        stats: NodeStats,
    },
    JoinRequest {
        node: String,
    },
    LeaveRequest {
        node: String,
    },
    /// Requests an admin-state change on a node's own monitor, e.g. from
    /// `POST /node/monitor` or `/node/clear` (target `Idle`).
    SetNodeMonitor {
        node: String,
        target_state: NodeMonitorState,
    },
    JoinIgnored {
        node: String,
    },
    JoinError {
        node: String,
        reason: String,
    },
    LeaveIgnored {
        node: String,
    },
    LeaveError {
        node: String,
        reason: String,
    },
    HbBeating {
        peer: String,
        transport: String,
        status: HeartbeatPeerStatus,
    },
    HbStale {
        peer: String,
        transport: String,
        status: HeartbeatPeerStatus,
    },
    SubscriberSlow {
        subscription: String,
    },
}

impl BusMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            BusMessage::ObjectStatusUpdated { .. } => MessageKind::ObjectStatusUpdated,
            BusMessage::SetInstanceMonitor { .. } => MessageKind::SetInstanceMonitor,
            BusMessage::InstanceMonitorUpdated { .. } => MessageKind::InstanceMonitorUpdated,
            BusMessage::InstanceMonitorDeleted { .. } => MessageKind::InstanceMonitorDeleted,
            BusMessage::NodeMonitorUpdated { .. } => MessageKind::NodeMonitorUpdated,
            BusMessage::NodeStatusUpdated { .. } => MessageKind::NodeStatusUpdated,
            BusMessage::NodeStatsUpdated { .. } => MessageKind::NodeStatsUpdated,
            BusMessage::JoinRequest { .. } => MessageKind::JoinRequest,
            BusMessage::LeaveRequest { .. } => MessageKind::LeaveRequest,
            BusMessage::SetNodeMonitor { .. } => MessageKind::SetNodeMonitor,
            BusMessage::JoinIgnored { .. } => MessageKind::JoinIgnored,
            BusMessage::JoinError { .. } => MessageKind::JoinError,
            BusMessage::LeaveIgnored { .. } => MessageKind::LeaveIgnored,
            BusMessage::LeaveError { .. } => MessageKind::LeaveError,
            BusMessage::HbBeating { .. } => MessageKind::HbBeating,
            BusMessage::HbStale { .. } => MessageKind::HbStale,
            BusMessage::SubscriberSlow { .. } => MessageKind::SubscriberSlow,
        }
    }
}

/// A single-shot acknowledgement channel attached to a published message.
/// The first handler to call `ack` wins; later calls are no-ops, matching
/// the "first handler that processes it may write exactly one result" rule.
#[derive(Clone)]
pub struct Ack(Arc<Mutex<Option<oneshot::Sender<Result<(), OrchestratorError>>>>>);

impl Ack {
    fn new() -> (Self, oneshot::Receiver<Result<(), OrchestratorError>>) {
        let (tx, rx) = oneshot::channel();
        (Self(Arc::new(Mutex::new(Some(tx)))), rx)
    }

    pub fn ack(&self, result: Result<(), OrchestratorError>) {
        if let Some(tx) = self.0.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// An envelope carries the message, its labels, the publish time, and an
/// optional ack handle.
#[derive(Clone)]
pub struct Envelope {
    pub message: BusMessage,
    pub labels: Labels,
    pub published_at: DateTime<Utc>,
    pub ack: Option<Ack>,
}

impl Envelope {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A subscription filter: a message kind plus labels that must all be
/// present (with matching values) for the message to be delivered.
#[derive(Debug, Clone)]
pub struct Filter {
    pub kind: MessageKind,
    pub required_labels: Vec<(&'static str, String)>,
}

impl Filter {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            required_labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.required_labels.push((key, value.into()));
        self
    }

    fn matches(&self, msg: &BusMessage, labels: &Labels) -> bool {
        if msg.kind() != self.kind {
            return false;
        }
        self.required_labels
            .iter()
            .all(|(k, v)| labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }
}

struct SubscriptionHandle {
    name: String,
    filters: Vec<Filter>,
    tx: mpsc::Sender<Envelope>,
    active: std::sync::atomic::AtomicBool,
    timeout: Duration,
}

/// A subscriber-owned handle: receives filtered messages, and is responsible
/// for its own Start/Stop discipline.
pub struct Subscription {
    id: u64,
    bus: EventBus,
    pub rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Messages published while stopped are discarded (never delivered).
    pub fn stop(&self) {
        if let Some(h) = self.bus.subs.get(&self.id) {
            h.active.store(false, Ordering::SeqCst);
        }
    }

    pub fn start(&self) {
        if let Some(h) = self.bus.subs.get(&self.id) {
            h.active.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subs.remove(&self.id);
    }
}

/// The central pub/sub hub. Cheaply cloneable; the subscriber registry is
/// reference-counted and the hot publish path takes no lock beyond a single
/// `DashMap` shard lock.
#[derive(Clone)]
pub struct EventBus {
    subs: Arc<DashMap<u64, SubscriptionHandle>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subs: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a new, started subscription. `queue_depth` of `None` uses
    /// the default bound; `timeout` of `None` uses the 1s default.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        filters: Vec<Filter>,
        queue_depth: Option<usize>,
        timeout: Option<Duration>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH));
        let handle = SubscriptionHandle {
            name: name.into(),
            filters,
            tx,
            active: std::sync::atomic::AtomicBool::new(true),
            timeout: timeout.unwrap_or(DEFAULT_SUBSCRIBER_TIMEOUT),
        };
        self.subs.insert(id, handle);
        Subscription {
            id,
            bus: self.clone(),
            rx,
        }
    }

    /// Publishes a message with the given labels. Never blocks the
    /// publisher: a subscriber whose queue is full for longer than its
    /// timeout has the message dropped for it, and a `SubscriberSlow`
    /// message is published in its place (not re-delivered to the same
    /// subscriber, to avoid recursive backpressure).
    pub fn publish(&self, message: BusMessage, labels: Labels) {
        self.publish_inner(message, labels, None);
    }

    /// Publishes an ack-able message; the returned receiver resolves with
    /// whatever the first handler writes via `Ack::ack`.
    pub fn publish_with_ack(
        &self,
        message: BusMessage,
        labels: Labels,
    ) -> oneshot::Receiver<Result<(), OrchestratorError>> {
        let (ack, rx) = Ack::new();
        self.publish_inner(message, labels, Some(ack));
        rx
    }

    /// Delivers to every matching, active subscriber. Delivery is
    /// synchronous (`try_send`) whenever a subscriber has queue capacity, so
    /// two successive `publish()` calls from the same publisher always
    /// enqueue onto a given subscriber's channel in the order they were
    /// called. Only a subscriber whose queue is actually full falls back to
    /// a spawned wait-then-drop, which is the one case the publisher must
    /// not block on.
    fn publish_inner(&self, message: BusMessage, labels: Labels, ack: Option<Ack>) {
        let envelope = Envelope {
            message,
            labels,
            published_at: Utc::now(),
            ack,
        };
        for entry in self.subs.iter() {
            let handle = entry.value();
            if !handle.active.load(Ordering::SeqCst) {
                continue;
            }
            if !handle
                .filters
                .iter()
                .any(|f| f.matches(&envelope.message, &envelope.labels))
            {
                continue;
            }
            match handle.tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = %handle.name, "subscriber channel closed, dropping message");
                }
                Err(mpsc::error::TrySendError::Full(env)) => {
                    let tx = handle.tx.clone();
                    let name = handle.name.clone();
                    let timeout = handle.timeout;
                    let bus = self.clone();
                    tokio::spawn(async move {
                        match tokio::time::timeout(timeout, tx.send(env)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(_)) => {
                                debug!(subscriber = %name, "subscriber channel closed, dropping message");
                            }
                            Err(_) => {
                                warn!(subscriber = %name, "subscriber slow, dropping message");
                                bus.publish(
                                    BusMessage::SubscriberSlow {
                                        subscription: name,
                                    },
                                    Vec::new(),
                                );
                            }
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::path::Kind;
    use std::str::FromStr;

    fn test_path() -> Path {
        Path::new("default", Kind::Svc, "s1")
    }

    #[tokio::test]
    async fn delivers_only_matching_filter() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(
            "test",
            vec![Filter::new(MessageKind::HbBeating)],
            None,
            None,
        );
        bus.publish(
            BusMessage::HbStale {
                peer: "n2".into(),
                transport: "hb0".into(),
                status: HeartbeatPeerStatus::default(),
            },
            Vec::new(),
        );
        bus.publish(
            BusMessage::HbBeating {
                peer: "n2".into(),
                transport: "hb0".into(),
                status: HeartbeatPeerStatus::default(),
            },
            Vec::new(),
        );
        let env = sub.recv().await.expect("message delivered");
        assert_eq!(env.message.kind(), MessageKind::HbBeating);
    }

    #[tokio::test]
    async fn stopped_subscription_drops_messages() {
        let bus = EventBus::new();
        let sub = bus.subscribe(
            "test",
            vec![Filter::new(MessageKind::JoinRequest)],
            None,
            None,
        );
        sub.stop();
        bus.publish(BusMessage::JoinRequest { node: "n3".into() }, Vec::new());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sub.rx.is_empty());
    }

    #[tokio::test]
    async fn label_filter_requires_match() {
        let bus = EventBus::new();
        let other = Path::from_str("default/svc/s2").unwrap();
        let mut sub = bus.subscribe(
            "imon-s1",
            vec![
                Filter::new(MessageKind::SetInstanceMonitor)
                    .with_label("path", test_path().to_string()),
            ],
            None,
            None,
        );
        bus.publish(
            BusMessage::SetInstanceMonitor {
                path: other.clone(),
                node: "n1".into(),
                value: MonitorUpdate::default(),
            },
            path_label(&other),
        );
        bus.publish(
            BusMessage::SetInstanceMonitor {
                path: test_path(),
                node: "n1".into(),
                value: MonitorUpdate::default(),
            },
            path_label(&test_path()),
        );
        let env = sub.recv().await.expect("message delivered");
        assert_eq!(env.label("path"), Some("default/svc/s1"));
    }

    #[tokio::test]
    async fn first_ack_wins() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(
            "imon-s1",
            vec![Filter::new(MessageKind::SetInstanceMonitor)],
            None,
            None,
        );
        let rx = bus.publish_with_ack(
            BusMessage::SetInstanceMonitor {
                path: test_path(),
                node: "n1".into(),
                value: MonitorUpdate::default(),
            },
            Vec::new(),
        );
        let env = sub.recv().await.expect("message delivered");
        let ack = env.ack.expect("ack present");
        ack.ack(Ok(()));
        ack.ack(Err(OrchestratorError::Conflict("too late".into())));
        assert!(rx.await.unwrap().is_ok());
    }
}
