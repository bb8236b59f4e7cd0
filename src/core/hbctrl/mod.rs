// src/core/hbctrl/mod.rs

//! The Heartbeat Controller: one watcher actor per (peer, transport),
//! maintaining a re-armable liveness deadline, plus an aggregator exposing
//! each peer's OR-combined liveness across transports. Grounded in
//! `daemon/hb/hbctrl/peer_watcher.go`.

pub mod peer_watcher;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::events::EventBus;

pub use peer_watcher::watch;
pub use transport::{HeartbeatTransport, UdpRingTransport};

/// `(peer, transport)` liveness as tracked by one watcher.
#[derive(Debug, Clone, Copy, Default)]
struct PeerTransportState {
    beating: bool,
}

/// Aggregates per-(peer,transport) liveness into a per-peer combined
/// (logical-OR) view that nmon and imon consume.
#[derive(Clone, Default)]
pub struct Aggregator {
    inner: Arc<RwLock<HashMap<(String, String), PeerTransportState>>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, peer: &str, transport: &str, beating: bool) {
        self.inner
            .write()
            .insert((peer.to_string(), transport.to_string()), PeerTransportState { beating });
    }

    /// Logical OR across every transport configured for `peer`.
    pub fn combined(&self, peer: &str) -> bool {
        self.inner
            .read()
            .iter()
            .any(|((p, _), s)| p == peer && s.beating)
    }
}

/// One (peer, transport) beat event, fed by a transport's receive loop.
pub struct Beat {
    pub peer: String,
    pub transport: String,
    pub beating: bool,
}

/// Spawns one watcher task per (peer, transport) pair named in `transports`,
/// wires a shared beat channel, and starts every configured transport.
/// Returns the aggregator other actors read combined liveness from.
pub async fn spawn(
    bus: EventBus,
    localhost: String,
    transports: Vec<Arc<dyn HeartbeatTransport>>,
    timeout: Duration,
    cancel: CancellationToken,
) -> Aggregator {
    let aggregator = Aggregator::new();
    let (beat_tx, mut beat_rx) = mpsc::channel::<Beat>(256);

    for transport in &transports {
        let transport = transport.clone();
        let tx = beat_tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            transport.run(tx, cancel).await;
        });
    }

    let agg = aggregator.clone();
    let bus_for_watchers = bus.clone();
    let watcher_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut watchers: HashMap<(String, String), mpsc::Sender<bool>> = HashMap::new();
        loop {
            tokio::select! {
                _ = watcher_cancel.cancelled() => break,
                Some(beat) = beat_rx.recv() => {
                    let key = (beat.peer.clone(), beat.transport.clone());
                    let sender = watchers.entry(key.clone()).or_insert_with(|| {
                        let (tx, rx) = mpsc::channel(8);
                        peer_watcher::watch(
                            bus_for_watchers.clone(),
                            localhost.clone(),
                            beat.peer.clone(),
                            beat.transport.clone(),
                            rx,
                            timeout,
                            agg.clone(),
                            watcher_cancel.clone(),
                        );
                        tx
                    });
                    let _ = sender.send(beat.beating).await;
                }
            }
        }
    });

    info!("hbctrl started");
    aggregator
}
