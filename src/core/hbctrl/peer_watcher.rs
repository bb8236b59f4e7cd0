// src/core/hbctrl/peer_watcher.rs

//! One watcher task per (peer, transport): holds `(beating, last)` and a
//! re-armable deadline timer. Ported in spirit from
//! `daemon/hb/hbctrl/peer_watcher.go`'s `peerWatch`.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::events::{BusMessage, EventBus};
use crate::core::model::HeartbeatPeerStatus;

use super::Aggregator;

/// Spawns a watcher for `(peer, transport)`. `beats` delivers `true` on
/// every received beat; the watcher re-arms a `timeout` deadline on each
/// `true` and flips to stale if the deadline elapses while beating.
pub fn watch(
    bus: EventBus,
    localhost: String,
    peer: String,
    transport: String,
    mut beats: mpsc::Receiver<bool>,
    timeout: Duration,
    aggregator: Aggregator,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        info!(%peer, %transport, "watching heartbeat");
        let mut status = HeartbeatPeerStatus::default();
        let mut deadline: Option<std::pin::Pin<Box<tokio::time::Sleep>>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                beat = beats.recv() => {
                    match beat {
                        Some(true) => {
                            status.last = Utc::now();
                            if !status.beating {
                                status.beating = true;
                                aggregator_set(&aggregator, &peer, &transport, true);
                                publish(&bus, &localhost, &peer, &transport, status, true);
                            }
                            deadline = Some(Box::pin(tokio::time::sleep(timeout)));
                        }
                        Some(false) | None => {
                            if beat.is_none() {
                                break;
                            }
                        }
                    }
                }
                _ = async {
                    match deadline.as_mut() {
                        Some(d) => d.as_mut().await,
                        None => std::future::pending().await,
                    }
                }, if deadline.is_some() => {
                    deadline = None;
                    if status.beating {
                        status.beating = false;
                        aggregator_set(&aggregator, &peer, &transport, false);
                        publish(&bus, &localhost, &peer, &transport, status, false);
                    }
                }
            }
        }
        info!(%peer, %transport, "done watching heartbeat");
    });
}

fn aggregator_set(aggregator: &Aggregator, peer: &str, transport: &str, beating: bool) {
    aggregator.set(peer, transport, beating);
}

fn publish(
    bus: &EventBus,
    localhost: &str,
    peer: &str,
    transport: &str,
    status: HeartbeatPeerStatus,
    beating: bool,
) {
    let msg = if beating {
        BusMessage::HbBeating {
            peer: peer.to_string(),
            transport: transport.to_string(),
            status,
        }
    } else {
        BusMessage::HbStale {
            peer: peer.to_string(),
            transport: transport.to_string(),
            status,
        }
    };
    bus.publish(msg, crate::core::events::node_label(localhost));
}
