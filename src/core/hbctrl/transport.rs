// src/core/hbctrl/transport.rs

//! The `HeartbeatTransport` capability set: how beats are actually
//! received is a driver concern, out of scope beyond one reference
//! implementation (a UDP unicast ring), per spec.md §1/§4.4.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Beat;

#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    /// The transport's name, as configured (`hb#0`, `hb#1`, ...).
    fn name(&self) -> &str;

    /// Runs the transport's receive loop until cancelled, forwarding every
    /// observed beat (or loss) to `tx`.
    async fn run(&self, tx: mpsc::Sender<Beat>, cancel: CancellationToken);
}

/// A UDP "unicast ring": each configured peer address is polled with a
/// lightweight datagram exchange; receipt within the poll interval counts
/// as a beat.
pub struct UdpRingTransport {
    name: String,
    peers: Vec<(String, SocketAddr)>,
    bind_addr: SocketAddr,
    poll_interval: Duration,
}

impl UdpRingTransport {
    pub fn new(
        name: impl Into<String>,
        peers: Vec<(String, SocketAddr)>,
        bind_addr: SocketAddr,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            peers,
            bind_addr,
            poll_interval,
        }
    }
}

#[async_trait]
impl HeartbeatTransport for UdpRingTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, tx: mpsc::Sender<Beat>, cancel: CancellationToken) {
        let socket = match UdpSocket::bind(self.bind_addr).await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                warn!(transport = %self.name, error = %e, "failed to bind heartbeat socket");
                return;
            }
        };
        let mut interval = tokio::time::interval(self.poll_interval);
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    for (peer, addr) in &self.peers {
                        let _ = socket.send_to(self.name.as_bytes(), addr).await;
                        let beating = tokio::time::timeout(
                            self.poll_interval / 2,
                            socket.recv_from(&mut buf),
                        )
                        .await
                        .is_ok();
                        debug!(%peer, transport = %self.name, beating, "heartbeat poll");
                        let _ = tx
                            .send(Beat {
                                peer: peer.clone(),
                                transport: self.name.clone(),
                                beating,
                            })
                            .await;
                    }
                }
            }
        }
    }
}
