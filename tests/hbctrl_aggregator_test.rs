use std::time::Duration;

use clustord::core::events::{BusMessage, EventBus, Filter, MessageKind};
use clustord::core::hbctrl::{peer_watcher, Aggregator};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn combined_liveness_is_or_across_transports() {
    let bus = EventBus::new();
    let aggregator = Aggregator::new();
    let cancel = CancellationToken::new();

    let (tx_hb0, rx_hb0) = mpsc::channel(8);
    let (tx_hb1, rx_hb1) = mpsc::channel(8);
    peer_watcher::watch(
        bus.clone(),
        "n1".into(),
        "n2".into(),
        "hb0".into(),
        rx_hb0,
        Duration::from_millis(50),
        aggregator.clone(),
        cancel.clone(),
    );
    peer_watcher::watch(
        bus.clone(),
        "n1".into(),
        "n2".into(),
        "hb1".into(),
        rx_hb1,
        Duration::from_millis(50),
        aggregator.clone(),
        cancel.clone(),
    );

    assert!(!aggregator.combined("n2"));

    tx_hb1.send(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(
        aggregator.combined("n2"),
        "one beating transport is enough for OR-combined liveness"
    );

    // hb0 never beats; hb1 goes stale after its timeout with no further beats.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!aggregator.combined("n2"), "both transports now stale");

    tx_hb0.send(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(aggregator.combined("n2"));

    cancel.cancel();
}

#[tokio::test]
async fn beating_transition_publishes_hb_beating() {
    let bus = EventBus::new();
    let aggregator = Aggregator::new();
    let cancel = CancellationToken::new();
    let mut sub = bus.subscribe(
        "test",
        vec![Filter::new(MessageKind::HbBeating)],
        None,
        None,
    );

    let (tx, rx) = mpsc::channel(8);
    peer_watcher::watch(
        bus.clone(),
        "n1".into(),
        "n3".into(),
        "hb0".into(),
        rx,
        Duration::from_secs(5),
        aggregator,
        cancel.clone(),
    );

    tx.send(true).await.unwrap();
    let env = sub.recv().await.expect("hb_beating published");
    match env.message {
        BusMessage::HbBeating { peer, transport, .. } => {
            assert_eq!(peer, "n3");
            assert_eq!(transport, "hb0");
        }
        other => panic!("unexpected message: {other:?}"),
    }
    cancel.cancel();
}
