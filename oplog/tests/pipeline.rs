//! End-to-end pipeline tests over the in-memory backend: UDP ingest into
//! the store, then subscription through the tailer.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use oplog::ingest::{spawn_appender, IngestQueue};
use oplog::udp::UdpDaemon;
use oplog::{
    Config, EventKind, Filter, LastId, OplogEvent, OperationId, Stats, Store, Tailer,
};

async fn start_pipeline() -> (Arc<Store>, Arc<Stats>, std::net::SocketAddr) {
    let config = Config::default();
    let store = Arc::new(Store::open(&config).await.expect("in-memory store opens"));
    let stats = Arc::new(Stats::new(config.queue_max));
    let (queue, rx) = IngestQueue::bounded(config.queue_max, stats.clone());
    spawn_appender(store.clone(), rx, stats.clone());
    let daemon = UdpDaemon::bind("127.0.0.1:0", queue, stats.clone())
        .await
        .expect("udp daemon binds");
    let addr = daemon.local_addr().unwrap();
    tokio::spawn(daemon.run());
    (store, stats, addr)
}

fn subscribe(
    store: Arc<Store>,
    last_id: Option<LastId>,
) -> mpsc::Receiver<OplogEvent> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        Tailer::new(store, None)
            .tail(last_id, Filter::default(), tx)
            .await;
    });
    rx
}

async fn recv(rx: &mut mpsc::Receiver<OplogEvent>) -> OplogEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event should arrive")
        .expect("stream should stay open")
}

#[tokio::test]
async fn udp_datagrams_flow_to_subscribers_in_order() {
    let (store, stats, addr) = start_pipeline().await;
    let mut rx = subscribe(store.clone(), None);
    // Let the tailer resolve the log end before producing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(
            br#"{"event":"insert","type":"video","id":"x1","parents":["user/u1"]}"#,
            addr,
        )
        .await
        .unwrap();
    sender
        .send_to(
            br#"{"event":"update","type":"video","id":"x1","parents":["user/u1"]}"#,
            addr,
        )
        .await
        .unwrap();

    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.event_name(), "insert");
    assert_eq!(second.event_name(), "update");
    assert!(first.event_id() < second.event_id());

    // The state collection compacted both operations into one row carrying
    // the update's data.
    let mut states = store.scan_all_states().await.unwrap();
    let state = states.next().await.unwrap().expect("one state row");
    assert_eq!(state.key, "video/x1");
    assert_eq!(state.event, EventKind::Insert);
    assert!(states.next().await.unwrap().is_none());

    assert_eq!(stats.events_received.get(), 2);
    assert_eq!(stats.events_ingested.get(), 2);
    assert_eq!(stats.events_error.get(), 0);
    assert_eq!(stats.events_discarded.get(), 0);
}

#[tokio::test]
async fn resuming_after_an_event_delivers_the_next_one() {
    let (store, _stats, addr) = start_pipeline().await;
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    sender
        .send_to(br#"{"event":"insert","type":"video","id":"x1"}"#, addr)
        .await
        .unwrap();
    sender
        .send_to(br#"{"event":"insert","type":"video","id":"x2"}"#, addr)
        .await
        .unwrap();

    // Read both assigned ids off the log.
    let mut cursor = store.tail_ops(None, Filter::default());
    let e1 = match tokio::time::timeout(Duration::from_secs(5), cursor.next())
        .await
        .expect("first op should be ingested")
        .unwrap()
    {
        oplog::Tailed::Op(op) => op,
        other => panic!("expected an op, got {:?}", other),
    };
    assert_eq!(e1.data.id, "x1");

    // A subscription resuming with e1's id receives e2 next.
    let resume = LastId::parse(&e1.id.expect("stored ops have ids").to_string()).unwrap();
    assert!(matches!(resume, LastId::Operation(_)));
    let mut rx = subscribe(store, Some(resume));
    match recv(&mut rx).await {
        OplogEvent::Operation(op) => assert_eq!(op.data.id, "x2"),
        other => panic!("expected the next operation, got {:?}", other),
    }
}

#[tokio::test]
async fn aged_out_position_falls_back_to_replication() {
    // A tiny cap so earlier ops age out quickly.
    let config = Config {
        cap_max_bytes: 300,
        ..Config::default()
    };
    let store = Arc::new(Store::open(&config).await.unwrap());

    let mut first: Option<OperationId> = None;
    for id in ["x1", "x2", "x3", "x4"] {
        let mut op = oplog::Operation {
            id: None,
            event: EventKind::Insert,
            data: oplog::OperationData {
                timestamp: chrono::Utc::now(),
                parents: vec![],
                object_type: "video".to_string(),
                id: id.to_string(),
                object_ref: None,
            },
        };
        let assigned = store.append(&mut op).await;
        first.get_or_insert(assigned);
    }

    let first = first.unwrap();
    assert!(
        !store
            .has_id(&LastId::Operation(first))
            .await
            .unwrap(),
        "first op should have aged out"
    );

    // Resuming via the fallback replication id replays every object from
    // the state collection, without a reset.
    let fallback = first.fallback();
    assert!(fallback.fallback);
    let mut rx = subscribe(store, Some(LastId::Replication(fallback)));

    let mut names = Vec::new();
    loop {
        let event = recv(&mut rx).await;
        let name = event.event_name().to_string();
        names.push(name.clone());
        if name == "live" {
            break;
        }
    }
    assert_eq!(names.iter().filter(|n| *n == "insert").count(), 4);
    assert!(!names.contains(&"reset".to_string()));
}
