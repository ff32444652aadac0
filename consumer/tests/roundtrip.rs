//! Full wire round trips: an in-memory oplog server behind its HTTP API,
//! consumed through the reconnecting client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};

use oplog::server::{AppState, OplogServer};
use oplog::{Config, EventKind, Stats, Store, Tailer};
use oplog_common::storage::in_memory::InMemoryStorage;
use oplog_consumer::{Consumer, Decoder, Error, Operation, Options};

async fn start_server(password: Option<String>) -> (String, Arc<Store>) {
    start_server_with(password, Config::default()).await
}

async fn start_server_with(password: Option<String>, config: Config) -> (String, Arc<Store>) {
    let store = Arc::new(Store::new(
        Arc::new(InMemoryStorage::new()),
        &config,
    ));
    let stats = Arc::new(Stats::new(config.queue_max));
    let tailer = Arc::new(Tailer::new(store.clone(), None));
    let state = AppState {
        store: store.clone(),
        tailer,
        stats,
        password,
    };
    let server = OplogServer::bind("127.0.0.1:0", state)
        .await
        .expect("server binds");
    let addr = server.local_addr().expect("bound address");
    tokio::spawn(server.run());
    (format!("http://{}", addr), store)
}

async fn append(store: &Store, event: EventKind, id: &str) -> String {
    let assigned = store
        .append(&mut oplog::Operation {
            id: None,
            event,
            data: oplog::OperationData {
                timestamp: Utc::now(),
                parents: vec!["user/u1".to_string()],
                object_type: "video".to_string(),
                id: id.to_string(),
                object_ref: None,
            },
        })
        .await;
    assigned.to_string()
}

async fn recv(rx: &mut mpsc::Receiver<Operation>) -> Operation {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("operation should arrive")
        .expect("channel should stay open")
}

#[tokio::test]
async fn bootstraps_then_streams_live_and_persists_position() {
    let (url, store) = start_server(None).await;
    append(&store, EventKind::Insert, "x1").await;

    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("oplog.state");
    let consumer = Arc::new(
        Consumer::subscribe(
            &url,
            Options {
                state_file: Some(state_file.clone()),
                ..Options::default()
            },
        )
        .await
        .expect("subscribe succeeds"),
    );

    let (ops_tx, mut ops_rx) = mpsc::channel(64);
    let (errs_tx, _errs_rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(consumer.clone().process(ops_tx, errs_tx, stop_rx, done_tx));

    // The consumer emits a local reset when starting a full replication.
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.event, "reset");
    assert_eq!(op.id, "0");
    op.done();

    // The server repeats the reset at the start of its stream.
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.event, "reset");
    assert_eq!(op.id, "1");
    op.done();

    // The replicated state, identified by a millisecond replication id.
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.event, "insert");
    assert!(op.id.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(op.data.as_ref().unwrap().id, "x1");
    op.done();

    // The live boundary marker.
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.event, "live");
    op.done();

    // A new operation arrives live, identified by its hex operation id.
    let live_id = append(&store, EventKind::Insert, "x2").await;
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.event, "insert");
    assert_eq!(op.id, live_id);
    assert_eq!(op.data.as_ref().unwrap().id, "x2");
    op.done();

    // The acknowledged position reaches the state file within a couple of
    // save ticks.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(saved) = std::fs::read_to_string(&state_file) {
            if saved == live_id {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "state file should reach {}",
            live_id
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("consumer should stop")
        .unwrap();
}

#[tokio::test]
async fn rejects_bad_credentials_at_subscribe_time() {
    let (url, _store) = start_server(Some("secret".to_string())).await;

    let result = Consumer::subscribe(
        &url,
        Options {
            password: Some("wrong".to_string()),
            ..Options::default()
        },
    )
    .await;

    assert!(matches!(result, Err(Error::AccessDenied)));
}

#[tokio::test]
async fn accepts_correct_credentials() {
    let (url, store) = start_server(Some("secret".to_string())).await;

    let consumer = Arc::new(
        Consumer::subscribe(
            &url,
            Options {
                password: Some("secret".to_string()),
                ..Options::default()
            },
        )
        .await
        .expect("subscribe succeeds"),
    );

    let (ops_tx, mut ops_rx) = mpsc::channel(64);
    let (errs_tx, _errs_rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, _done_rx) = oneshot::channel();
    tokio::spawn(consumer.clone().process(ops_tx, errs_tx, stop_rx, done_tx));

    // Live-only subscription: the next append is delivered.
    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&store, EventKind::Insert, "x1").await;
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.event, "insert");
}

#[tokio::test]
async fn resumes_from_a_persisted_operation_id() {
    let (url, store) = start_server(None).await;
    let first = append(&store, EventKind::Insert, "x1").await;
    let second = append(&store, EventKind::Insert, "x2").await;

    // Pre-seed the state file with the first operation id.
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("oplog.state");
    std::fs::write(&state_file, &first).unwrap();

    let consumer = Arc::new(
        Consumer::subscribe(
            &url,
            Options {
                state_file: Some(state_file),
                ..Options::default()
            },
        )
        .await
        .expect("subscribe succeeds"),
    );

    let (ops_tx, mut ops_rx) = mpsc::channel(64);
    let (errs_tx, mut errs_rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let (done_tx, _done_rx) = oneshot::channel();
    tokio::spawn(consumer.clone().process(ops_tx, errs_tx, stop_rx, done_tx));

    // The resume is honored (no ResumeFailed surfaced) and the very next
    // operation is the second one.
    let op = recv(&mut ops_rx).await;
    assert_eq!(op.id, second);
    assert_eq!(op.data.as_ref().unwrap().id, "x2");
    op.done();
    assert!(errs_rx.try_recv().is_err());
}

#[tokio::test]
async fn aged_out_position_starts_replication_without_echo() {
    // A cap small enough that the first operations age out of the log.
    let config = Config {
        cap_max_bytes: 300,
        ..Config::default()
    };
    let (url, store) = start_server_with(None, config).await;

    let first = append(&store, EventKind::Insert, "x1").await;
    for id in ["x2", "x3", "x4"] {
        append(&store, EventKind::Insert, id).await;
    }

    let response = reqwest::Client::new()
        .get(&url)
        .header("Accept", "text/event-stream")
        .header("Last-Event-ID", &first)
        .send()
        .await
        .expect("request succeeds");

    // The server could not honor the resume: 200, but no echo.
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers().get("Last-Event-ID").is_none());

    // The stream opens in replication mode: millisecond ids, no reset.
    let mut decoder = Decoder::new(Box::pin(response.bytes_stream()));
    let event = decoder.next().await.expect("first frame decodes");
    assert_eq!(event.event, "insert");
    assert!(event.id.bytes().all(|b| b.is_ascii_digit()));
}

#[tokio::test]
async fn empty_last_event_id_is_treated_as_absent() {
    let (url, store) = start_server(None).await;
    append(&store, EventKind::Insert, "x1").await;

    let response = reqwest::Client::new()
        .get(&url)
        .header("Accept", "text/event-stream")
        .header("Last-Event-ID", "")
        .send()
        .await
        .expect("request succeeds");

    // No echo: an empty id is not a resume position.
    assert_eq!(response.status().as_u16(), 200);
    assert!(response.headers().get("Last-Event-ID").is_none());

    // The subscription is live-only: only operations appended after the
    // connection are delivered, starting past x1.
    let store_for_append = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        append(&store_for_append, EventKind::Insert, "x2").await;
    });

    let mut decoder = Decoder::new(Box::pin(response.bytes_stream()));
    let event = tokio::time::timeout(Duration::from_secs(10), decoder.next())
        .await
        .expect("a live event should arrive")
        .expect("frame decodes");
    assert_eq!(event.data.as_ref().unwrap().id, "x2");
}

#[tokio::test]
async fn rejects_non_event_stream_accept_header() {
    let (url, _store) = start_server(None).await;

    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .expect("request succeeds");

    assert_eq!(response.status().as_u16(), 406);
}

#[tokio::test]
async fn status_endpoint_reports_counters() {
    let (url, store) = start_server(None).await;
    append(&store, EventKind::Insert, "x1").await;

    let body = reqwest::get(format!("{}/status", url))
        .await
        .expect("status reachable")
        .text()
        .await
        .expect("status has a body");
    let status: serde_json::Value = serde_json::from_str(&body).expect("status is json");

    assert_eq!(status["status"], "OK");
    assert_eq!(status["queue_max_size"], 100_000);
    assert!(status.get("events_sent").is_some());
    assert!(status.get("clients").is_some());
}
