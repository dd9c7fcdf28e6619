// Integration tests for the gateway connection manager pipeline

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use warp::ws::Message;

use rusty_push::config::GatewayConfig;
use rusty_push::core::{
    BizMessage, Connection, ConnectionManager, JsonEncoder, MessageEncoder, WireMessage,
};
use rusty_push::error::{Result, RustyPushError};

fn config(bucket_count: usize, dispatch_worker_count: usize) -> GatewayConfig {
    GatewayConfig {
        bucket_count,
        dispatch_channel_size: 256,
        dispatch_worker_count,
        bucket_job_channel_size: 16,
        bucket_job_worker_count: 2,
        ..GatewayConfig::default()
    }
}

fn connect(
    mgr: &ConnectionManager,
    id: u64,
) -> (Arc<Connection>, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = Arc::new(Connection::new(id, tx));
    mgr.add_conn(conn.clone());
    (conn, rx)
}

async fn recv_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
    let msg = timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a push")
        .expect("connection channel closed");
    serde_json::from_str(msg.to_str().expect("text frame")).expect("json payload")
}

async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<Message>) {
    sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err(), "connection received an unexpected push");
}

async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

struct CountingEncoder(AtomicUsize);

impl MessageEncoder for CountingEncoder {
    fn encode(&self, message: &BizMessage) -> Result<WireMessage> {
        self.0.fetch_add(1, Ordering::SeqCst);
        JsonEncoder.encode(message)
    }
}

struct FailingEncoder;

impl MessageEncoder for FailingEncoder {
    fn encode(&self, _message: &BizMessage) -> Result<WireMessage> {
        Err(RustyPushError::SerializationError("unsupported".to_string()))
    }
}

#[tokio::test]
async fn test_connection_routes_to_owning_bucket() {
    let mgr = ConnectionManager::new(&config(4, 1)).unwrap();
    let (conn, _rx) = connect(&mgr, 6);

    assert_eq!(mgr.bucket_index(conn.id), 2);
    assert_eq!(mgr.bucket(2).unwrap().conn_count(), 1);
    assert_eq!(mgr.stats().online_connections.get(), 1);

    mgr.join_room("R", &conn).unwrap();
    assert_eq!(mgr.get_bucket(conn.id).room_member_count("R"), 1);
    // Shard assignment does not change over the connection's lifetime
    assert_eq!(mgr.bucket_index(conn.id), 2);

    mgr.leave_room("R", &conn).unwrap();
    mgr.del_conn(&conn);
    mgr.del_conn(&conn);
    assert_eq!(mgr.bucket(2).unwrap().conn_count(), 0);
    assert_eq!(mgr.stats().online_connections.get(), 0);
}

#[tokio::test]
async fn test_join_room_of_unregistered_connection_fails() {
    let mgr = ConnectionManager::new(&config(4, 1)).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let stranger = Arc::new(Connection::new(3, tx));

    assert!(matches!(
        mgr.join_room("R", &stranger),
        Err(RustyPushError::ConnectionNotInBucket(3))
    ));
}

#[tokio::test]
async fn test_push_all_reaches_every_connection_once() {
    let mgr = ConnectionManager::new(&config(4, 2)).unwrap();
    mgr.run_async();

    let mut receivers: Vec<_> = (1..=8).map(|id| connect(&mgr, id)).collect();
    mgr.push_all(BizMessage::push(json!({"n": 1}))).unwrap();

    for (_, rx) in receivers.iter_mut() {
        let payload = recv_json(rx).await;
        assert_eq!(payload, json!({"type": "PUSH", "data": {"n": 1}}));
    }
    for (_, rx) in receivers.iter_mut() {
        assert_silent(rx).await;
    }
}

#[tokio::test]
async fn test_push_room_reaches_members_across_buckets() {
    let mgr = ConnectionManager::new(&config(4, 2)).unwrap();
    mgr.run_async();

    let (a, mut a_rx) = connect(&mgr, 1);
    let (b, mut b_rx) = connect(&mgr, 2);
    let (_c, mut c_rx) = connect(&mgr, 3);
    mgr.join_room("R", &a).unwrap();
    mgr.join_room("R", &b).unwrap();

    mgr.push_room("R", BizMessage::push(json!("hi"))).unwrap();

    assert_eq!(recv_json(&mut a_rx).await["data"], json!("hi"));
    assert_eq!(recv_json(&mut b_rx).await["data"], json!("hi"));
    assert_silent(&mut c_rx).await;

    // Unknown rooms have no members
    mgr.push_room("nobody", BizMessage::push(json!("x"))).unwrap();
    assert_silent(&mut a_rx).await;
}

#[tokio::test]
async fn test_room_one_found_in_single_bucket() {
    let mgr = ConnectionManager::new(&config(4, 1)).unwrap();
    mgr.run_async();

    // One connection per bucket, only bucket 2 has a room member
    let (_c0, mut rx0) = connect(&mgr, 4);
    let (_c1, mut rx1) = connect(&mgr, 5);
    let (member, mut member_rx) = connect(&mgr, 6);
    let (_c3, mut rx3) = connect(&mgr, 7);
    mgr.join_room("R", &member).unwrap();

    let message = WireMessage::text("check");
    for idx in [0, 1, 3] {
        assert!(!mgr.bucket(idx).unwrap().push_room_one("R", &message));
    }

    mgr.push_room_one("R", BizMessage::push(json!("only-one"))).unwrap();

    assert_eq!(recv_json(&mut member_rx).await["data"], json!("only-one"));
    assert_silent(&mut member_rx).await;
    for rx in [&mut rx0, &mut rx1, &mut rx3] {
        assert_silent(rx).await;
    }
    assert_eq!(mgr.stats().room_one_miss.get(), 0);
}

#[tokio::test]
async fn test_room_one_stops_at_first_bucket_with_member() {
    let mgr = ConnectionManager::new(&config(4, 4)).unwrap();
    mgr.run_async();

    let (first, mut first_rx) = connect(&mgr, 1);
    let (second, mut second_rx) = connect(&mgr, 3);
    mgr.join_room("R", &first).unwrap();
    mgr.join_room("R", &second).unwrap();

    mgr.push_room_one("R", BizMessage::push(json!(1))).unwrap();

    recv_json(&mut first_rx).await;
    assert_silent(&mut first_rx).await;
    assert_silent(&mut second_rx).await;
}

#[tokio::test]
async fn test_room_one_without_member_is_counted() {
    let mgr = ConnectionManager::new(&config(4, 1)).unwrap();
    mgr.run_async();
    let (_conn, mut rx) = connect(&mgr, 1);

    mgr.push_room_one("empty", BizMessage::push(json!(1))).unwrap();

    let stats = mgr.stats().clone();
    wait_until(|| stats.room_one_miss.get() == 1).await;
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn test_concurrent_room_one_jobs_never_cross_wire() {
    let mgr = ConnectionManager::new(&config(8, 4)).unwrap();
    mgr.run_async();

    let (member, mut member_rx) = connect(&mgr, 7);
    let (_other, mut other_rx) = connect(&mgr, 1);
    mgr.join_room("R", &member).unwrap();

    for n in 0..50 {
        mgr.push_room_one("R", BizMessage::push(json!(n))).unwrap();
        mgr.push_room_one("empty", BizMessage::push(json!(n))).unwrap();
    }

    let mut seen = Vec::new();
    for _ in 0..50 {
        seen.push(recv_json(&mut member_rx).await["data"].as_i64().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<i64>>());

    let stats = mgr.stats().clone();
    wait_until(|| stats.room_one_miss.get() == 50).await;
    assert_silent(&mut member_rx).await;
    assert_silent(&mut other_rx).await;
}

#[tokio::test]
async fn test_full_dispatch_channel_rejects_without_blocking() {
    let config = GatewayConfig {
        dispatch_channel_size: 1,
        ..config(4, 1)
    };
    // Workers are never started, so nothing drains the queue
    let mgr = ConnectionManager::new(&config).unwrap();

    assert!(mgr.push_all(BizMessage::push(json!(1))).is_ok());
    assert!(matches!(
        mgr.push_all(BizMessage::push(json!(2))),
        Err(RustyPushError::DispatchChannelFull)
    ));
    assert!(matches!(
        mgr.push_room_one("R", BizMessage::push(json!(3))),
        Err(RustyPushError::DispatchChannelFull)
    ));

    let stats = mgr.stats();
    assert_eq!(stats.dispatch_fail.get(), 2);
    assert_eq!(stats.dispatch_total.get(), 1);
    assert_eq!(stats.dispatch_pending.get(), 1);
}

#[tokio::test]
async fn test_job_serialized_once_regardless_of_fan_out() {
    let encoder = Arc::new(CountingEncoder(AtomicUsize::new(0)));
    let mgr = ConnectionManager::with_encoder(&config(16, 4), encoder.clone()).unwrap();
    mgr.run_async();

    let mut receivers: Vec<_> = (0..16).map(|id| connect(&mgr, id)).collect();
    for n in 0..3 {
        mgr.push_all(BizMessage::push(json!(n))).unwrap();
    }

    for (_, rx) in receivers.iter_mut() {
        for _ in 0..3 {
            recv_json(rx).await;
        }
    }
    assert_eq!(encoder.0.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_serialization_failure_drops_job() {
    let mgr = ConnectionManager::with_encoder(&config(4, 1), Arc::new(FailingEncoder)).unwrap();
    mgr.run_async();
    let (_conn, mut rx) = connect(&mgr, 1);

    // Submission succeeds; the failure only shows up in the stats
    assert!(mgr.push_all(BizMessage::push(json!(1))).is_ok());

    let stats = mgr.stats().clone();
    wait_until(|| stats.serialize_fail.get() == 1).await;
    assert_silent(&mut rx).await;
    assert_eq!(stats.dispatch_pending.get(), 0);
}

#[tokio::test]
async fn test_run_async_twice_is_harmless() {
    let mgr = ConnectionManager::new(&config(2, 1)).unwrap();
    mgr.run_async();
    mgr.run_async();

    let (_conn, mut rx) = connect(&mgr, 1);
    mgr.push_all(BizMessage::push(json!("once"))).unwrap();
    recv_json(&mut rx).await;
    assert_silent(&mut rx).await;
}
