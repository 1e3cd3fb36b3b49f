//! End-to-end checks of the host routes over real sockets.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use caramel_core::joints::JointRole;
use caramel_core::SessionStatus;
use caramel_host::{HostDriver, StaticEnablement};
use caramel_settings::HostSettings;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_host(enabled: Vec<JointRole>) -> (HostDriver, u16) {
    let settings = HostSettings {
        bind: "127.0.0.1".into(),
        port: 0,
        advertise: false,
        ..Default::default()
    };
    let driver = HostDriver::new(settings, Arc::new(StaticEnablement(enabled)));
    let addr = driver.initialize().await.unwrap();
    (driver, addr.port())
}

async fn open(port: u16, path: &str) -> Ws {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}{path}"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn joint(name: &str) -> Value {
    json!({
        "type": "joint",
        "name": name,
        "isTracked": true,
        "position": {"x": 0.1, "y": 1.6, "z": 0.0},
        "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
    })
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn ping_round_trip() {
    let (driver, port) = start_host(vec![JointRole::Head]).await;
    let mut ws = open(port, "/rpc").await;

    send(&mut ws, json!({"id": 1, "method": "Ping", "params": {"name": "iPhone"}})).await;
    let resp = recv(&mut ws).await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["result"]["message"], "Saying hello to iPhone!");

    send(&mut ws, json!({"id": 2, "method": "PingDriverService", "params": {}})).await;
    let resp = recv(&mut ws).await;
    assert_eq!(resp["result"]["status"], 1);
    assert_eq!(driver.status(), SessionStatus::Success);

    driver.shutdown().await;
}

#[tokio::test]
async fn third_head_frame_triggers_update() {
    let (driver, port) = start_host(vec![JointRole::Head, JointRole::SpineWaist]).await;
    let mut ws = open(port, "/joints").await;

    for _ in 0..3 {
        send(&mut ws, joint("left_hand_joint")).await;
        send(&mut ws, joint("hips_joint")).await;
        send(&mut ws, joint("head_joint")).await;
    }
    let update = recv(&mut ws).await;
    assert_eq!(update["type"], "joints");
    assert_eq!(update["names"], json!(["head_joint", "hips_joint"]));

    send(&mut ws, joint("left_hand_joint")).await;
    send(&mut ws, json!({"type": "complete"})).await;
    assert_eq!(recv(&mut ws).await["type"], "completed");

    let tracked = driver.state().tracker().tracked_roles();
    assert!(tracked.contains(&JointRole::Head));
    assert!(!tracked.contains(&JointRole::HandLeft));
    assert!(!tracked.contains(&JointRole::WristLeft));
    assert!(driver.is_skeleton_tracked());

    driver.shutdown().await;
}

#[tokio::test]
async fn unknown_joint_is_skipped() {
    let (driver, port) = start_host(vec![JointRole::Head]).await;
    let mut ws = open(port, "/joints").await;

    send(&mut ws, joint("tail_joint")).await;
    send(&mut ws, joint("head_joint")).await;
    send(&mut ws, json!({"type": "complete"})).await;
    assert_eq!(recv(&mut ws).await["type"], "completed");

    assert_eq!(driver.status(), SessionStatus::Success);
    assert_eq!(driver.state().tracker().tracked_roles(), vec![JointRole::Head]);

    driver.shutdown().await;
}

#[tokio::test]
async fn pose_batches_share_one_socket() {
    let (driver, port) = start_host(vec![JointRole::Head]).await;
    let mut ws = open(port, "/poses").await;

    for _ in 0..2 {
        send(
            &mut ws,
            json!({"type": "pose", "role": 0, "position": {"x": 0.0, "y": 1.7, "z": 0.0},
                   "rotation": {"x": 0.0, "y": 0.0, "z": 0.0}}),
        )
        .await;
        send(
            &mut ws,
            json!({"type": "pose", "role": 16, "position": {"x": 0.0, "y": 1.0, "z": 0.0}}),
        )
        .await;
        send(&mut ws, json!({"type": "complete"})).await;
        assert_eq!(recv(&mut ws).await["type"], "completed");
    }

    let snapshot = driver.update();
    assert!(snapshot.skeleton_tracked);
    let waist = driver.state().tracker().get(JointRole::SpineWaist).unwrap();
    assert!(waist.is_tracked);
    assert_eq!(waist.position.y, 1.0);

    send(&mut ws, json!({"type": "complete"})).await;
    assert_eq!(recv(&mut ws).await["type"], "completed");
    settle().await;
    assert!(!driver.is_skeleton_tracked());

    driver.shutdown().await;
}

#[tokio::test]
async fn malformed_frame_is_a_protocol_error_until_next_contact() {
    let (driver, port) = start_host(vec![JointRole::Head]).await;
    let mut ws = open(port, "/joints").await;

    send(&mut ws, joint("head_joint")).await;
    ws.send(Message::text("{not json")).await.unwrap();
    settle().await;
    assert_eq!(driver.status(), SessionStatus::ErrorProtocol);
    assert!(driver.status_message().contains("INVALID_MESSAGE"));

    send(&mut ws, joint("head_joint")).await;
    settle().await;
    assert_eq!(driver.status(), SessionStatus::Success);

    driver.shutdown().await;
}

#[tokio::test]
async fn connections_show_up_in_health() {
    let (driver, port) = start_host(vec![JointRole::Head]).await;
    let _ws = open(port, "/poses").await;
    settle().await;

    let body: Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["initialized"], true);
    assert_eq!(body["connections"][0]["kind"], "poses");

    driver.shutdown().await;
}
