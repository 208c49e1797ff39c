use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tunnel_console::bridge::{BackendEvent, EventBridge, EventSource};
use tunnel_console::gateway::{BackendError, ForwardBackend, ForwardRequest};
use tunnel_console::ipc::IpcBackend;
use tunnel_console::telemetry::TelemetrySample;

struct FakeBackend {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeBackend {
    async fn read_request(&mut self) -> Value {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn send(&mut self, value: Value) {
        let mut line = serde_json::to_vec(&value).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();
    }
}

async fn pair() -> (IpcBackend, FakeBackend) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (stream, _) = accepted.unwrap();
    let (read_half, writer) = stream.into_split();
    (
        IpcBackend::from_stream(client.unwrap()),
        FakeBackend {
            lines: BufReader::new(read_half).lines(),
            writer,
        },
    )
}

fn request() -> ForwardRequest {
    ForwardRequest {
        local_ip: "127.0.0.1".to_string(),
        local_port: 5678,
        remote_ip: "10.0.0.5".to_string(),
        remote_port: 22,
        user: "root".to_string(),
        password: "hunter2".to_string(),
    }
}

#[tokio::test]
async fn forward_and_stop_round_trip() {
    let (client, mut server) = pair().await;
    let client = Arc::new(client);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.forward(request()).await }
    });

    let req = server.read_request().await;
    assert_eq!(req["cmd"], "forward");
    assert_eq!(req["args"]["localIp"], "127.0.0.1");
    assert_eq!(req["args"]["remotePort"], 22);
    assert_eq!(req["args"]["password"], "hunter2");
    server
        .send(json!({"type": "response", "id": req["id"], "ok": true}))
        .await;
    assert_eq!(call.await.unwrap(), Ok(()));

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.stop().await }
    });
    let req = server.read_request().await;
    assert_eq!(req["cmd"], "stop");
    assert!(req.get("args").is_none());
    server
        .send(json!({"type": "response", "id": req["id"], "ok": false, "error": "not forwarding"}))
        .await;
    assert_eq!(
        call.await.unwrap(),
        Err(BackendError::Rejected("not forwarding".to_string()))
    );
}

#[tokio::test]
async fn pushed_events_reach_the_bridge_in_order() {
    let (client, mut server) = pair().await;
    let client = Arc::new(client);
    let source: Arc<dyn EventSource> = client.clone();
    let mut bridge = EventBridge::activate(source);

    server
        .send(json!({"type": "event", "event": "connect-count-change", "payload": 2}))
        .await;
    server
        .send(json!({"type": "event", "event": "something-else", "payload": null}))
        .await;
    server
        .send(json!({
            "type": "event",
            "event": "update-transfer-statistic",
            "payload": {"send_bytes": 512, "recv_bytes": 2048}
        }))
        .await;

    assert_eq!(bridge.recv().await, Some(BackendEvent::ConnectCountChange(2)));
    assert_eq!(
        bridge.recv().await,
        Some(BackendEvent::TransferStatistic(TelemetrySample {
            send_bytes: 512,
            recv_bytes: 2048,
        }))
    );

    bridge.deactivate();
    server
        .send(json!({"type": "event", "event": "connect-count-change", "payload": 3}))
        .await;
    // Nothing left to deliver to once the bridge is gone.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.is_closed());
}

#[tokio::test]
async fn pending_call_fails_when_backend_goes_away() {
    let (client, mut server) = pair().await;
    let client = Arc::new(client);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.forward(request()).await }
    });
    let _ = server.read_request().await;
    drop(server);

    assert_eq!(call.await.unwrap(), Err(BackendError::Disconnected));
    assert!(client.is_closed());
    assert_eq!(client.stop().await, Err(BackendError::Disconnected));
}

#[tokio::test]
async fn event_stream_ends_when_backend_goes_away() {
    let (client, mut server) = pair().await;
    let client = Arc::new(client);
    let source: Arc<dyn EventSource> = client.clone();
    let mut bridge = EventBridge::activate(source);

    server
        .send(json!({"type": "event", "event": "connect-count-change", "payload": 1}))
        .await;
    drop(server);

    // Events already sent are still delivered before the end of the stream.
    assert_eq!(bridge.recv().await, Some(BackendEvent::ConnectCountChange(1)));
    let end = tokio::time::timeout(Duration::from_secs(5), bridge.recv()).await;
    assert_eq!(end, Ok(None));
    assert!(client.is_closed());
}
