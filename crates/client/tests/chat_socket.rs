//! End-to-end tests against a local tungstenite server.

use std::sync::Arc;
use std::time::Duration;

use eventhub_client::config::DEFAULT_API_URL;
use eventhub_client::ws::TungsteniteTransport;
use eventhub_client::{
    ChannelIdentity, ChannelType, ChatSocket, ClientConfig, CloseReason, ConnectionState,
    EventKind, LifecycleEvent, LifecycleKind,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

fn socket_for(addr: std::net::SocketAddr) -> ChatSocket {
    let config = ClientConfig::new(&format!("ws://{addr}"), DEFAULT_API_URL).unwrap();
    ChatSocket::new(config, TungsteniteTransport)
}

fn lifecycle_feed(socket: &ChatSocket) -> UnboundedReceiver<LifecycleEvent> {
    let (tx, rx) = unbounded_channel();
    for kind in [LifecycleKind::Opened, LifecycleKind::Closed] {
        let tx = tx.clone();
        socket.on_lifecycle(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

fn event_feed(socket: &ChatSocket, kind: EventKind) -> UnboundedReceiver<Value> {
    let (tx, rx) = unbounded_channel();
    socket.on(kind, move |envelope| {
        let _ = tx.send(envelope.payload.clone());
    });
    rx
}

#[tokio::test]
async fn exchanges_frames_with_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requested = Arc::new(Mutex::new(None::<String>));
    let (received_tx, mut received) = unbounded_channel();

    let server = {
        let requested = Arc::clone(&requested);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let capture = |req: &Request, resp: Response| {
                *requested.lock() = Some(req.uri().to_string());
                Ok::<_, ErrorResponse>(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, capture)
                .await
                .unwrap();

            ws.send(Message::Text(
                r#"{"type":"message","message":"welcome"}"#.into(),
            ))
            .await
            .unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    received_tx.send(text.as_str().to_owned()).unwrap();
                    break;
                }
            }
            ws.close(None).await.unwrap();
        })
    };

    let socket = socket_for(addr);
    let mut lifecycle = lifecycle_feed(&socket);
    let mut messages = event_feed(&socket, EventKind::Message);

    socket.connect("room-1", "a+b/c", ChannelType::Group);
    let channel = ChannelIdentity::group("room-1");

    match next(&mut lifecycle).await {
        LifecycleEvent::Opened { channel: opened } => assert_eq!(opened, channel),
        other => panic!("expected open, got {other:?}"),
    }
    assert_eq!(socket.state(), ConnectionState::Open { channel: channel.clone() });
    assert_eq!(
        requested.lock().as_deref(),
        Some("/ws/chat/group/room-1/?token=a%2Bb%2Fc")
    );

    assert_eq!(
        next(&mut messages).await,
        json!({"type": "message", "message": "welcome"})
    );

    socket.send_message("hi");
    assert_eq!(next(&mut received).await, r#"{"type":"message","message":"hi"}"#);

    match next(&mut lifecycle).await {
        LifecycleEvent::Closed { channel: closed, reason } => {
            assert_eq!(closed, channel);
            assert_eq!(reason, CloseReason::Remote);
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(socket.state(), ConnectionState::Absent);

    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_reports_error_and_close() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let socket = socket_for(addr);
    let mut lifecycle = lifecycle_feed(&socket);
    let mut errors = event_feed(&socket, EventKind::Error);

    socket.connect("chat-1", "tok", ChannelType::Personal);

    let error = next(&mut errors).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"], "Connection error");

    match next(&mut lifecycle).await {
        LifecycleEvent::Closed { reason, .. } => assert_eq!(reason, CloseReason::Remote),
        other => panic!("expected close, got {other:?}"),
    }
    assert!(!socket.is_open());
}

#[tokio::test]
async fn local_disconnect_closes_server_side() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, mut closed) = unbounded_channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut saw_close = false;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                saw_close = true;
                break;
            }
        }
        closed_tx.send(saw_close).unwrap();
    });

    let socket = socket_for(addr);
    let mut lifecycle = lifecycle_feed(&socket);
    socket.connect("chat-1", "tok", ChannelType::Personal);
    assert!(matches!(next(&mut lifecycle).await, LifecycleEvent::Opened { .. }));

    socket.disconnect();
    match next(&mut lifecycle).await {
        LifecycleEvent::Closed { reason, .. } => assert_eq!(reason, CloseReason::Local),
        other => panic!("expected close, got {other:?}"),
    }
    assert!(next(&mut closed).await);

    server.await.unwrap();
}

#[derive(Debug, PartialEq)]
enum ServerSide {
    UpgradeFailed,
    DroppedWithoutClose,
    ClosedAfterUpgrade,
    Frame,
}

#[tokio::test]
async fn severing_during_handshake_never_upgrades() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (outcome_tx, mut outcome) = unbounded_channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Slow server: the client gives up before the upgrade is answered
        tokio::time::sleep(Duration::from_millis(300)).await;
        let seen = match tokio_tungstenite::accept_async(stream).await {
            Err(_) => ServerSide::UpgradeFailed,
            Ok(mut ws) => match ws.next().await {
                Some(Ok(msg)) if msg.is_close() => ServerSide::ClosedAfterUpgrade,
                Some(Ok(_)) => ServerSide::Frame,
                Some(Err(_)) | None => ServerSide::DroppedWithoutClose,
            },
        };
        outcome_tx.send(seen).unwrap();
    });

    let socket = socket_for(addr);
    let mut lifecycle = lifecycle_feed(&socket);
    socket.connect("chat-1", "tok", ChannelType::Personal);
    tokio::time::sleep(Duration::from_millis(50)).await;
    socket.disconnect();

    match next(&mut lifecycle).await {
        LifecycleEvent::Closed { reason, .. } => assert_eq!(reason, CloseReason::Local),
        other => panic!("expected close, got {other:?}"),
    }
    let seen = next(&mut outcome).await;
    assert!(
        matches!(seen, ServerSide::UpgradeFailed | ServerSide::DroppedWithoutClose),
        "server saw {seen:?}"
    );
    assert_eq!(socket.state(), ConnectionState::Absent);

    server.await.unwrap();
}
