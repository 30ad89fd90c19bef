//! WebSocket网关端到端测试：真实HTTP升级 + 内存协作方

use std::sync::Arc;
use std::time::Duration;

use application::collaborators::memory::{RecordingSink, StaticFriendDirectory, StaticTokenVerifier};
use application::presence::memory::MemoryPresenceStore;
use application::{
    Dispatcher, DispatcherDependencies, IdleThresholds, RetryWindow, SessionRegistry, TokenVerifier,
};
use domain::{MessageType, NodeAddress, Status, UserId, DEFAULT_MAX_FRAME_BYTES};
use futures::{SinkExt, StreamExt};
use gateway::{GatewayState, WsEnvelope};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestGateway {
    addr: std::net::SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

async fn start_gateway(verifier: StaticTokenVerifier) -> TestGateway {
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(MemoryPresenceStore::new()),
        NodeAddress::new("127.0.0.1:0"),
        Duration::from_secs(300),
    ));
    let verifier: Arc<dyn TokenVerifier> = Arc::new(verifier);
    let dispatcher = Arc::new(Dispatcher::new(DispatcherDependencies {
        registry,
        sink: Arc::new(RecordingSink::new()),
        friends: Arc::new(StaticFriendDirectory::new()),
        verifier: verifier.clone(),
        retry: RetryWindow::new(8, Duration::from_secs(10)),
        call_timeout: Duration::from_secs(3),
        fanout_concurrency: 4,
    }));
    let state = GatewayState {
        dispatcher: dispatcher.clone(),
        verifier,
        thresholds: IdleThresholds::new(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Duration::from_secs(90),
        ),
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, gateway::router(state)).await.unwrap();
    });

    TestGateway { addr, dispatcher }
}

async fn connect(gateway: &TestGateway, token: &str) -> WsClient {
    let url = format!("ws://{}/ws?token={}", gateway.addr, token);
    let (client, _) = connect_async(url).await.expect("upgrade failed");
    client
}

async fn recv_envelope(client: &mut WsClient) -> WsEnvelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("websocket error");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn send_envelope(client: &mut WsClient, envelope: &WsEnvelope) {
    let json = serde_json::to_string(envelope).unwrap();
    client.send(Message::Text(json.into())).await.unwrap();
}

#[tokio::test]
async fn handshake_auth_binds_session() {
    let alice = UserId::from(Uuid::new_v4());
    let gateway = start_gateway(StaticTokenVerifier::new().with_token("token-alice", alice)).await;

    let mut client = connect(&gateway, "token-alice").await;

    // 握手即绑定，无需带内认证
    send_envelope(
        &mut client,
        &WsEnvelope {
            message_type: MessageType::HeartbeatRequest.as_byte(),
            status: Status::Success.as_byte(),
            message_id: 3,
            payload: serde_json::Value::Null,
        },
    )
    .await;
    let pong = recv_envelope(&mut client).await;
    assert_eq!(pong.message_type, MessageType::HeartbeatResponse.as_byte());
    assert_eq!(pong.message_id, 3);

    assert!(gateway.dispatcher.registry().is_online_local(alice).await);
}

#[tokio::test]
async fn invalid_token_is_rejected_at_handshake() {
    let gateway = start_gateway(StaticTokenVerifier::new()).await;
    let url = format!("ws://{}/ws?token=bogus", gateway.addr);
    assert!(connect_async(url).await.is_err());
}

#[tokio::test]
async fn chat_flows_between_websocket_clients() {
    let alice = UserId::from(Uuid::new_v4());
    let bob = UserId::from(Uuid::new_v4());
    let gateway = start_gateway(
        StaticTokenVerifier::new()
            .with_token("token-alice", alice)
            .with_token("token-bob", bob),
    )
    .await;

    let mut alice_client = connect(&gateway, "token-alice").await;
    let mut bob_client = connect(&gateway, "token-bob").await;

    send_envelope(
        &mut alice_client,
        &WsEnvelope {
            message_type: MessageType::ChatMessage.as_byte(),
            status: Status::Sending.as_byte(),
            message_id: 21,
            payload: serde_json::json!({
                "receiver_id": bob,
                "content": "hi from ws",
            }),
        },
    )
    .await;

    let ack = recv_envelope(&mut alice_client).await;
    assert_eq!(ack.message_type, MessageType::ChatAck.as_byte());
    assert_eq!(ack.status, Status::Delivered.as_byte());
    assert_eq!(ack.message_id, 21);

    let delivered = recv_envelope(&mut bob_client).await;
    assert_eq!(delivered.message_type, MessageType::ChatMessage.as_byte());
    assert_eq!(delivered.message_id, 21);
    assert_eq!(delivered.payload["content"], "hi from ws");
    assert_eq!(
        delivered.payload["sender_id"],
        serde_json::json!(alice)
    );
}

#[tokio::test]
async fn duplicate_login_supersedes_websocket_session() {
    let bob = UserId::from(Uuid::new_v4());
    let gateway = start_gateway(StaticTokenVerifier::new().with_token("token-bob", bob)).await;

    let mut first = connect(&gateway, "token-bob").await;
    let _second = connect(&gateway, "token-bob").await;

    let notice = recv_envelope(&mut first).await;
    assert_eq!(notice.message_type, MessageType::SystemMessage.as_byte());
    assert_eq!(notice.status, Status::Superseded.as_byte());
}
