//! TCP网关端到端测试：真实socket + 内存协作方

use std::sync::Arc;
use std::time::Duration;

use application::collaborators::memory::{RecordingSink, StaticFriendDirectory, StaticTokenVerifier};
use application::presence::memory::MemoryPresenceStore;
use application::{Dispatcher, DispatcherDependencies, IdleThresholds, RetryWindow, SessionRegistry, TokenVerifier};
use domain::{
    AuthPayload, ChatPayload, Frame, MessageType, NodeAddress, Status, UserId,
    DEFAULT_MAX_FRAME_BYTES,
};
use futures::{SinkExt, StreamExt};
use gateway::{FrameCodec, GatewayState};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use uuid::Uuid;

type Client = Framed<TcpStream, FrameCodec>;

struct TestGateway {
    addr: std::net::SocketAddr,
    sink: Arc<RecordingSink>,
}

async fn start_gateway(verifier: StaticTokenVerifier, thresholds: IdleThresholds) -> TestGateway {
    let sink = Arc::new(RecordingSink::new());
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(MemoryPresenceStore::new()),
        NodeAddress::new("127.0.0.1:0"),
        Duration::from_secs(300),
    ));
    let verifier: Arc<dyn TokenVerifier> = Arc::new(verifier);
    let dispatcher = Arc::new(Dispatcher::new(DispatcherDependencies {
        registry,
        sink: sink.clone(),
        friends: Arc::new(StaticFriendDirectory::new()),
        verifier: verifier.clone(),
        retry: RetryWindow::new(8, Duration::from_secs(10)),
        call_timeout: Duration::from_secs(3),
        fanout_concurrency: 4,
    }));
    let state = GatewayState {
        dispatcher,
        verifier,
        thresholds,
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(gateway::tcp::serve(listener, state));

    TestGateway { addr, sink }
}

fn relaxed_thresholds() -> IdleThresholds {
    IdleThresholds::new(
        Duration::from_secs(60),
        Duration::from_secs(30),
        Duration::from_secs(90),
    )
}

async fn connect(gateway: &TestGateway) -> Client {
    let stream = TcpStream::connect(gateway.addr).await.unwrap();
    Framed::new(stream, FrameCodec::new(DEFAULT_MAX_FRAME_BYTES))
}

async fn recv(client: &mut Client) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed")
        .expect("decode error")
}

async fn authenticate(client: &mut Client, token: &str) -> Frame {
    let payload = serde_json::to_vec(&AuthPayload {
        token: token.to_string(),
    })
    .unwrap();
    client
        .send(Frame::new(MessageType::AuthRequest, Status::Success, 1, payload))
        .await
        .unwrap();
    recv(client).await
}

#[tokio::test]
async fn auth_then_heartbeat_round_trip() {
    let alice = UserId::from(Uuid::new_v4());
    let gateway = start_gateway(
        StaticTokenVerifier::new().with_token("token-alice", alice),
        relaxed_thresholds(),
    )
    .await;

    let mut client = connect(&gateway).await;
    let response = authenticate(&mut client, "token-alice").await;
    assert_eq!(response.message_type, MessageType::AuthResponse);
    assert_eq!(response.status, Status::Success);

    client
        .send(Frame::new(
            MessageType::HeartbeatRequest,
            Status::Success,
            5,
            Vec::new(),
        ))
        .await
        .unwrap();
    let pong = recv(&mut client).await;
    assert_eq!(pong.message_type, MessageType::HeartbeatResponse);
    assert_eq!(pong.message_id, 5);
}

#[tokio::test]
async fn bad_token_gets_failure_but_keeps_connection() {
    let gateway = start_gateway(StaticTokenVerifier::new(), relaxed_thresholds()).await;

    let mut client = connect(&gateway).await;
    let response = authenticate(&mut client, "bogus").await;
    assert_eq!(response.message_type, MessageType::AuthResponse);
    assert_eq!(response.status, Status::Fail);

    // 连接还活着，心跳仍有响应
    client
        .send(Frame::new(
            MessageType::HeartbeatRequest,
            Status::Success,
            6,
            Vec::new(),
        ))
        .await
        .unwrap();
    let pong = recv(&mut client).await;
    assert_eq!(pong.message_type, MessageType::HeartbeatResponse);
}

#[tokio::test]
async fn chat_flows_between_two_connections() {
    let alice = UserId::from(Uuid::new_v4());
    let bob = UserId::from(Uuid::new_v4());
    let gateway = start_gateway(
        StaticTokenVerifier::new()
            .with_token("token-alice", alice)
            .with_token("token-bob", bob),
        relaxed_thresholds(),
    )
    .await;

    let mut alice_client = connect(&gateway).await;
    let mut bob_client = connect(&gateway).await;
    assert_eq!(
        authenticate(&mut alice_client, "token-alice").await.status,
        Status::Success
    );
    assert_eq!(
        authenticate(&mut bob_client, "token-bob").await.status,
        Status::Success
    );

    let payload = serde_json::to_vec(&ChatPayload {
        receiver_id: bob,
        content: "hello bob".to_string(),
        sender_id: None,
        timestamp: None,
    })
    .unwrap();
    alice_client
        .send(Frame::new(MessageType::ChatMessage, Status::Sending, 42, payload))
        .await
        .unwrap();

    let ack = recv(&mut alice_client).await;
    assert_eq!(ack.message_type, MessageType::ChatAck);
    assert_eq!(ack.status, Status::Delivered);
    assert_eq!(ack.message_id, 42);

    let delivered = recv(&mut bob_client).await;
    assert_eq!(delivered.message_type, MessageType::ChatMessage);
    assert_eq!(delivered.message_id, 42);
    let chat: ChatPayload = serde_json::from_slice(&delivered.payload).unwrap();
    assert_eq!(chat.sender_id, Some(alice));
    assert_eq!(chat.content, "hello bob");

    assert_eq!(gateway.sink.chat_count(), 1);
}

#[tokio::test]
async fn duplicate_login_closes_old_connection_with_notice() {
    let bob = UserId::from(Uuid::new_v4());
    let gateway = start_gateway(
        StaticTokenVerifier::new().with_token("token-bob", bob),
        relaxed_thresholds(),
    )
    .await;

    let mut first = connect(&gateway).await;
    assert_eq!(
        authenticate(&mut first, "token-bob").await.status,
        Status::Success
    );

    let mut second = connect(&gateway).await;
    assert_eq!(
        authenticate(&mut second, "token-bob").await.status,
        Status::Success
    );

    // 旧连接收到被顶替的通知帧，随后连接被关闭
    let notice = recv(&mut first).await;
    assert_eq!(notice.message_type, MessageType::SystemMessage);
    assert_eq!(notice.status, Status::Superseded);

    let eof = tokio::time::timeout(Duration::from_secs(5), first.next())
        .await
        .expect("timed out waiting for close");
    assert!(eof.is_none() || eof.unwrap().is_err());

    // 新连接不受影响
    second
        .send(Frame::new(
            MessageType::HeartbeatRequest,
            Status::Success,
            9,
            Vec::new(),
        ))
        .await
        .unwrap();
    assert_eq!(recv(&mut second).await.message_type, MessageType::HeartbeatResponse);
}

#[tokio::test]
async fn unknown_frame_type_is_dropped_and_connection_survives() {
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Encoder;

    let gateway = start_gateway(StaticTokenVerifier::new(), relaxed_thresholds()).await;
    let mut client = connect(&gateway).await;

    // 绕过编码器直接写入一个指令字节无法识别的帧
    let mut bad = BytesMut::new();
    FrameCodec::new(DEFAULT_MAX_FRAME_BYTES)
        .encode(
            Frame::new(MessageType::HeartbeatRequest, Status::Success, 7, Vec::new()),
            &mut bad,
        )
        .unwrap();
    bad[6] = 0xEE; // 指令字节
    client.get_mut().write_all(&bad).await.unwrap();

    // 坏帧被丢弃，连接存活，后续心跳仍有响应
    client
        .send(Frame::new(
            MessageType::HeartbeatRequest,
            Status::Success,
            8,
            Vec::new(),
        ))
        .await
        .unwrap();
    let pong = recv(&mut client).await;
    assert_eq!(pong.message_type, MessageType::HeartbeatResponse);
    assert_eq!(pong.message_id, 8);
}

#[tokio::test]
async fn garbage_bytes_terminate_the_connection() {
    use tokio::io::AsyncWriteExt;

    let gateway = start_gateway(StaticTokenVerifier::new(), relaxed_thresholds()).await;
    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    stream.write_all(&[0u8; 64]).await.unwrap();

    let mut client = Framed::new(stream, FrameCodec::new(DEFAULT_MAX_FRAME_BYTES));
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(_)) => continue,
                other => break other,
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    // 魔数错误是致命的：服务端下发关闭通知后断开
    assert!(outcome.is_none() || outcome.unwrap().is_err());
}

#[tokio::test]
async fn silent_connection_is_probed_then_closed() {
    let gateway = start_gateway(
        StaticTokenVerifier::new(),
        IdleThresholds::new(
            Duration::from_millis(100),
            Duration::from_millis(150),
            Duration::from_millis(300),
        ),
    )
    .await;

    let mut client = connect(&gateway).await;

    // 写空闲触发服务端探测
    let probe = recv(&mut client).await;
    assert_eq!(probe.message_type, MessageType::HeartbeatRequest);

    // 持续沉默最终被关闭
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(frame)) if frame.message_type == MessageType::HeartbeatRequest => continue,
                other => break other,
            }
        }
    })
    .await
    .expect("timed out waiting for idle close");
    match closed {
        Some(Ok(frame)) => {
            assert_eq!(frame.message_type, MessageType::SystemMessage);
            assert_eq!(frame.status, Status::Fail);
        }
        None => {}
        Some(Err(err)) => panic!("unexpected decode error: {err}"),
    }
}
