//! IM网关入口
//!
//! 组装基础设施（Redis在线状态、Kafka落地、好友服务、JWT校验），
//! 然后同时启动TCP与WebSocket两个传输入口。

use std::sync::Arc;
use std::time::Duration;

use application::{
    Dispatcher, DispatcherDependencies, IdleThresholds, RetryWindow, SessionRegistry,
    TokenVerifier,
};
use config::AppConfig;
use domain::NodeAddress;
use gateway::GatewayState;
use infrastructure::{HttpFriendDirectory, JwtTokenVerifier, KafkaMessageSink, RedisPresenceStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env();
    config.validate()?;

    // 外部协作方
    let presence = RedisPresenceStore::connect(&config.redis.url).await?;
    let sink = Arc::new(KafkaMessageSink::new(&config.kafka)?);
    let friends = Arc::new(HttpFriendDirectory::new(config.friends.base_url.clone()));
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtTokenVerifier::new(&config.jwt.secret));

    // 会话注册表与分发器
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(presence),
        NodeAddress::new(config.server.node_address.clone()),
        Duration::from_secs(config.presence.lease_secs),
    ));
    let dispatcher = Arc::new(Dispatcher::new(DispatcherDependencies {
        registry,
        sink,
        friends,
        verifier: verifier.clone(),
        retry: RetryWindow::new(
            config.delivery.retry_capacity,
            Duration::from_secs(config.delivery.retry_ttl_secs),
        ),
        call_timeout: Duration::from_secs(config.timeouts.call_timeout_secs),
        fanout_concurrency: config.delivery.fanout_concurrency,
    }));

    let state = GatewayState {
        dispatcher,
        verifier,
        thresholds: IdleThresholds::from(&config.timeouts),
        max_frame_bytes: config.protocol.max_frame_bytes,
    };

    // 两个传输入口
    let tcp_listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.tcp_port))
            .await?;
    let ws_listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.ws_port)).await?;

    tracing::info!(
        tcp = %tcp_listener.local_addr()?,
        ws = %ws_listener.local_addr()?,
        node = %config.server.node_address,
        "IM网关启动"
    );

    let tcp_state = state.clone();
    let tcp_task = tokio::spawn(async move { gateway::tcp::serve(tcp_listener, tcp_state).await });
    let ws_router = gateway::router(state);
    let ws_task = tokio::spawn(async move { axum::serve(ws_listener, ws_router).await });

    tokio::select! {
        result = tcp_task => result??,
        result = ws_task => result??,
    }

    Ok(())
}
