//! WebSocket传输入口
//!
//! 浏览器客户端走这里：握手时用query参数中的令牌完成认证，
//! 升级成功即绑定会话。消息语义与二进制通道完全一致，只是帧
//! 以JSON文本信封承载。

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use futures_util::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use application::{
    CloseReason, ConnectionHandle, IdleAction, IdleSupervisor, Outbound, TransportKind,
};
use domain::{Command, Frame, MessageType, ProtocolError, Status, UserId};

use crate::state::GatewayState;

/// JSON文本信封。字段与二进制头部一一对应，payload直接内嵌JSON。
#[derive(Debug, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub message_type: u8,
    #[serde(default)]
    pub status: u8,
    #[serde(default)]
    pub message_id: u64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WsEnvelope {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            message_type: frame.message_type.as_byte(),
            status: frame.status.as_byte(),
            message_id: frame.message_id,
            payload: serde_json::from_slice(&frame.payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn into_frame(self) -> Result<Frame, ProtocolError> {
        let payload = match &self.payload {
            serde_json::Value::Null => Vec::new(),
            value => serde_json::to_vec(value).unwrap_or_default(),
        };
        Ok(Frame::new(
            MessageType::try_from(self.message_type)?,
            Status::try_from(self.status)?,
            self.message_id,
            payload,
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// 访问令牌
    pub token: String,
}

/// 网关HTTP路由
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 握手认证失败直接拒绝升级，不产生会话
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, StatusCode> {
    if query.token.is_empty() {
        warn!("WebSocket升级被拒绝：令牌为空");
        return Err(StatusCode::UNAUTHORIZED);
    }
    let user_id = state
        .verifier
        .verify(&query.token)
        .await
        .map_err(|err| {
            warn!(error = %err, "WebSocket升级被拒绝：令牌无效");
            StatusCode::UNAUTHORIZED
        })?;

    info!(user_id = %user_id, "WebSocket升级通过认证");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: GatewayState) {
    let (sender, mut messages) = socket.split();
    let (handle, outbound) = ConnectionHandle::new(TransportKind::WebSocket);
    debug!(connection_id = %handle.id, user_id = %user_id, "WebSocket连接建立");

    // 握手已认证，直接绑定会话
    if let Err(err) = state.dispatcher.bind_authenticated(user_id, &handle).await {
        warn!(user_id = %user_id, error = %err, "会话绑定失败");
        return;
    }

    tokio::spawn(write_loop(sender, outbound));

    let mut supervisor = IdleSupervisor::new(state.thresholds, Instant::now());
    let mut identity = Some(user_id);

    loop {
        let deadline = tokio::time::Instant::from_std(supervisor.next_deadline());
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                let now = Instant::now();
                match supervisor.poll(now) {
                    IdleAction::Wait => {}
                    IdleAction::AwaitHeartbeat => {
                        debug!(connection_id = %handle.id, "读空闲，等待客户端心跳");
                    }
                    IdleAction::SendProbe => {
                        if handle.send(Frame::heartbeat_probe()).is_ok() {
                            supervisor.on_write(now);
                        }
                    }
                    IdleAction::Close => {
                        info!(connection_id = %handle.id, user_id = %user_id, "心跳超时，关闭连接");
                        handle.close(CloseReason::IdleTimeout);
                        break;
                    }
                }
            }
            incoming = messages.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    supervisor.on_read(Instant::now());
                    handle.touch();
                    dispatch_text(&state, &handle, &mut identity, text.as_str()).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // 协议层ping/pong也算活动
                    supervisor.on_read(Instant::now());
                    handle.touch();
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(connection_id = %handle.id, "该通道不支持二进制帧，丢弃");
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(connection_id = %handle.id, "对端关闭连接");
                    handle.close(CloseReason::ClientClosed);
                    break;
                }
                Some(Err(err)) => {
                    debug!(connection_id = %handle.id, error = %err, "WebSocket读取失败");
                    handle.close(CloseReason::ClientClosed);
                    break;
                }
            }
        }

        if handle.is_closed() {
            break;
        }
    }

    state.dispatcher.connection_closed(&handle).await;
    debug!(connection_id = %handle.id, user_id = %user_id, "WebSocket连接结束");
}

async fn dispatch_text(
    state: &GatewayState,
    handle: &Arc<ConnectionHandle>,
    identity: &mut Option<UserId>,
    text: &str,
) {
    let envelope: WsEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(connection_id = %handle.id, error = %err, "信封解析失败，丢弃");
            return;
        }
    };
    let frame = match envelope.into_frame() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(connection_id = %handle.id, error = %err, "丢弃无法识别的帧");
            return;
        }
    };
    match Command::from_frame(&frame) {
        Ok(command) => {
            if let Err(err) = state.dispatcher.handle(handle, identity, command).await {
                warn!(connection_id = %handle.id, error = %err, "指令处理失败");
            }
        }
        Err(err) => {
            warn!(connection_id = %handle.id, error = %err, "丢弃无法识别的帧");
        }
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(event) = outbound.recv().await {
        match event {
            Outbound::Frame(frame) => {
                let Ok(json) = serde_json::to_string(&WsEnvelope::from_frame(&frame)) else {
                    continue;
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close(reason) => {
                if reason.notifies_peer() {
                    let notice = WsEnvelope::from_frame(&Outbound::close_frame(reason));
                    if let Ok(json) = serde_json::to_string(&notice) {
                        let _ = sender.send(Message::Text(json.into())).await;
                    }
                }
                break;
            }
        }
    }
    let _ = sender.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_mirrors_frame_header() {
        let frame = Frame::chat_ack(42, Status::Delivered);
        let envelope = WsEnvelope::from_frame(&frame);
        assert_eq!(envelope.message_type, MessageType::ChatAck.as_byte());
        assert_eq!(envelope.status, Status::Delivered.as_byte());
        assert_eq!(envelope.message_id, 42);
        assert_eq!(envelope.payload, serde_json::Value::Null);
    }

    #[test]
    fn envelope_round_trips_payload() {
        let payload = serde_json::json!({"content": "hi"});
        let frame = Frame::new(
            MessageType::ChatMessage,
            Status::Sending,
            7,
            serde_json::to_vec(&payload).unwrap(),
        );
        let envelope = WsEnvelope::from_frame(&frame);
        assert_eq!(envelope.payload, payload);

        let back = envelope.into_frame().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&back.payload).unwrap();
        assert_eq!(value, payload);
    }

    #[test]
    fn envelope_defaults_optional_fields() {
        let envelope: WsEnvelope = serde_json::from_str(r#"{"type":0}"#).unwrap();
        let frame = envelope.into_frame().unwrap();
        assert_eq!(frame.message_type, MessageType::HeartbeatRequest);
        assert_eq!(frame.status, Status::Success);
        assert_eq!(frame.message_id, 0);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let envelope: WsEnvelope = serde_json::from_str(r#"{"type":99}"#).unwrap();
        assert!(envelope.into_frame().is_err());
    }
}
