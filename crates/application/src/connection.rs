//! 连接句柄
//!
//! 每个传输层连接在accept时创建一个句柄，出站帧与生命周期事件
//! 都通过句柄内的单一通道送达连接的写任务，保证关闭副作用只发生一次。

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use domain::{CloseNotice, ConnectionId, Frame, Status};
use thiserror::Error;
use tokio::sync::mpsc;

/// 连接的传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// 原生二进制协议
    Tcp,
    /// 文本帧回退通道
    WebSocket,
}

/// 连接关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 同一用户的新登录顶替了本连接
    Superseded,
    /// 心跳超时
    IdleTimeout,
    /// 协议违规（魔数错误、超长帧等）
    ProtocolViolation,
    /// 客户端正常断开
    ClientClosed,
    /// 服务端停机
    ServerShutdown,
}

impl CloseReason {
    /// 关闭通知帧携带的状态字节
    pub fn status(self) -> Status {
        match self {
            CloseReason::Superseded => Status::Superseded,
            _ => Status::Fail,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Superseded => "superseded",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::ProtocolViolation => "protocol_violation",
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ServerShutdown => "server_shutdown",
        }
    }

    /// 需要在关闭socket前下发通知帧的原因（客户端主动断开时对端已不在了）
    pub fn notifies_peer(self) -> bool {
        !matches!(self, CloseReason::ClientClosed)
    }
}

/// 出站事件：普通帧或关闭通知
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Frame),
    Close(CloseReason),
}

/// 向一个正在关闭或已关闭的连接写入失败
#[derive(Debug, Error)]
#[error("connection {connection_id} refused the write")]
pub struct SendRefused {
    pub connection_id: ConnectionId,
}

/// 传输层连接句柄。
/// 由accept方创建并独占所有权语义：同一时刻至多绑定一个用户身份。
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub kind: TransportKind,
    sender: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
    /// 最近一次入站活动（unix毫秒），仅用于诊断
    last_activity_ms: AtomicI64,
}

impl ConnectionHandle {
    /// 创建句柄与配套的出站接收端（由连接的写任务持有）
    pub fn new(kind: TransportKind) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            id: ConnectionId::generate(),
            kind,
            sender,
            closed: AtomicBool::new(false),
            last_activity_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        });
        (handle, receiver)
    }

    /// 向连接写一帧。连接已进入关闭流程时返回错误而不是阻塞或panic。
    pub fn send(&self, frame: Frame) -> Result<(), SendRefused> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendRefused {
                connection_id: self.id,
            });
        }
        self.sender
            .send(Outbound::Frame(frame))
            .map_err(|_| SendRefused {
                connection_id: self.id,
            })
    }

    /// 发起关闭。返回true表示本次调用赢得了关闭权（副作用只执行一次）。
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // 写任务可能已经退出，此时通道发送失败是正常的
        let _ = self.sender.send(Outbound::Close(reason));
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 记录一次入站活动
    pub fn touch(&self) {
        self.last_activity_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }
}

impl Outbound {
    /// 关闭通知帧：status标明原因，payload为JSON化的原因说明
    pub fn close_frame(reason: CloseReason) -> Frame {
        let payload = serde_json::to_vec(&CloseNotice {
            reason: reason.as_str().to_string(),
        })
        .unwrap_or_default();
        Frame::close_notice(reason.status(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MessageType;

    #[tokio::test]
    async fn send_after_close_is_refused() {
        let (handle, mut rx) = ConnectionHandle::new(TransportKind::Tcp);
        handle.send(Frame::heartbeat_response(1)).unwrap();
        assert!(handle.close(CloseReason::IdleTimeout));
        assert!(handle.send(Frame::heartbeat_response(2)).is_err());

        match rx.recv().await.unwrap() {
            Outbound::Frame(frame) => {
                assert_eq!(frame.message_type, MessageType::HeartbeatResponse)
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            Outbound::Close(CloseReason::IdleTimeout)
        ));
    }

    #[tokio::test]
    async fn close_is_exactly_once() {
        let (handle, mut rx) = ConnectionHandle::new(TransportKind::WebSocket);
        assert!(handle.close(CloseReason::Superseded));
        assert!(!handle.close(CloseReason::IdleTimeout));

        assert!(matches!(
            rx.recv().await.unwrap(),
            Outbound::Close(CloseReason::Superseded)
        ));
        // 第二次close没有产生第二个事件
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn superseded_close_frame_carries_dedicated_status() {
        let frame = Outbound::close_frame(CloseReason::Superseded);
        assert_eq!(frame.status, Status::Superseded);
        let notice: CloseNotice = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(notice.reason, "superseded");
    }
}
