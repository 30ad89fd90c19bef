//! 消息分发器
//!
//! 入站指令在边界处解码一次，这里按类型路由：
//! 心跳、认证、私聊/群聊投递、已读回执、撤回，以及绑定/解绑引发的
//! 在线状态变更扇出。所有外部协作方调用都有有界超时，
//! 超时降级为错误响应或日志，绝不卡死连接。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domain::{
    AuthResult, ChatPayload, Command, Frame, GroupPayload, MessageType, NodeAddress,
    PresenceChanged, ReadReceiptPayload, RecallPayload, Status, UserId,
};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::collaborators::{ChatRecord, FriendDirectory, GroupRecord, MessageSink, TokenVerifier};
use crate::connection::ConnectionHandle;
use crate::error::ApplicationError;
use crate::retry::RetryWindow;
use crate::session::SessionRegistry;

/// 一次私聊投递的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 接收方在本节点，帧已写入其连接
    Local,
    /// 接收方在其他节点，跨节点转发由外部承担，这里只暴露路由地址
    Remote(NodeAddress),
    /// 接收方不在线，离线收件箱由协作方负责
    Offline,
    /// 发送方未认证，消息被拒绝
    Rejected,
}

/// 分发器依赖
pub struct DispatcherDependencies {
    pub registry: Arc<SessionRegistry>,
    pub sink: Arc<dyn MessageSink>,
    pub friends: Arc<dyn FriendDirectory>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub retry: RetryWindow,
    /// 外部协作方调用超时
    pub call_timeout: Duration,
    /// 在线状态扇出并发度
    pub fanout_concurrency: usize,
}

pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn MessageSink>,
    friends: Arc<dyn FriendDirectory>,
    verifier: Arc<dyn TokenVerifier>,
    retry: RetryWindow,
    call_timeout: Duration,
    fanout_concurrency: usize,
}

impl Dispatcher {
    pub fn new(deps: DispatcherDependencies) -> Self {
        Self {
            registry: deps.registry,
            sink: deps.sink,
            friends: deps.friends,
            verifier: deps.verifier,
            retry: deps.retry,
            call_timeout: deps.call_timeout,
            fanout_concurrency: deps.fanout_concurrency.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 给协作方调用加上有界超时
    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, ApplicationError>>,
    ) -> Result<T, ApplicationError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| ApplicationError::Timeout(op))?
    }

    /// 处理一条入站指令。`identity`是该连接的认证槽位，认证成功后被填入。
    pub async fn handle(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: &mut Option<UserId>,
        command: Command,
    ) -> Result<(), ApplicationError> {
        match command {
            Command::Heartbeat { message_id } => {
                self.on_heartbeat(conn, *identity, message_id).await;
                Ok(())
            }
            Command::Auth {
                message_id,
                payload,
            } => {
                if let Some(user) = self.on_auth(conn, message_id, &payload.token).await? {
                    *identity = Some(user);
                }
                Ok(())
            }
            Command::ChatSend {
                message_id,
                payload,
            } => {
                self.on_chat(conn, *identity, message_id, payload).await?;
                Ok(())
            }
            Command::GroupSend {
                message_id,
                payload,
            } => {
                self.on_group(conn, *identity, message_id, payload).await;
                Ok(())
            }
            Command::ReadReceipt {
                message_id,
                payload,
            } => {
                self.on_read_receipt(*identity, message_id, payload).await;
                Ok(())
            }
            Command::Recall {
                message_id,
                payload,
            } => {
                self.on_recall(*identity, message_id, payload).await;
                Ok(())
            }
            Command::Ack { message_id } => {
                self.on_ack(*identity, message_id).await;
                Ok(())
            }
        }
    }

    /// 心跳：回PONG + 续期在线租约。不触碰持久化。
    async fn on_heartbeat(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: Option<UserId>,
        message_id: u64,
    ) {
        if conn.send(Frame::heartbeat_response(message_id)).is_err() {
            debug!(connection_id = %conn.id, "心跳响应写入失败，连接正在关闭");
            return;
        }
        if let Some(user_id) = identity {
            let refresh = self.registry.refresh(user_id);
            if let Err(err) = self.bounded("presence_refresh", refresh).await {
                // 续期失败不关闭连接，租期过期是最终一致的兜底
                warn!(user_id = %user_id, error = %err, "在线租约续期失败");
            }
        }
    }

    /// 带内认证（原生二进制通道）。失败时连接保持打开且未绑定，客户端可重试。
    /// 返回认证成功的用户。
    pub async fn on_auth(
        &self,
        conn: &Arc<ConnectionHandle>,
        message_id: u64,
        token: &str,
    ) -> Result<Option<UserId>, ApplicationError> {
        let verified = self.bounded("verify_token", self.verifier.verify(token)).await;
        match verified {
            Ok(user_id) => {
                self.bind_authenticated(user_id, conn).await?;
                let payload = serde_json::to_vec(&AuthResult::ok()).unwrap_or_default();
                let _ = conn.send(Frame::auth_response(message_id, Status::Success, payload));
                Ok(Some(user_id))
            }
            Err(err) => {
                info!(connection_id = %conn.id, error = %err, "认证失败");
                let payload =
                    serde_json::to_vec(&AuthResult::fail("认证失败")).unwrap_or_default();
                let _ = conn.send(Frame::auth_response(message_id, Status::Fail, payload));
                Ok(None)
            }
        }
    }

    /// 绑定已认证的连接（WebSocket握手认证后直接调用）。
    /// 冲刷重试窗口中停泊的帧，并向在线好友扇出上线事件。
    /// 同一连接换身份重认证时，被换下的旧身份扇出下线事件。
    pub async fn bind_authenticated(
        &self,
        user_id: UserId,
        conn: &Arc<ConnectionHandle>,
    ) -> Result<(), ApplicationError> {
        if let Some(prev) = self.registry.bind(user_id, conn.clone()).await? {
            self.announce_presence(prev, false).await;
        }

        for frame in self.retry.drain(user_id) {
            if conn.send(frame).is_err() {
                break;
            }
        }

        self.announce_presence(user_id, true).await;
        Ok(())
    }

    /// 连接关闭的唯一清理入口：解绑会话并向好友扇出下线事件。
    /// 解绑是幂等的，被顶替的旧连接迟到的清理不会产生第二次扇出。
    pub async fn connection_closed(&self, conn: &ConnectionHandle) {
        if let Some(user_id) = self.registry.unbind(conn).await {
            self.announce_presence(user_id, false).await;
        }
    }

    /// 私聊：先ACK发送方，fire-and-forget持久化，然后尝试直接投递。
    pub async fn on_chat(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: Option<UserId>,
        message_id: u64,
        payload: ChatPayload,
    ) -> Result<Delivery, ApplicationError> {
        let Some(sender_id) = identity else {
            warn!(connection_id = %conn.id, "未认证连接发送消息，拒绝处理");
            let _ = conn.send(Frame::chat_ack(message_id, Status::Fail));
            return Ok(Delivery::Rejected);
        };

        let receiver_id = payload.receiver_id;
        let timestamp = chrono::Utc::now();

        // 先ACK发送方，已送达传输层
        let _ = conn.send(Frame::chat_ack(message_id, Status::Delivered));

        // 持久化失败只记日志，不影响投递
        let record = ChatRecord {
            message_id,
            sender_id,
            receiver_id,
            content: payload.content.clone(),
            timestamp,
        };
        if let Err(err) = self.bounded("persist_chat", self.sink.persist_chat(&record)).await {
            warn!(message_id, error = %err, "消息持久化失败");
        }

        // 投递帧：发送方身份与时间戳由服务端填入
        let delivery_payload = ChatPayload {
            receiver_id,
            content: payload.content,
            sender_id: Some(sender_id),
            timestamp: Some(timestamp),
        };
        let frame = Frame::new(
            MessageType::ChatMessage,
            Status::Success,
            message_id,
            serde_json::to_vec(&delivery_payload).unwrap_or_default(),
        );

        if let Some(handle) = self.registry.local_handle(receiver_id).await {
            if let Err(refused) = handle.send(frame.clone()) {
                // 接收方连接正处于关闭竞态，停泊到重试窗口等待重新绑定
                debug!(receiver = %receiver_id, connection_id = %refused.connection_id, "接收方连接拒绝写入，帧进入重试窗口");
                self.retry.park(receiver_id, frame);
            }
            debug!(message_id, sender = %sender_id, receiver = %receiver_id, "私聊消息本地投递");
            return Ok(Delivery::Local);
        }

        match self.bounded("owner_node", self.registry.owner_node(receiver_id)).await {
            Ok(Some(node)) => {
                info!(message_id, receiver = %receiver_id, node = %node, "接收方在其他节点");
                Ok(Delivery::Remote(node))
            }
            Ok(None) => {
                debug!(message_id, receiver = %receiver_id, "接收方不在线，等待离线拉取");
                Ok(Delivery::Offline)
            }
            Err(err) => {
                warn!(receiver = %receiver_id, error = %err, "在线状态查询失败，按离线处理");
                Ok(Delivery::Offline)
            }
        }
    }

    /// 群聊：ACK + 持久化。群扩散由消息队列消费方承担。
    async fn on_group(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: Option<UserId>,
        message_id: u64,
        payload: GroupPayload,
    ) {
        let Some(sender_id) = identity else {
            warn!(connection_id = %conn.id, "未认证连接发送群消息，拒绝处理");
            let _ = conn.send(Frame::group_ack(message_id, Status::Fail));
            return;
        };

        let _ = conn.send(Frame::group_ack(message_id, Status::Delivered));

        let record = GroupRecord {
            message_id,
            sender_id,
            group_id: payload.group_id,
            content: payload.content,
            timestamp: chrono::Utc::now(),
        };
        if let Err(err) = self.bounded("persist_group", self.sink.persist_group(&record)).await {
            warn!(message_id, error = %err, "群消息持久化失败");
        }
    }

    /// 已读回执：异步更新已读状态，对端在线则转发回执。
    async fn on_read_receipt(
        &self,
        identity: Option<UserId>,
        message_id: u64,
        payload: ReadReceiptPayload,
    ) {
        let Some(reader_id) = identity else {
            return;
        };

        let mark = self
            .sink
            .mark_read(reader_id, payload.peer_id, &payload.message_ids);
        if let Err(err) = self.bounded("mark_read", mark).await {
            warn!(reader = %reader_id, error = %err, "已读状态更新失败");
        }

        if let Some(handle) = self.registry.local_handle(payload.peer_id).await {
            let forwarded = ReadReceiptPayload {
                peer_id: reader_id,
                message_ids: payload.message_ids,
            };
            let frame = Frame::new(
                MessageType::ReadReceipt,
                Status::Read,
                message_id,
                serde_json::to_vec(&forwarded).unwrap_or_default(),
            );
            let _ = handle.send(frame);
        }
    }

    /// 消息撤回：更新状态，对端在线则推送撤回事件。
    async fn on_recall(&self, identity: Option<UserId>, message_id: u64, payload: RecallPayload) {
        let Some(user_id) = identity else {
            return;
        };

        let mark = self
            .sink
            .mark_recalled(user_id, payload.peer_id, payload.message_id);
        if let Err(err) = self.bounded("mark_recalled", mark).await {
            warn!(user_id = %user_id, error = %err, "消息撤回状态更新失败");
        }

        if let Some(handle) = self.registry.local_handle(payload.peer_id).await {
            let forwarded = RecallPayload {
                peer_id: user_id,
                message_id: payload.message_id,
            };
            let frame = Frame::new(
                MessageType::Recall,
                Status::Recalled,
                message_id,
                serde_json::to_vec(&forwarded).unwrap_or_default(),
            );
            let _ = handle.send(frame);
        }
    }

    /// 客户端确认收到下行消息
    async fn on_ack(&self, identity: Option<UserId>, message_id: u64) {
        debug!(user_id = ?identity, message_id, "收到消息ACK");
        let confirm = self.sink.confirm_delivered(message_id);
        if let Err(err) = self.bounded("confirm_delivered", confirm).await {
            warn!(message_id, error = %err, "投递确认更新失败");
        }
    }

    /// 向用户的所有本地在线好友扇出在线状态变更。
    /// O(好友数)的广播，离线好友与无关用户不会收到。
    pub async fn announce_presence(&self, user_id: UserId, online: bool) {
        let friends = match self
            .bounded("friends_of", self.friends.friends_of(user_id))
            .await
        {
            Ok(friends) => friends,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "好友列表查询失败，跳过状态扇出");
                return;
            }
        };
        if friends.is_empty() {
            return;
        }

        let event = PresenceChanged { user_id, online };
        let frame = Frame::system_event(serde_json::to_vec(&event).unwrap_or_default());

        let notified = stream::iter(friends)
            .map(|friend_id| {
                let frame = frame.clone();
                async move {
                    match self.registry.local_handle(friend_id).await {
                        Some(handle) if !handle.is_closed() => handle.send(frame).is_ok(),
                        _ => false,
                    }
                }
            })
            .buffer_unordered(self.fanout_concurrency)
            .filter(|sent| std::future::ready(*sent))
            .count()
            .await;

        debug!(user_id = %user_id, online, notified, "在线状态变更已扇出");
    }
}
