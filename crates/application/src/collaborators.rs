//! 外部协作方接口
//!
//! 传输层视角下的普通服务调用：消息持久化、好友查询、凭证校验。
//! 具体实现在infrastructure crate，内存实现用于测试。

use domain::{GroupId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::error::ApplicationError;

/// 提交给持久化协作方的私聊消息记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub message_id: u64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub timestamp: Timestamp,
}

/// 提交给持久化协作方的群聊消息记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub message_id: u64,
    pub sender_id: UserId,
    pub group_id: GroupId,
    pub content: String,
    pub timestamp: Timestamp,
}

/// 消息持久化协作方。
/// 传输层对它是fire-and-forget：失败记日志，不重试。
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn persist_chat(&self, record: &ChatRecord) -> Result<(), ApplicationError>;

    async fn persist_group(&self, record: &GroupRecord) -> Result<(), ApplicationError>;

    /// 已读回执：reader已读来自peer的若干消息
    async fn mark_read(
        &self,
        reader: UserId,
        peer: UserId,
        message_ids: &[u64],
    ) -> Result<(), ApplicationError>;

    /// 消息撤回
    async fn mark_recalled(
        &self,
        user: UserId,
        peer: UserId,
        message_id: u64,
    ) -> Result<(), ApplicationError>;

    /// 客户端确认收到下行消息
    async fn confirm_delivered(&self, message_id: u64) -> Result<(), ApplicationError>;
}

/// 好友关系查询协作方
#[async_trait::async_trait]
pub trait FriendDirectory: Send + Sync {
    async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserId>, ApplicationError>;
}

/// 凭证校验协作方（凭证由外部签发）
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, ApplicationError>;
}

/// 内存实现（用于测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 记录每次调用的消息持久化桩
    #[derive(Default)]
    pub struct RecordingSink {
        pub chats: Mutex<Vec<ChatRecord>>,
        pub groups: Mutex<Vec<GroupRecord>>,
        pub read_receipts: Mutex<Vec<(UserId, UserId, Vec<u64>)>>,
        pub recalls: Mutex<Vec<(UserId, UserId, u64)>>,
        pub delivered: Mutex<Vec<u64>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn chat_count(&self) -> usize {
            self.chats.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl MessageSink for RecordingSink {
        async fn persist_chat(&self, record: &ChatRecord) -> Result<(), ApplicationError> {
            self.chats.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn persist_group(&self, record: &GroupRecord) -> Result<(), ApplicationError> {
            self.groups.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn mark_read(
            &self,
            reader: UserId,
            peer: UserId,
            message_ids: &[u64],
        ) -> Result<(), ApplicationError> {
            self.read_receipts
                .lock()
                .unwrap()
                .push((reader, peer, message_ids.to_vec()));
            Ok(())
        }

        async fn mark_recalled(
            &self,
            user: UserId,
            peer: UserId,
            message_id: u64,
        ) -> Result<(), ApplicationError> {
            self.recalls.lock().unwrap().push((user, peer, message_id));
            Ok(())
        }

        async fn confirm_delivered(&self, message_id: u64) -> Result<(), ApplicationError> {
            self.delivered.lock().unwrap().push(message_id);
            Ok(())
        }
    }

    /// 持久化总是失败的桩，用于验证best-effort降级
    pub struct FailingSink;

    #[async_trait::async_trait]
    impl MessageSink for FailingSink {
        async fn persist_chat(&self, _record: &ChatRecord) -> Result<(), ApplicationError> {
            Err(ApplicationError::infrastructure("sink unavailable"))
        }

        async fn persist_group(&self, _record: &GroupRecord) -> Result<(), ApplicationError> {
            Err(ApplicationError::infrastructure("sink unavailable"))
        }

        async fn mark_read(
            &self,
            _reader: UserId,
            _peer: UserId,
            _message_ids: &[u64],
        ) -> Result<(), ApplicationError> {
            Err(ApplicationError::infrastructure("sink unavailable"))
        }

        async fn mark_recalled(
            &self,
            _user: UserId,
            _peer: UserId,
            _message_id: u64,
        ) -> Result<(), ApplicationError> {
            Err(ApplicationError::infrastructure("sink unavailable"))
        }

        async fn confirm_delivered(&self, _message_id: u64) -> Result<(), ApplicationError> {
            Err(ApplicationError::infrastructure("sink unavailable"))
        }
    }

    /// 静态好友关系表
    #[derive(Default)]
    pub struct StaticFriendDirectory {
        friends: HashMap<UserId, Vec<UserId>>,
    }

    impl StaticFriendDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_friends(mut self, user: UserId, friends: Vec<UserId>) -> Self {
            self.friends.insert(user, friends);
            self
        }
    }

    #[async_trait::async_trait]
    impl FriendDirectory for StaticFriendDirectory {
        async fn friends_of(&self, user_id: UserId) -> Result<Vec<UserId>, ApplicationError> {
            Ok(self.friends.get(&user_id).cloned().unwrap_or_default())
        }
    }

    /// 静态token表：token字符串直接映射到用户
    #[derive(Default)]
    pub struct StaticTokenVerifier {
        tokens: HashMap<String, UserId>,
    }

    impl StaticTokenVerifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
            self.tokens.insert(token.into(), user);
            self
        }
    }

    #[async_trait::async_trait]
    impl TokenVerifier for StaticTokenVerifier {
        async fn verify(&self, token: &str) -> Result<UserId, ApplicationError> {
            self.tokens
                .get(token)
                .copied()
                .ok_or_else(|| ApplicationError::Authentication("invalid token".to_string()))
        }
    }
}
