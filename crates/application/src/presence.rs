//! 集群在线状态存储接口
//!
//! 每个在线用户对应两个带TTL的键：在线标记与所属节点地址，
//! 心跳时一起续期，正常下线时一起删除。读方必须容忍至多一个租期的陈旧。

use std::time::Duration;

use domain::{NodeAddress, UserId};

use crate::error::ApplicationError;

/// 在线状态存储trait
#[async_trait::async_trait]
pub trait PresenceStore: Send + Sync {
    /// 发布/覆盖在线记录：用户在线，所属节点为node，租期lease
    async fn mark_online(
        &self,
        user_id: UserId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<(), ApplicationError>;

    /// 续期在线记录（心跳时调用）。记录已因过期消失时应重新建立。
    async fn refresh(
        &self,
        user_id: UserId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<(), ApplicationError>;

    /// 删除在线记录（正常下线）。失败时租期过期兜底。
    async fn mark_offline(&self, user_id: UserId) -> Result<(), ApplicationError>;

    /// 全局在线检查
    async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError>;

    /// 查询用户连接所属的节点地址
    async fn owner_node(&self, user_id: UserId) -> Result<Option<NodeAddress>, ApplicationError>;
}

/// 内存实现的在线状态存储（用于测试）
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio::sync::RwLock;

    struct Record {
        node: NodeAddress,
        expires_at: Instant,
    }

    #[derive(Default)]
    pub struct MemoryPresenceStore {
        records: RwLock<HashMap<UserId, Record>>,
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn mark_online(
            &self,
            user_id: UserId,
            node: &NodeAddress,
            lease: Duration,
        ) -> Result<(), ApplicationError> {
            let mut records = self.records.write().await;
            records.insert(
                user_id,
                Record {
                    node: node.clone(),
                    expires_at: Instant::now() + lease,
                },
            );
            Ok(())
        }

        async fn refresh(
            &self,
            user_id: UserId,
            node: &NodeAddress,
            lease: Duration,
        ) -> Result<(), ApplicationError> {
            self.mark_online(user_id, node, lease).await
        }

        async fn mark_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
            let mut records = self.records.write().await;
            records.remove(&user_id);
            Ok(())
        }

        async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
            let records = self.records.read().await;
            Ok(records
                .get(&user_id)
                .map(|r| r.expires_at > Instant::now())
                .unwrap_or(false))
        }

        async fn owner_node(
            &self,
            user_id: UserId,
        ) -> Result<Option<NodeAddress>, ApplicationError> {
            let records = self.records.read().await;
            Ok(records
                .get(&user_id)
                .filter(|r| r.expires_at > Instant::now())
                .map(|r| r.node.clone()))
        }
    }
}
