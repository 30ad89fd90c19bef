//! 会话注册表
//!
//! 管理用户身份与连接句柄的双向映射：
//! 1. 本地内存：identity ↔ connection
//! 2. 集群：通过在线状态存储公布 identity → node，带租期
//!
//! 不变式：同一节点上每个用户至多一个活跃连接；为同一用户绑定第二个连接
//! 必须先关闭并解绑旧连接（单活跃会话策略，旧端收到superseded状态）。
//! 映射只允许通过bind/unbind变更。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domain::{ConnectionId, NodeAddress, UserId};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::connection::{CloseReason, ConnectionHandle};
use crate::error::ApplicationError;
use crate::presence::PresenceStore;

#[derive(Default)]
struct Tables {
    by_user: HashMap<UserId, Arc<ConnectionHandle>>,
    by_conn: HashMap<ConnectionId, UserId>,
}

/// 会话注册表。克隆成本低的共享所有权由调用方用Arc包裹。
pub struct SessionRegistry {
    tables: RwLock<Tables>,
    presence: Arc<dyn PresenceStore>,
    node: NodeAddress,
    lease: Duration,
}

impl SessionRegistry {
    pub fn new(presence: Arc<dyn PresenceStore>, node: NodeAddress, lease: Duration) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            presence,
            node,
            lease,
        }
    }

    pub fn node_address(&self) -> &NodeAddress {
        &self.node
    }

    /// 绑定用户与连接。
    /// 已有旧连接时旧连接在同一个临界区内被移出映射，锁外收到superseded关闭；
    /// 换绑期间`is_online_local`始终为true，不会瞬时离线。
    /// 同一连接重发认证不是换绑，不会把自己顶替掉；同一连接换身份重认证时
    /// 先解绑旧身份，返回被换下的用户供调用方扇出下线事件。
    pub async fn bind(
        &self,
        user_id: UserId,
        handle: Arc<ConnectionHandle>,
    ) -> Result<Option<UserId>, ApplicationError> {
        let connection_id = handle.id;
        let (superseded, replaced) = {
            let mut tables = self.tables.write().await;

            // 该连接此前绑定的是别的身份：摘掉旧身份的正向映射，防止悬挂绑定
            let replaced = match tables.by_conn.get(&connection_id) {
                Some(prev) if *prev != user_id => {
                    let prev = *prev;
                    if tables.by_user.get(&prev).map(|h| h.id) == Some(connection_id) {
                        tables.by_user.remove(&prev);
                    }
                    Some(prev)
                }
                _ => None,
            };

            let old = tables.by_user.insert(user_id, handle.clone());
            if let Some(old) = &old {
                tables.by_conn.remove(&old.id);
            }
            tables.by_conn.insert(connection_id, user_id);
            (old.filter(|old| old.id != connection_id), replaced)
        };

        if let Some(prev) = replaced {
            info!(user_id = %prev, connection_id = %connection_id, "连接换身份重认证，旧身份已解绑");
            // 尽力删除旧身份的在线记录，失败时租期过期兜底
            if let Err(err) = self.presence.mark_offline(prev).await {
                warn!(user_id = %prev, error = %err, "删除在线状态失败，等待租期过期");
            }
        }

        if let Some(old) = superseded {
            info!(user_id = %user_id, old_connection = %old.id, "用户的旧连接将被顶替关闭");
            old.close(CloseReason::Superseded);
        }

        // 公布集群在线记录；失败不回滚本地绑定，心跳续期自愈
        if let Err(err) = self
            .presence
            .mark_online(user_id, &self.node, self.lease)
            .await
        {
            warn!(user_id = %user_id, error = %err, "发布在线状态失败，等待心跳自愈");
        }

        info!(user_id = %user_id, connection_id = %connection_id, "用户绑定成功");
        Ok(replaced)
    }

    /// 解绑连接。只有当该连接仍是其用户的当前连接时才移除正向映射，
    /// 被顶替的旧连接迟到的解绑是no-op。返回被解绑的用户。
    pub async fn unbind(&self, handle: &ConnectionHandle) -> Option<UserId> {
        let user_id = {
            let mut tables = self.tables.write().await;
            let user_id = tables.by_conn.remove(&handle.id)?;
            match tables.by_user.get(&user_id) {
                Some(current) if current.id == handle.id => {
                    tables.by_user.remove(&user_id);
                }
                _ => return None,
            }
            user_id
        };

        // 尽力删除在线记录，失败时租期过期兜底
        if let Err(err) = self.presence.mark_offline(user_id).await {
            warn!(user_id = %user_id, error = %err, "删除在线状态失败，等待租期过期");
        }

        info!(user_id = %user_id, connection_id = %handle.id, "用户解绑成功");
        Some(user_id)
    }

    /// 获取用户的本地连接句柄
    pub async fn local_handle(&self, user_id: UserId) -> Option<Arc<ConnectionHandle>> {
        let tables = self.tables.read().await;
        tables.by_user.get(&user_id).cloned()
    }

    /// 本地在线检查：存在未进入关闭流程的连接
    pub async fn is_online_local(&self, user_id: UserId) -> bool {
        let tables = self.tables.read().await;
        tables
            .by_user
            .get(&user_id)
            .map(|h| !h.is_closed())
            .unwrap_or(false)
    }

    /// 全局在线检查：本地连接或集群在线记录。
    /// 在线记录最多陈旧一个租期，调用方必须容忍。
    pub async fn is_online_global(&self, user_id: UserId) -> Result<bool, ApplicationError> {
        if self.is_online_local(user_id).await {
            return Ok(true);
        }
        self.presence.is_online(user_id).await
    }

    /// 查询用户连接所属节点（跨节点路由用）
    pub async fn owner_node(
        &self,
        user_id: UserId,
    ) -> Result<Option<NodeAddress>, ApplicationError> {
        self.presence.owner_node(user_id).await
    }

    /// 续期在线记录（每次心跳调用）
    pub async fn refresh(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.presence.refresh(user_id, &self.node, self.lease).await
    }

    /// 本地在线连接数
    pub async fn local_count(&self) -> usize {
        let tables = self.tables.read().await;
        tables.by_user.len()
    }
}
