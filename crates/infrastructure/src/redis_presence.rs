//! Redis在线状态存储
//!
//! 两个带租期的键描述一个用户的在线状态：
//! - `im:online:user:{id}`   在线标记
//! - `im:user:server:{id}`   持有该用户连接的节点地址
//!
//! 两个键总是成对写入和删除，租期由心跳续期。节点崩溃时键随租期
//! 过期，状态最多滞后一个租期，属于最终一致。

use std::time::Duration;

use application::{ApplicationError, PresenceStore};
use async_trait::async_trait;
use domain::{NodeAddress, UserId};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

const ONLINE_KEY_PREFIX: &str = "im:online:user:";
const SERVER_KEY_PREFIX: &str = "im:user:server:";

fn map_redis_err(err: redis::RedisError) -> ApplicationError {
    ApplicationError::infrastructure_with_source("Redis操作失败", err)
}

/// Redis在线状态存储实现
#[derive(Clone)]
pub struct RedisPresenceStore {
    manager: ConnectionManager,
}

impl RedisPresenceStore {
    /// 连接Redis并创建存储实例。连接管理器自带断线重连。
    pub async fn connect(url: &str) -> Result<Self, ApplicationError> {
        let client = redis::Client::open(url)
            .map_err(|err| ApplicationError::infrastructure_with_source("Redis URL无效", err))?;
        let manager = ConnectionManager::new(client).await.map_err(map_redis_err)?;
        info!("Redis在线状态存储连接成功");
        Ok(Self { manager })
    }

    fn online_key(user_id: UserId) -> String {
        format!("{}{}", ONLINE_KEY_PREFIX, user_id)
    }

    fn server_key(user_id: UserId) -> String {
        format!("{}{}", SERVER_KEY_PREFIX, user_id)
    }

    /// 成对写入两个键。SET EX是无条件覆盖，所以续期和重建是同一个操作。
    async fn write_pair(
        &self,
        user_id: UserId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<(), ApplicationError> {
        let mut conn = self.manager.clone();
        let lease_secs = lease.as_secs();
        redis::pipe()
            .atomic()
            .set_ex(Self::online_key(user_id), "1", lease_secs)
            .set_ex(Self::server_key(user_id), node.to_string(), lease_secs)
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_err)
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn mark_online(
        &self,
        user_id: UserId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<(), ApplicationError> {
        self.write_pair(user_id, node, lease).await
    }

    async fn refresh(
        &self,
        user_id: UserId,
        node: &NodeAddress,
        lease: Duration,
    ) -> Result<(), ApplicationError> {
        // 键已过期时重建，绑定期间的心跳足以自愈
        self.write_pair(user_id, node, lease).await
    }

    async fn mark_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let mut conn = self.manager.clone();
        redis::pipe()
            .atomic()
            .del(Self::online_key(user_id))
            .del(Self::server_key(user_id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_err)
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
        let mut conn = self.manager.clone();
        conn.exists(Self::online_key(user_id))
            .await
            .map_err(map_redis_err)
    }

    async fn owner_node(&self, user_id: UserId) -> Result<Option<NodeAddress>, ApplicationError> {
        let mut conn = self.manager.clone();
        let node: Option<String> = conn
            .get(Self::server_key(user_id))
            .await
            .map_err(map_redis_err)?;
        Ok(node.map(NodeAddress::from))
    }
}
