//! 基础设施层
//!
//! 应用层协作方trait的真实实现：Redis在线状态存储、Kafka消息落地、
//! 好友服务HTTP客户端、JWT令牌校验。

pub mod friend_client;
pub mod jwt;
pub mod kafka_sink;
pub mod redis_presence;

pub use friend_client::HttpFriendDirectory;
pub use jwt::JwtTokenVerifier;
pub use kafka_sink::KafkaMessageSink;
pub use redis_presence::RedisPresenceStore;
