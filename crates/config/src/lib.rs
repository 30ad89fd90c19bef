//! 统一配置中心
//!
//! 提供IM网关的全局配置管理，包括：
//! - 监听地址（TCP/WebSocket）
//! - 连接空闲超时
//! - 协议帧限制
//! - 在线状态租约
//! - Redis/Kafka/好友服务等外部协作方

use serde::{Deserialize, Serialize};
use std::env;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 空闲超时配置
    pub timeouts: TimeoutConfig,
    /// 协议配置
    pub protocol: ProtocolConfig,
    /// 在线状态租约配置
    pub presence: PresenceConfig,
    /// Redis配置
    pub redis: RedisConfig,
    /// Kafka配置
    pub kafka: KafkaConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 好友服务配置
    pub friends: FriendServiceConfig,
    /// 投递配置
    pub delivery: DeliveryConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    /// 原生二进制协议监听端口
    pub tcp_port: u16,
    /// WebSocket监听端口
    pub ws_port: u16,
    /// 对集群公布的本节点地址（在线状态记录中的owning node）
    pub node_address: String,
}

/// 空闲超时配置（秒）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// 读空闲阈值：超过后进入等待心跳状态
    pub reader_idle_secs: u64,
    /// 写空闲阈值：超过后服务端主动发送心跳探测
    pub writer_idle_secs: u64,
    /// 综合空闲阈值：超过后强制关闭连接
    pub combined_idle_secs: u64,
    /// 外部协作方调用超时
    pub call_timeout_secs: u64,
}

/// 协议配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// 最大帧长度（字节）
    pub max_frame_bytes: usize,
}

/// 在线状态租约配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 在线状态过期时间（秒），心跳时续期
    pub lease_secs: u64,
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Kafka配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    /// 聊天消息事件主题
    pub chat_events_topic: String,
    pub send_timeout_ms: u64,
    pub acks: String,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

/// 好友服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendServiceConfig {
    /// 社交关系服务的基础URL
    pub base_url: String,
}

/// 投递配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// 在线但短暂不可写的接收方重试窗口容量（0表示关闭）
    pub retry_capacity: usize,
    /// 重试窗口内帧的存活时间（秒）
    pub retry_ttl_secs: u64,
    /// 在线状态变更扇出的并发度
    pub fanout_concurrency: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// 从环境变量加载配置
    /// 对于关键安全配置（REDIS_URL, JWT_SECRET），如果环境变量不存在将会 panic
    /// 这确保了生产环境中不会使用不安全的默认值
    pub fn from_env() -> Self {
        let mut config = Self::from_env_with_defaults();
        config.redis.url = env::var("REDIS_URL")
            .expect("REDIS_URL environment variable is required for production safety");
        config.jwt.secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET environment variable is required for production safety");
        config
    }

    /// 从环境变量加载配置，开发环境版本
    /// 提供不安全的默认值，仅用于测试和开发
    pub fn from_env_with_defaults() -> Self {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let tcp_port = env_parse("IM_TCP_PORT", 9100);
        Self {
            server: ServerConfig {
                node_address: env::var("NODE_ADDRESS")
                    .unwrap_or_else(|_| format!("{}:{}", host, tcp_port)),
                host,
                tcp_port,
                ws_port: env_parse("IM_WS_PORT", 8080),
            },
            timeouts: TimeoutConfig {
                reader_idle_secs: env_parse("READER_IDLE_SECS", 60),
                writer_idle_secs: env_parse("WRITER_IDLE_SECS", 30),
                combined_idle_secs: env_parse("COMBINED_IDLE_SECS", 90),
                call_timeout_secs: env_parse("CALL_TIMEOUT_SECS", 3),
            },
            protocol: ProtocolConfig {
                max_frame_bytes: env_parse("MAX_FRAME_BYTES", 10 * 1024 * 1024),
            },
            presence: PresenceConfig {
                lease_secs: env_parse("PRESENCE_LEASE_SECS", 300),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            kafka: KafkaConfig {
                brokers: env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "127.0.0.1:9092".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                chat_events_topic: env::var("KAFKA_CHAT_TOPIC")
                    .unwrap_or_else(|_| "im-chat-events".to_string()),
                send_timeout_ms: env_parse("KAFKA_SEND_TIMEOUT_MS", 3000),
                acks: env::var("KAFKA_ACKS").unwrap_or_else(|_| "all".to_string()),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                    "dev-secret-key-not-for-production-use-minimum-32-chars".to_string()
                }),
            },
            friends: FriendServiceConfig {
                base_url: env::var("FRIEND_SERVICE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8200".to_string()),
            },
            delivery: DeliveryConfig {
                retry_capacity: env_parse("DELIVERY_RETRY_CAPACITY", 32),
                retry_ttl_secs: env_parse("DELIVERY_RETRY_TTL_SECS", 10),
                fanout_concurrency: env_parse("FANOUT_CONCURRENCY", 16),
            },
        }
    }

    /// 验证配置有效性
    /// 增强的验证逻辑，特别关注生产环境安全
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.url.is_empty() {
            return Err(ConfigError::InvalidRedisUrl(
                "Redis URL cannot be empty".to_string(),
            ));
        }

        // 验证JWT密钥长度和安全性（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // 检查JWT密钥是否为明显的开发密钥
        if self.jwt.secret.contains("dev-secret")
            || self.jwt.secret.contains("not-for-production")
            || self.jwt.secret.contains("please-change")
        {
            return Err(ConfigError::InvalidJwtSecret(
                "Cannot use development JWT secret in production".to_string(),
            ));
        }

        if self.protocol.max_frame_bytes < 1024 {
            return Err(ConfigError::InvalidProtocolConfig(
                "Max frame size must be at least 1 KiB".to_string(),
            ));
        }

        // 空闲阈值必须递进：写空闲 < 读空闲 < 综合空闲
        if self.timeouts.combined_idle_secs <= self.timeouts.reader_idle_secs {
            return Err(ConfigError::InvalidTimeoutConfig(
                "Combined idle threshold must exceed reader idle threshold".to_string(),
            ));
        }
        if self.timeouts.call_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeoutConfig(
                "Collaborator call timeout must be greater than 0".to_string(),
            ));
        }

        if self.presence.lease_secs == 0 {
            return Err(ConfigError::InvalidPresenceConfig(
                "Presence lease must be greater than 0".to_string(),
            ));
        }

        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::InvalidKafkaConfig(
                "At least one Kafka broker is required".to_string(),
            ));
        }

        if self.server.node_address.is_empty() {
            return Err(ConfigError::InvalidServerConfig(
                "Node address cannot be empty".to_string(),
            ));
        }

        if self.delivery.fanout_concurrency == 0 {
            return Err(ConfigError::InvalidDeliveryConfig(
                "Fan-out concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid Redis URL: {0}")]
    InvalidRedisUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid protocol configuration: {0}")]
    InvalidProtocolConfig(String),
    #[error("Invalid timeout configuration: {0}")]
    InvalidTimeoutConfig(String),
    #[error("Invalid presence configuration: {0}")]
    InvalidPresenceConfig(String),
    #[error("Invalid Kafka configuration: {0}")]
    InvalidKafkaConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid delivery configuration: {0}")]
    InvalidDeliveryConfig(String),
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    /// 注意：生产环境应该明确调用 from_env() 而不是依赖默认值
    fn default() -> Self {
        Self::from_env_with_defaults()
    }
}
