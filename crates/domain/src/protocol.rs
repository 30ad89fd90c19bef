//! 自定义二进制消息协议
//!
//! 协议格式（所有多字节字段均为大端序）：
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! | 魔数(4) | 版本(1) | 序列化(1)| 指令(1) | 状态(1) | 消息ID(8) | 长度(4) | 数据(N) |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! 头部总长度：4 + 1 + 1 + 1 + 1 + 8 + 4 = 20 bytes

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// 魔数：用于快速识别协议（"JELY"）
pub const MAGIC_NUMBER: u32 = 0x4A45_4C59;

/// 协议版本
pub const VERSION: u8 = 1;

/// 头部长度
pub const HEADER_LEN: usize = 20;

/// 长度字段偏移量：魔数(4) + 版本(1) + 序列化(1) + 指令(1) + 状态(1) + 消息ID(8) = 16
pub const LENGTH_FIELD_OFFSET: usize = 16;

/// 默认最大帧长度：10MB
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// 消息类型（指令字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// 心跳请求 (PING)
    HeartbeatRequest = 0,
    /// 心跳响应 (PONG)
    HeartbeatResponse = 1,
    /// 认证请求
    AuthRequest = 2,
    /// 认证响应
    AuthResponse = 3,
    /// 私聊消息
    ChatMessage = 4,
    /// 私聊消息 ACK
    ChatAck = 5,
    /// 群聊消息
    GroupMessage = 6,
    /// 群聊消息 ACK
    GroupAck = 7,
    /// 系统消息（在线状态变更、被顶号通知等）
    SystemMessage = 8,
    /// 离线消息推送
    OfflineMessage = 9,
    /// 已读回执
    ReadReceipt = 10,
    /// 消息撤回
    Recall = 11,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::HeartbeatRequest),
            1 => Ok(Self::HeartbeatResponse),
            2 => Ok(Self::AuthRequest),
            3 => Ok(Self::AuthResponse),
            4 => Ok(Self::ChatMessage),
            5 => Ok(Self::ChatAck),
            6 => Ok(Self::GroupMessage),
            7 => Ok(Self::GroupAck),
            8 => Ok(Self::SystemMessage),
            9 => Ok(Self::OfflineMessage),
            10 => Ok(Self::ReadReceipt),
            11 => Ok(Self::Recall),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// 消息状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    Success = 0,
    Fail = 1,
    Sending = 2,
    Delivered = 3,
    Read = 4,
    Recalled = 5,
    /// 被新登录顶替，客户端据此区分"被踢下线"与网络故障
    Superseded = 6,
}

impl Status {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Success),
            1 => Ok(Self::Fail),
            2 => Ok(Self::Sending),
            3 => Ok(Self::Delivered),
            4 => Ok(Self::Read),
            5 => Ok(Self::Recalled),
            6 => Ok(Self::Superseded),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

/// 序列化类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SerializerTag {
    Json = 0,
    Protobuf = 1,
}

impl SerializerTag {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SerializerTag {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Json),
            1 => Ok(Self::Protobuf),
            other => Err(ProtocolError::UnknownSerializer(other)),
        }
    }
}

/// 一个完整的协议帧。解码后不可变，消费一次即丢弃。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub serializer: SerializerTag,
    pub message_type: MessageType,
    pub status: Status,
    /// 用于请求/响应关联与客户端去重
    pub message_id: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(
        message_type: MessageType,
        status: Status,
        message_id: u64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            serializer: SerializerTag::Json,
            message_type,
            status,
            message_id,
            payload,
        }
    }

    /// 编码后的总字节数
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// 心跳响应（PONG），回显请求的消息ID
    pub fn heartbeat_response(message_id: u64) -> Self {
        Self::new(MessageType::HeartbeatResponse, Status::Success, message_id, Vec::new())
    }

    /// 服务端主动发出的心跳探测（写空闲时）
    pub fn heartbeat_probe() -> Self {
        Self::new(MessageType::HeartbeatRequest, Status::Success, 0, Vec::new())
    }

    /// 认证响应
    pub fn auth_response(message_id: u64, status: Status, payload: Vec<u8>) -> Self {
        Self::new(MessageType::AuthResponse, status, message_id, payload)
    }

    /// 私聊消息ACK
    pub fn chat_ack(message_id: u64, status: Status) -> Self {
        Self::new(MessageType::ChatAck, status, message_id, Vec::new())
    }

    /// 群聊消息ACK
    pub fn group_ack(message_id: u64, status: Status) -> Self {
        Self::new(MessageType::GroupAck, status, message_id, Vec::new())
    }

    /// 系统消息（在线状态变更等广播事件）
    pub fn system_event(payload: Vec<u8>) -> Self {
        Self::new(MessageType::SystemMessage, Status::Success, 0, payload)
    }

    /// 连接即将被关闭的通知帧，status标明关闭原因
    pub fn close_notice(status: Status, payload: Vec<u8>) -> Self {
        Self::new(MessageType::SystemMessage, status, 0, payload)
    }
}
