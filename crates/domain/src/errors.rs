//! 协议层错误定义
//!
//! 区分致命的协议违规（导致连接关闭）与可容忍的载荷问题。

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 魔数不匹配，对端不是本协议的客户端，连接必须立即关闭
    #[error("无效的魔数: {found:#010x}")]
    InvalidMagic { found: u32 },

    /// 声明的载荷长度超过上限，连接必须立即关闭
    #[error("帧长度超限: declared={declared}, max={max}")]
    FrameTooLarge { declared: usize, max: usize },

    /// 未知消息类型字节
    #[error("未知消息类型: {0}")]
    UnknownMessageType(u8),

    /// 未知状态字节
    #[error("未知消息状态: {0}")]
    UnknownStatus(u8),

    /// 未知序列化类型字节
    #[error("未知序列化类型: {0}")]
    UnknownSerializer(u8),

    /// 载荷无法按声明的序列化类型解析
    #[error("载荷解析失败: type={message_type}, {source}")]
    BadPayload {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// 收到了只应由服务端发出的消息类型
    #[error("客户端不应发送该消息类型: {0}")]
    UnexpectedDirection(&'static str),
}

impl ProtocolError {
    /// 是否属于致命违规（关闭连接，不回应）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMagic { .. } | ProtocolError::FrameTooLarge { .. }
        )
    }
}
