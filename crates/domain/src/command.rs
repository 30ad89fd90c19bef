//! 入站指令模型
//!
//! 帧在边界处只解码一次，得到带类型的指令枚举，
//! 管线深处不再做任何运行时类型判断。

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::{Frame, MessageType};
use crate::value_objects::{GroupId, Timestamp, UserId};

/// 认证请求载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    /// 外部签发的凭证
    pub token: String,
}

/// 认证响应载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub code: i32,
    pub message: String,
}

impl AuthResult {
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: "认证成功".to_string(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: 1,
            message: message.into(),
        }
    }
}

/// 私聊消息载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub receiver_id: UserId,
    pub content: String,
    /// 发送方身份由服务端根据会话绑定填入，客户端提交的值被忽略
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// 群聊消息载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPayload {
    pub group_id: GroupId,
    pub content: String,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// 已读回执载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    /// 对端用户（回执要通知的消息发送方）
    pub peer_id: UserId,
    /// 已读的消息ID列表
    pub message_ids: Vec<u64>,
}

/// 消息撤回载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallPayload {
    pub peer_id: UserId,
    pub message_id: u64,
}

/// 在线状态变更事件载荷（服务端扇出给好友）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceChanged {
    pub user_id: UserId,
    pub online: bool,
}

/// 连接关闭通知载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseNotice {
    pub reason: String,
}

/// 解码后的入站指令，每个变体对应一种客户端消息类型
#[derive(Debug, Clone)]
pub enum Command {
    Heartbeat {
        message_id: u64,
    },
    Auth {
        message_id: u64,
        payload: AuthPayload,
    },
    ChatSend {
        message_id: u64,
        payload: ChatPayload,
    },
    GroupSend {
        message_id: u64,
        payload: GroupPayload,
    },
    ReadReceipt {
        message_id: u64,
        payload: ReadReceiptPayload,
    },
    Recall {
        message_id: u64,
        payload: RecallPayload,
    },
    /// 客户端确认收到了某条下行消息
    Ack {
        message_id: u64,
    },
}

fn parse_payload<T: for<'de> Deserialize<'de>>(
    message_type: &'static str,
    payload: &[u8],
) -> Result<T, ProtocolError> {
    serde_json::from_slice(payload).map_err(|source| ProtocolError::BadPayload {
        message_type,
        source,
    })
}

impl Command {
    /// 从一个完整帧解码指令。
    /// 只接受客户端方向的消息类型；服务端方向的类型属于协议误用。
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let message_id = frame.message_id;
        match frame.message_type {
            MessageType::HeartbeatRequest => Ok(Command::Heartbeat { message_id }),
            MessageType::AuthRequest => Ok(Command::Auth {
                message_id,
                payload: parse_payload("auth", &frame.payload)?,
            }),
            MessageType::ChatMessage => Ok(Command::ChatSend {
                message_id,
                payload: parse_payload("chat", &frame.payload)?,
            }),
            MessageType::GroupMessage => Ok(Command::GroupSend {
                message_id,
                payload: parse_payload("group", &frame.payload)?,
            }),
            MessageType::ReadReceipt => Ok(Command::ReadReceipt {
                message_id,
                payload: parse_payload("read_receipt", &frame.payload)?,
            }),
            MessageType::Recall => Ok(Command::Recall {
                message_id,
                payload: parse_payload("recall", &frame.payload)?,
            }),
            MessageType::ChatAck => Ok(Command::Ack { message_id }),
            MessageType::HeartbeatResponse => Err(ProtocolError::UnexpectedDirection("pong")),
            MessageType::AuthResponse => Err(ProtocolError::UnexpectedDirection("auth_response")),
            MessageType::GroupAck => Ok(Command::Ack { message_id }),
            MessageType::SystemMessage => Err(ProtocolError::UnexpectedDirection("system")),
            MessageType::OfflineMessage => Err(ProtocolError::UnexpectedDirection("offline")),
        }
    }

    pub fn message_id(&self) -> u64 {
        match self {
            Command::Heartbeat { message_id }
            | Command::Auth { message_id, .. }
            | Command::ChatSend { message_id, .. }
            | Command::GroupSend { message_id, .. }
            | Command::ReadReceipt { message_id, .. }
            | Command::Recall { message_id, .. }
            | Command::Ack { message_id } => *message_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Status;
    use uuid::Uuid;

    #[test]
    fn heartbeat_frame_decodes_without_payload() {
        let frame = Frame::new(MessageType::HeartbeatRequest, Status::Success, 99, Vec::new());
        let command = Command::from_frame(&frame).unwrap();
        assert!(matches!(command, Command::Heartbeat { message_id: 99 }));
    }

    #[test]
    fn chat_frame_decodes_payload() {
        let receiver = UserId::from(Uuid::new_v4());
        let payload = serde_json::to_vec(&ChatPayload {
            receiver_id: receiver,
            content: "你好".to_string(),
            sender_id: None,
            timestamp: None,
        })
        .unwrap();
        let frame = Frame::new(MessageType::ChatMessage, Status::Sending, 1, payload);

        match Command::from_frame(&frame).unwrap() {
            Command::ChatSend { message_id, payload } => {
                assert_eq!(message_id, 1);
                assert_eq!(payload.receiver_id, receiver);
                assert_eq!(payload.content, "你好");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn malformed_chat_payload_is_rejected() {
        let frame = Frame::new(MessageType::ChatMessage, Status::Sending, 1, b"not json".to_vec());
        let err = Command::from_frame(&frame).unwrap_err();
        assert!(matches!(err, ProtocolError::BadPayload { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn server_direction_frames_are_rejected() {
        let frame = Frame::new(MessageType::AuthResponse, Status::Success, 1, Vec::new());
        assert!(matches!(
            Command::from_frame(&frame),
            Err(ProtocolError::UnexpectedDirection(_))
        ));
    }
}
