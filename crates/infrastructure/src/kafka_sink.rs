//! Kafka消息落地
//!
//! 聊天消息与状态变更以事件形式写入Kafka，由下游消费方负责入库、
//! 离线收件箱与群扩散。使用会话相关方ID作为分区键，保证同一会话
//! 事件的有序性。

use application::{ApplicationError, ChatRecord, GroupRecord, MessageSink};
use async_trait::async_trait;
use config::KafkaConfig;
use domain::{GroupId, Timestamp, UserId};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// 写入Kafka的消息事件
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    ChatSent {
        message_id: u64,
        sender_id: UserId,
        receiver_id: UserId,
        content: String,
        timestamp: Timestamp,
    },
    GroupSent {
        message_id: u64,
        sender_id: UserId,
        group_id: GroupId,
        content: String,
        timestamp: Timestamp,
    },
    MessagesRead {
        reader_id: UserId,
        peer_id: UserId,
        message_ids: Vec<u64>,
    },
    MessageRecalled {
        user_id: UserId,
        peer_id: UserId,
        message_id: u64,
    },
    DeliveryConfirmed {
        message_id: u64,
    },
}

impl MessageEvent {
    /// 分区键：同一会话的事件落到同一分区
    fn partition_key(&self) -> String {
        match self {
            MessageEvent::ChatSent { receiver_id, .. } => receiver_id.to_string(),
            MessageEvent::GroupSent { group_id, .. } => group_id.to_string(),
            MessageEvent::MessagesRead { peer_id, .. } => peer_id.to_string(),
            MessageEvent::MessageRecalled { peer_id, .. } => peer_id.to_string(),
            MessageEvent::DeliveryConfirmed { message_id } => message_id.to_string(),
        }
    }
}

/// Kafka消息落地实现
pub struct KafkaMessageSink {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaMessageSink {
    pub fn new(config: &KafkaConfig) -> Result<Self, ApplicationError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("message.timeout.ms", config.send_timeout_ms.to_string())
            .set("acks", &config.acks)
            .set("compression.type", "snappy")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|err| {
                ApplicationError::infrastructure_with_source("创建Kafka生产者失败", err)
            })?;

        info!(brokers = %config.brokers.join(","), topic = %config.chat_events_topic, "Kafka生产者创建成功");

        Ok(Self {
            producer,
            topic: config.chat_events_topic.clone(),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        })
    }

    async fn send_event(&self, event: MessageEvent) -> Result<(), ApplicationError> {
        let payload = serde_json::to_string(&event)
            .map_err(|err| ApplicationError::infrastructure_with_source("序列化事件失败", err))?;
        let key = event.partition_key();

        let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);
        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(err, _)| {
                ApplicationError::infrastructure_with_source("Kafka事件发送失败", err)
            })?;
        Ok(())
    }

    /// 停机前刷新生产者缓冲区
    pub fn flush(&self) -> Result<(), ApplicationError> {
        self.producer
            .flush(Timeout::After(Duration::from_secs(10)))
            .map_err(|err| ApplicationError::infrastructure_with_source("刷新生产者缓冲区失败", err))
    }
}

#[async_trait]
impl MessageSink for KafkaMessageSink {
    async fn persist_chat(&self, record: &ChatRecord) -> Result<(), ApplicationError> {
        self.send_event(MessageEvent::ChatSent {
            message_id: record.message_id,
            sender_id: record.sender_id,
            receiver_id: record.receiver_id,
            content: record.content.clone(),
            timestamp: record.timestamp,
        })
        .await
    }

    async fn persist_group(&self, record: &GroupRecord) -> Result<(), ApplicationError> {
        self.send_event(MessageEvent::GroupSent {
            message_id: record.message_id,
            sender_id: record.sender_id,
            group_id: record.group_id,
            content: record.content.clone(),
            timestamp: record.timestamp,
        })
        .await
    }

    async fn mark_read(
        &self,
        reader: UserId,
        peer: UserId,
        message_ids: &[u64],
    ) -> Result<(), ApplicationError> {
        self.send_event(MessageEvent::MessagesRead {
            reader_id: reader,
            peer_id: peer,
            message_ids: message_ids.to_vec(),
        })
        .await
    }

    async fn mark_recalled(
        &self,
        user: UserId,
        peer: UserId,
        message_id: u64,
    ) -> Result<(), ApplicationError> {
        self.send_event(MessageEvent::MessageRecalled {
            user_id: user,
            peer_id: peer,
            message_id,
        })
        .await
    }

    async fn confirm_delivered(&self, message_id: u64) -> Result<(), ApplicationError> {
        self.send_event(MessageEvent::DeliveryConfirmed { message_id })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn chat_event_serializes_with_type_tag() {
        let event = MessageEvent::ChatSent {
            message_id: 42,
            sender_id: UserId::from(Uuid::new_v4()),
            receiver_id: UserId::from(Uuid::new_v4()),
            content: "hello".to_string(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"chat_sent\""));

        let back: MessageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.partition_key(), event.partition_key());
    }

    #[test]
    fn chat_events_partition_by_receiver() {
        let receiver_id = UserId::from(Uuid::new_v4());
        let event = MessageEvent::ChatSent {
            message_id: 1,
            sender_id: UserId::from(Uuid::new_v4()),
            receiver_id,
            content: "ordered".to_string(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.partition_key(), receiver_id.to_string());
    }

    #[tokio::test]
    async fn producer_creation_against_live_broker() {
        // 需要运行中的Kafka实例才能验证
        if std::env::var("KAFKA_INTEGRATION_TEST").is_err() {
            return;
        }
        let config = KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            chat_events_topic: "test-im-chat-events".to_string(),
            send_timeout_ms: 1000,
            acks: "1".to_string(),
        };
        assert!(KafkaMessageSink::new(&config).is_ok());
    }
}
