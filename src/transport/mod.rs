// 传输层 - MQTT 订阅与心跳发布

use bytes::Bytes;

pub mod heartbeat;
pub mod mqtt;

pub use heartbeat::spawn_heartbeat;
pub use mqtt::MqttTransport;

/// 从 Broker 收到的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
