use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::BridgeError;
use crate::transport::InboundMessage;

/// rumqttc 请求队列长度
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// MQTT 订阅适配器
///
/// 连接（以及每次重连）成功后重新订阅主题，把收到的 Publish 转发到队列。
/// 连接错误不会终止循环：等待 `reconnect_delay` 后由 rumqttc 重连。
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    qos: QoS,
    reconnect_delay: Duration,
}

impl MqttTransport {
    pub fn new(config: &MqttConfig) -> Result<Self, BridgeError> {
        let qos = qos_from_u8(config.qos)?;
        let client_id = config.effective_client_id();

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);
        match (&config.username, &config.password) {
            (Some(username), password) => {
                options.set_credentials(username.clone(), password.clone().unwrap_or_default());
            }
            (None, Some(_)) => {
                warn!("[MQTT] mqtt.password is set without mqtt.username, ignoring credentials");
            }
            (None, None) => {}
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        info!(
            "[MQTT] Client {} configured for {}:{} (topic: {})",
            client_id, config.host, config.port, config.topic
        );

        Ok(Self {
            client,
            eventloop,
            topic: config.topic.clone(),
            qos,
            reconnect_delay: config.reconnect_delay(),
        })
    }

    /// 用于发布（心跳）的客户端句柄
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// 在后台运行事件循环
    pub fn spawn(
        self,
        sender: mpsc::Sender<InboundMessage>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(sender, shutdown))
    }

    async fn run(mut self, sender: mpsc::Sender<InboundMessage>, mut shutdown: watch::Receiver<bool>) {
        info!("[MQTT] Event loop started");

        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected to broker, subscribing to {}", self.topic);
                    // 在事件循环内部不能 await 请求队列
                    if let Err(e) = self.client.try_subscribe(self.topic.clone(), self.qos) {
                        error!("[MQTT] Failed to subscribe to {}: {}", self.topic, e);
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!("[MQTT] Subscription acknowledged: {:?}", ack.return_codes);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "[MQTT] Message on {} ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    );
                    let message = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    let delivered = tokio::select! {
                        _ = shutdown.changed() => break,
                        result = sender.send(message) => result.is_ok(),
                    };
                    if !delivered {
                        debug!("[MQTT] Inbound queue closed");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("[MQTT] Broker sent disconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "[MQTT] Connection error: {}, reconnecting in {:?}",
                        e, self.reconnect_delay
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("[MQTT] Disconnect request not sent: {}", e);
        }
        info!("[MQTT] Event loop stopped");
    }
}

pub fn qos_from_u8(qos: u8) -> Result<QoS, BridgeError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::Configuration(format!("invalid MQTT QoS: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_u8(3).is_err());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown_without_broker() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            reconnect_delay_secs: 30,
            ..MqttConfig::default()
        };
        let transport = MqttTransport::new(&config).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = transport.spawn(tx, shutdown_rx);
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("event loop did not stop")
            .unwrap();
        assert!(rx.recv().await.is_none());
    }
}
