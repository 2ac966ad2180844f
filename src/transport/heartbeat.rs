use std::time::Duration;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 心跳消息
#[derive(Debug, Serialize)]
struct Heartbeat<'a> {
    status: &'a str,
    timestamp: DateTime<Utc>,
}

pub fn heartbeat_payload(now: DateTime<Utc>) -> Vec<u8> {
    serde_json::to_vec(&Heartbeat {
        status: "alive",
        timestamp: now,
    })
    .unwrap_or_default()
}

/// 按固定间隔向 `topic` 发布心跳，直到收到停止信号
pub fn spawn_heartbeat(
    client: AsyncClient,
    topic: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[HEARTBEAT] Publishing to {} every {:?}", topic, interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            let payload = heartbeat_payload(Utc::now());
            match client.try_publish(topic.clone(), QoS::AtMostOnce, false, payload) {
                Ok(()) => debug!("[HEARTBEAT] Published"),
                Err(e) => warn!("[HEARTBEAT] Failed to publish: {}", e),
            }
        }

        info!("[HEARTBEAT] Stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_heartbeat_payload() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&heartbeat_payload(now)).unwrap();
        assert_eq!(value["status"], "alive");
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");
    }
}
