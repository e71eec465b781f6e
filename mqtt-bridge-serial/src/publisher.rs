//! MQTT publisher.
//!
//! Consumes from the delivery queue and publishes each record as JSON to the
//! device's telemetry topic. Delivery is at-least-once: a record is retried
//! across reconnects until the broker acknowledges it, so duplicates are
//! possible but nothing still in the queue is silently lost.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use serelay_common::{Backoff, BrokerConfig, ConnectionState, TelemetryRecord};

use crate::error::BrokerError;
use crate::queue::DeliveryQueue;
use crate::stats::BridgeStats;

/// Telemetry topic for a device.
pub fn telemetry_topic(device_id: &str) -> String {
    format!("health/{}/telemetry", device_id)
}

/// Connection to the message bus.
///
/// Abstracted so the publisher's retry behavior can be exercised against a
/// scripted broker in tests.
#[async_trait]
pub trait BrokerLink: Send {
    /// Establish the connection, waiting for the broker's acknowledgment.
    async fn connect(&mut self) -> Result<(), BrokerError>;

    /// Publish one payload and wait for transport-level confirmation.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Drive the connection's background work while no publish is pending
    /// (keepalive pings, broker traffic). Resolves only when the connection
    /// fails; links with no background work never resolve.
    async fn maintain(&mut self) -> BrokerError {
        std::future::pending().await
    }

    /// Tear the connection down cleanly.
    async fn disconnect(&mut self);
}

/// MQTT broker link backed by rumqttc.
///
/// The client and its event loop are owned together; `publish` drives the
/// event loop until the matching QoS 1 acknowledgment arrives, so a
/// successful return means the broker has the message.
pub struct MqttLink {
    config: BrokerConfig,
    client_id: String,
    ack_timeout: Duration,
    conn: Option<(AsyncClient, EventLoop)>,
}

impl MqttLink {
    pub fn new(config: BrokerConfig, client_id: impl Into<String>) -> Self {
        let ack_timeout = Duration::from_secs(config.ack_timeout_secs);
        Self {
            config,
            client_id: client_id.into(),
            ack_timeout,
            conn: None,
        }
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn connect(&mut self) -> Result<(), BrokerError> {
        let mut options =
            MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keepalive_secs));

        let (client, mut eventloop) = AsyncClient::new(options, 16);

        let connack = timeout(self.ack_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(BrokerError::Disconnected(e.to_string())),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(())) => {
                self.conn = Some((client, eventloop));
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BrokerError::AckTimeout(self.ack_timeout)),
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let Some((client, eventloop)) = self.conn.as_mut() else {
            return Err(BrokerError::Disconnected("not connected".to_string()));
        };

        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BrokerError::Disconnected(e.to_string()))?;

        let puback = timeout(self.ack_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(BrokerError::Disconnected(e.to_string())),
                }
            }
        })
        .await;

        match puback {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.conn = None;
                Err(e)
            }
            Err(_) => {
                self.conn = None;
                Err(BrokerError::AckTimeout(self.ack_timeout))
            }
        }
    }

    async fn maintain(&mut self) -> BrokerError {
        let Some((_, eventloop)) = self.conn.as_mut() else {
            return std::future::pending().await;
        };
        // Keep the event loop turning so keepalive pings go out; a quiet
        // link otherwise gets dropped by the broker after ~1.5x keepalive.
        let err = loop {
            match eventloop.poll().await {
                Ok(_) => continue,
                Err(e) => break BrokerError::Disconnected(e.to_string()),
            }
        };
        self.conn = None;
        err
    }

    async fn disconnect(&mut self) {
        if let Some((client, _)) = self.conn.take() {
            let _ = client.disconnect().await;
        }
    }
}

/// Publisher task: queue → broker, with reconnect-and-backoff.
pub struct Publisher {
    queue: Arc<DeliveryQueue>,
    link: Box<dyn BrokerLink>,
    topic: String,
    backoff: Backoff,
    state: ConnectionState,
    stats: Arc<BridgeStats>,
    token: CancellationToken,
}

impl Publisher {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        link: Box<dyn BrokerLink>,
        topic: impl Into<String>,
        backoff: Backoff,
        stats: Arc<BridgeStats>,
        token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            link,
            topic: topic.into(),
            backoff,
            state: ConnectionState::Disconnected,
            stats,
            token,
        }
    }

    /// Run until the queue shuts down and drains, or cancellation interrupts
    /// a retry. Broker failures are absorbed here: the publisher reconnects
    /// with exponential backoff and re-attempts the same record.
    pub async fn run(mut self) -> crate::error::Result<()> {
        loop {
            let record = tokio::select! {
                record = self.queue.pop() => match record {
                    Some(record) => record,
                    None => break,
                },
                err = self.link.maintain(), if self.state == ConnectionState::Connected => {
                    tracing::warn!(error = %err, "broker connection lost while idle");
                    self.state = ConnectionState::Failed;
                    continue;
                }
            };
            if !self.deliver(record).await {
                tracing::info!("publisher cancelled while retrying");
                break;
            }
        }
        self.link.disconnect().await;
        self.state = ConnectionState::Disconnected;
        tracing::info!(published = self.stats.published(), "publisher stopped");
        Ok(())
    }

    /// Publish one record, retrying across reconnects.
    ///
    /// Returns `false` only when cancellation interrupted the retry loop.
    async fn deliver(&mut self, record: TelemetryRecord) -> bool {
        let payload = match record.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                // A record that came out of serde_json cannot fail to go
                // back in; log loudly if that assumption ever breaks.
                tracing::error!(error = %e, "unserializable record, dropping");
                return true;
            }
        };

        loop {
            if self.state != ConnectionState::Connected && !self.reconnect().await {
                return false;
            }

            match self.link.publish(&self.topic, payload.clone()).await {
                Ok(()) => {
                    self.stats.record_published();
                    self.backoff.reset();
                    return true;
                }
                Err(e) => {
                    self.state = ConnectionState::Failed;
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        topic = %self.topic,
                        delay_ms = delay.as_millis() as u64,
                        "publish failed, backing off before reconnect"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Reconnect with backoff until it succeeds or cancellation wins.
    async fn reconnect(&mut self) -> bool {
        loop {
            self.state = ConnectionState::Connecting;
            match self.link.connect().await {
                Ok(()) => {
                    self.state = ConnectionState::Connected;
                    tracing::info!(topic = %self.topic, "broker connected");
                    return true;
                }
                Err(e) => {
                    self.state = ConnectionState::Failed;
                    self.stats.record_reconnect();
                    let delay = self.backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "broker connect failed, backing off"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serelay_common::{OverflowPolicy, QueueConfig};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn record(n: i64) -> TelemetryRecord {
        let serde_json::Value::Object(fields) = json!({ "seq": n, "ts": "2024-05-01T12:00:00.000Z" })
        else {
            unreachable!()
        };
        TelemetryRecord::from_object(fields)
    }

    /// Scripted broker: each entry in `failures` makes the next call fail.
    #[derive(Default)]
    struct ScriptedLink {
        published: Arc<Mutex<Vec<Vec<u8>>>>,
        connect_failures: Arc<Mutex<VecDeque<()>>>,
        publish_failures: Arc<Mutex<VecDeque<()>>>,
        idle_failures: Arc<Mutex<VecDeque<()>>>,
        connects: Arc<Mutex<u64>>,
    }

    #[async_trait]
    impl BrokerLink for ScriptedLink {
        async fn connect(&mut self) -> Result<(), BrokerError> {
            *self.connects.lock().unwrap() += 1;
            if self.connect_failures.lock().unwrap().pop_front().is_some() {
                return Err(BrokerError::Disconnected("scripted".to_string()));
            }
            Ok(())
        }

        async fn publish(&mut self, _topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
            if self.publish_failures.lock().unwrap().pop_front().is_some() {
                return Err(BrokerError::Disconnected("scripted".to_string()));
            }
            self.published.lock().unwrap().push(payload);
            Ok(())
        }

        async fn maintain(&mut self) -> BrokerError {
            if self.idle_failures.lock().unwrap().pop_front().is_some() {
                return BrokerError::Disconnected("scripted idle drop".to_string());
            }
            std::future::pending().await
        }

        async fn disconnect(&mut self) {}
    }

    async fn queue_with(records: &[i64]) -> (Arc<DeliveryQueue>, Arc<BridgeStats>) {
        let stats = Arc::new(BridgeStats::default());
        let config = QueueConfig {
            capacity: 64,
            overflow: OverflowPolicy::DropOldest,
        };
        let queue = DeliveryQueue::new(&config, stats.clone());
        for &n in records {
            queue.push(record(n)).await;
        }
        (queue, stats)
    }

    fn fast_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(4), 0.0)
    }

    fn seqs(published: &Arc<Mutex<Vec<Vec<u8>>>>) -> Vec<i64> {
        published
            .lock()
            .unwrap()
            .iter()
            .map(|payload| {
                let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
                value["seq"].as_i64().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_telemetry_topic() {
        assert_eq!(telemetry_topic("esp32-01"), "health/esp32-01/telemetry");
    }

    #[tokio::test]
    async fn test_publishes_queue_in_fifo_order() {
        let (queue, stats) = queue_with(&[1, 2, 3]).await;
        queue.shutdown();

        let link = ScriptedLink::default();
        let published = link.published.clone();

        let publisher = Publisher::new(
            queue,
            Box::new(link),
            "health/dev/telemetry",
            fast_backoff(),
            stats.clone(),
            CancellationToken::new(),
        );
        publisher.run().await.unwrap();

        assert_eq!(seqs(&published), vec![1, 2, 3]);
        assert_eq!(stats.published(), 3);
    }

    #[tokio::test]
    async fn test_retries_same_record_across_disconnects() {
        let (queue, stats) = queue_with(&[1, 2]).await;
        queue.shutdown();

        let link = ScriptedLink::default();
        // First two publish attempts fail; every reconnect succeeds
        link.publish_failures.lock().unwrap().extend([(), ()]);
        let published = link.published.clone();
        let connects = link.connects.clone();

        let publisher = Publisher::new(
            queue,
            Box::new(link),
            "health/dev/telemetry",
            fast_backoff(),
            stats.clone(),
            CancellationToken::new(),
        );
        publisher.run().await.unwrap();

        // Both records delivered, in order, despite the failures
        assert_eq!(seqs(&published), vec![1, 2]);
        assert!(*connects.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_reconnect_backoff_counts_attempts() {
        let (queue, stats) = queue_with(&[1]).await;
        queue.shutdown();

        let link = ScriptedLink::default();
        link.connect_failures.lock().unwrap().extend([(), (), ()]);
        let published = link.published.clone();

        let publisher = Publisher::new(
            queue,
            Box::new(link),
            "health/dev/telemetry",
            fast_backoff(),
            stats.clone(),
            CancellationToken::new(),
        );
        publisher.run().await.unwrap();

        assert_eq!(seqs(&published), vec![1]);
        assert_eq!(stats.reconnects(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_endless_publish_retries() {
        let (queue, stats) = queue_with(&[1]).await;
        queue.shutdown();

        let link = ScriptedLink::default();
        // Connects always succeed but every publish attempt fails
        link.publish_failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n((), 10_000));

        let token = CancellationToken::new();
        let publisher = Publisher::new(
            queue,
            Box::new(link),
            "health/dev/telemetry",
            fast_backoff(),
            stats,
            token.clone(),
        );

        let task = tokio::spawn(publisher.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = timeout(Duration::from_millis(200), task).await;
        assert!(result.expect("publisher did not stop promptly").unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_idle_connection_loss_triggers_reconnect() {
        let (queue, stats) = queue_with(&[1]).await;

        let link = ScriptedLink::default();
        // The connection drops once while the publisher is idle
        link.idle_failures.lock().unwrap().push_back(());
        let idle_failures = link.idle_failures.clone();
        let published = link.published.clone();
        let connects = link.connects.clone();

        let publisher = Publisher::new(
            queue.clone(),
            Box::new(link),
            "health/dev/telemetry",
            fast_backoff(),
            stats,
            CancellationToken::new(),
        );
        let task = tokio::spawn(publisher.run());

        // First record goes out over the initial connection, then the
        // scripted idle drop is consumed while the publisher waits
        timeout(Duration::from_millis(500), async {
            while published.lock().unwrap().is_empty()
                || !idle_failures.lock().unwrap().is_empty()
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("idle drop never observed");

        // The connection is gone; the next record must reconnect
        queue.push(record(2)).await;
        queue.shutdown();
        task.await.unwrap().unwrap();

        assert_eq!(seqs(&published), vec![1, 2]);
        assert_eq!(*connects.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_endless_reconnect() {
        let (queue, stats) = queue_with(&[1]).await;
        queue.shutdown();

        let link = ScriptedLink::default();
        // Fail every connect attempt forever
        link.connect_failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n((), 10_000));

        let token = CancellationToken::new();
        let publisher = Publisher::new(
            queue,
            Box::new(link),
            "health/dev/telemetry",
            Backoff::new(Duration::from_secs(60), Duration::from_secs(60), 0.0),
            stats,
            token.clone(),
        );

        let task = tokio::spawn(publisher.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = timeout(Duration::from_millis(200), task).await;
        assert!(result.expect("publisher did not stop promptly").unwrap().is_ok());
    }
}
