//! MQTT bridge for line-oriented serial telemetry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

use mqtt_bridge_serial::args::BridgeArgs;
use mqtt_bridge_serial::config::BridgeConfig;
use mqtt_bridge_serial::normalizer::run_normalizer;
use mqtt_bridge_serial::publisher::{BrokerLink, MqttLink, Publisher, telemetry_topic};
use mqtt_bridge_serial::queue::DeliveryQueue;
use mqtt_bridge_serial::reader::{self, FrameReader, run_reader};
use mqtt_bridge_serial::stats::BridgeStats;
use mqtt_bridge_serial::supervisor::Supervisor;
use serelay_common::{Backoff, Clock, SystemClock, init_tracing};

const FRAME_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments and assemble the configuration
    let args = BridgeArgs::parse();
    let config = BridgeConfig::from_args(&args)?;

    init_tracing(&config.logging).map_err(|e| anyhow::anyhow!("{}", e))?;

    let topic = telemetry_topic(&config.device_id);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        serial = %config.serial.port,
        baud = config.serial.baud,
        broker = format!("{}:{}", config.broker.host, config.broker.port),
        topic = %topic,
        "starting bridge"
    );

    // The serial port must open at launch; failure here is fatal
    let stream = reader::open_serial(&config.serial)?;

    // The broker must be reachable at launch; afterwards the publisher
    // absorbs disconnects with its own reconnect/backoff
    let mut probe = MqttLink::new(
        config.broker.clone(),
        format!("mqtt-bridge-serial-{}-probe", config.device_id),
    );
    probe
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("startup failure: broker unreachable: {}", e))?;
    probe.disconnect().await;

    let stats = Arc::new(BridgeStats::default());
    let queue = DeliveryQueue::new(&config.queue, stats.clone());
    let mut supervisor = Supervisor::new(
        queue.clone(),
        stats.clone(),
        config.retry,
        Duration::from_secs(config.shutdown_timeout_secs),
    );
    let token = supervisor.token();

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    // Reader: the first instance reuses the port opened above; restarts
    // after a link loss reopen it
    let serial_config = config.serial.clone();
    let read_timeout = Duration::from_secs(config.serial.read_timeout_secs);
    let reader_stats = stats.clone();
    let reader_token = token.clone();
    let mut first_stream = Some(stream);
    supervisor.supervise("reader", move || {
        let serial_config = serial_config.clone();
        let frame_tx = frame_tx.clone();
        let stats = reader_stats.clone();
        let token = reader_token.clone();
        let stream = first_stream.take();
        async move {
            let stream = match stream {
                Some(stream) => stream,
                None => reader::open_serial(&serial_config)?,
            };
            run_reader(FrameReader::new(stream, read_timeout), frame_tx, stats, token).await
        }
    });

    // Normalizer: ends on its own when the pipeline shuts down
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    supervisor.spawn(
        "normalizer",
        run_normalizer(frame_rx, queue.clone(), clock, stats.clone(), token.clone()),
    );

    // Publisher: reconnects internally; supervised in case it ever exits
    // with an error
    let broker_config = config.broker.clone();
    let client_id = format!("mqtt-bridge-serial-{}", config.device_id);
    let retry = config.retry;
    let publisher_queue = queue.clone();
    let publisher_stats = stats.clone();
    let publisher_token = token.clone();
    supervisor.supervise("publisher", move || {
        let link = MqttLink::new(broker_config.clone(), client_id.clone());
        Publisher::new(
            publisher_queue.clone(),
            Box::new(link),
            topic.clone(),
            Backoff::from_config(&retry),
            publisher_stats.clone(),
            publisher_token.clone(),
        )
        .run()
    });

    supervisor.run().await?;
    Ok(())
}
