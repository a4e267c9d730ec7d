//! Process wiring for the two binaries.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use crate::broker::{AmqpConnector, ConnectionSupervisor, Connector};
use crate::config::Config;
use crate::error::AppResult;
use crate::generator::RandomGenerator;
use crate::metrics::{self, ConsumerMetrics, PublisherMetrics};
use crate::services::{ConsumerService, ProducerService};
use crate::sink::{PostgresSink, Sink};

fn start_exporter(config: &Config) {
    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }
}

/// Run the consumer until shutdown or a fatal error.
///
/// Connects to the store first (blocking until it answers or shutdown is
/// requested), then consumes under the connection supervisor.
pub async fn run_consumer(config: Config, shutdown: CancellationToken) -> AppResult<()> {
    start_exporter(&config);

    info!(
        host = %config.postgres_host,
        port = config.postgres_port,
        db = %config.postgres_db,
        "Connecting to store"
    );
    let Some(sink) = PostgresSink::connect(&config, shutdown.clone()).await else {
        info!("Shutdown requested before the store answered, consumer stopped");
        return Ok(());
    };
    let sink: Arc<dyn Sink> = Arc::new(sink);

    let metrics = Arc::new(ConsumerMetrics::new(config.metrics_interval));
    let tracker = TaskTracker::new();
    metrics::spawn_emitter(Arc::clone(&metrics), &tracker, shutdown.clone());
    tracker.close();

    let service = ConsumerService::from_config(sink, metrics, &config);
    let connector: Arc<dyn Connector> = Arc::new(AmqpConnector::new(&config));
    let supervisor =
        ConnectionSupervisor::from_config(connector, &config).with_shutdown(shutdown.clone());

    let result = supervisor
        .run(|channel| service.run(channel, &shutdown))
        .await;

    shutdown.cancel();
    tracker.wait().await;
    info!("Consumer stopped");
    result
}

/// Run the producer until shutdown or a fatal error.
pub async fn run_producer(config: Config, shutdown: CancellationToken) -> AppResult<()> {
    start_exporter(&config);

    let metrics = Arc::new(PublisherMetrics::new(config.metrics_interval));
    let tracker = TaskTracker::new();
    metrics::spawn_emitter(Arc::clone(&metrics), &tracker, shutdown.clone());
    tracker.close();

    let service = ProducerService::from_config(
        Box::new(RandomGenerator::default()),
        metrics,
        &config,
    );
    let connector: Arc<dyn Connector> = Arc::new(AmqpConnector::new(&config));
    let supervisor =
        ConnectionSupervisor::from_config(connector, &config).with_shutdown(shutdown.clone());

    let result = supervisor
        .run(|channel| service.run(channel, &shutdown))
        .await;

    shutdown.cancel();
    tracker.wait().await;
    info!("Producer stopped");
    result
}
