use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broker::BrokerChannel;
use crate::codec;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::generator::Generator;
use crate::metrics::PublisherMetrics;
use crate::models::Reading;

/// Publishes readings to the topic exchange.
///
/// Publish failures are not retried here; the error ends the session and
/// the connection supervisor reconnects.
pub struct Publisher {
    exchange: String,
    metrics: Arc<PublisherMetrics>,
}

impl Publisher {
    pub fn new(exchange: impl Into<String>, metrics: Arc<PublisherMetrics>) -> Self {
        Self {
            exchange: exchange.into(),
            metrics,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Encode `reading` and publish it persistently under `station.<id>`.
    #[instrument(skip(self, channel, reading), fields(routing_key = tracing::field::Empty))]
    pub async fn publish(&self, channel: &dyn BrokerChannel, reading: &Reading) -> AppResult<()> {
        let payload = codec::encode(reading)?;
        let routing_key = reading.routing_key();
        tracing::Span::current().record("routing_key", routing_key.as_str());

        let started = Instant::now();
        match channel.publish(&self.exchange, &routing_key, &payload).await {
            Ok(()) => {
                self.metrics.record_sent(started.elapsed());
                debug!(bytes = payload.len(), "Reading published");
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }
}

/// Generate-and-publish loop with a fixed pause between readings.
///
/// The generator outlives broker sessions, so a reconnect resumes the same
/// sequence.
pub struct ProducerService {
    publisher: Publisher,
    generator: Mutex<Box<dyn Generator>>,
    interval: Duration,
}

impl ProducerService {
    pub fn new(publisher: Publisher, generator: Box<dyn Generator>, interval: Duration) -> Self {
        Self {
            publisher,
            generator: Mutex::new(generator),
            interval,
        }
    }

    pub fn from_config(
        generator: Box<dyn Generator>,
        metrics: Arc<PublisherMetrics>,
        config: &Config,
    ) -> Self {
        Self::new(
            Publisher::new(config.exchange.clone(), metrics),
            generator,
            config.publish_interval,
        )
    }

    fn next_reading(&self) -> AppResult<Option<Reading>> {
        let mut generator = self
            .generator
            .lock()
            .map_err(|_| AppError::Internal("generator lock poisoned".to_string()))?;

        match generator.next_reading() {
            Ok(reading) => Ok(Some(reading)),
            Err(e) => {
                warn!(error = %e, "Generator produced an invalid reading, skipping");
                Ok(None)
            }
        }
    }

    /// Publish one reading per interval until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// The first connection-class error from the channel.
    pub async fn run(
        &self,
        channel: Arc<dyn BrokerChannel>,
        shutdown: &CancellationToken,
    ) -> AppResult<()> {
        info!(
            exchange = %self.publisher.exchange(),
            interval = ?self.interval,
            "Publishing readings"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, producer stopping");
                return Ok(());
            }

            match self.next_reading()? {
                Some(reading) => match self.publisher.publish(channel.as_ref(), &reading).await {
                    Ok(()) => {}
                    Err(AppError::Codec(e)) => {
                        warn!(error = %e, "Failed to encode reading, skipping");
                        self.publisher.metrics.record_skipped();
                    }
                    Err(e) => return Err(e),
                },
                None => self.publisher.metrics.record_skipped(),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, producer stopping");
                    return Ok(());
                }
                _ = sleep(self.interval) => {}
            }
        }
    }
}
