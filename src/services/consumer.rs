//! Consumer loop: decode, persist, then settle each delivery.
//!
//! Per-delivery protocol:
//!
//! 1. Decode. A decode or validation failure rejects the delivery without
//!    requeue (the broker dead-letters it) and never touches the sink.
//! 2. Persist, bounded by `persist_timeout`.
//! 3. On success ack; on failure reject without requeue and repair the sink
//!    before the next delivery is pulled.
//!
//! Every delivery is settled exactly once: acked or rejected, never both.
//! The loop never requeues; redelivery only happens when the process dies
//! before settling.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::broker::{BrokerChannel, Envelope, PREFETCH_COUNT};
use crate::codec;
use crate::config::Config;
use crate::error::{AppError, AppResult, PersistError};
use crate::metrics::ConsumerMetrics;
use crate::models::Reading;
use crate::sink::Sink;

/// Why a delivery was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not a well-formed payload, or semantically invalid.
    Invalid,
    /// Well-formed, but the sink failed to store it.
    PersistFailed,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Rejected(RejectReason),
}

/// Sequential consumer for one queue.
///
/// One delivery is in flight at a time (prefetch 1), so the sink and the
/// counters are never touched concurrently from within the loop.
pub struct ConsumerService {
    sink: Arc<dyn Sink>,
    metrics: Arc<ConsumerMetrics>,
    queue: String,
    consumer_tag: String,
    persist_timeout: Duration,
}

impl ConsumerService {
    pub fn new(
        sink: Arc<dyn Sink>,
        metrics: Arc<ConsumerMetrics>,
        queue: impl Into<String>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            metrics,
            queue: queue.into(),
            consumer_tag: format!("weather-consumer-{}", Uuid::new_v4()),
            persist_timeout,
        }
    }

    pub fn from_config(sink: Arc<dyn Sink>, metrics: Arc<ConsumerMetrics>, config: &Config) -> Self {
        Self::new(sink, metrics, config.queue.clone(), config.persist_timeout)
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Consume until `shutdown` is cancelled or the channel fails.
    ///
    /// Cancellation is only observed between deliveries; an in-flight
    /// delivery is always settled first.
    ///
    /// # Errors
    ///
    /// A connection-class error when the channel or the delivery stream
    /// breaks, or when an ack/nack cannot be sent.
    pub async fn run(
        &self,
        channel: Arc<dyn BrokerChannel>,
        shutdown: &CancellationToken,
    ) -> AppResult<()> {
        channel.set_prefetch(PREFETCH_COUNT).await?;
        let mut deliveries = channel.consume(&self.queue, &self.consumer_tag).await?;
        info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Consuming");

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, consumer stopping");
                    return Ok(());
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(envelope)) => {
                    self.handle_delivery(channel.as_ref(), envelope).await?;
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(AppError::Disconnected(format!(
                        "delivery stream for '{}' ended",
                        self.queue
                    )));
                }
            }
        }
    }

    /// Process and settle a single delivery.
    #[instrument(
        skip(self, channel, envelope),
        fields(delivery_tag = envelope.delivery_tag, routing_key = %envelope.routing_key)
    )]
    pub async fn handle_delivery(
        &self,
        channel: &dyn BrokerChannel,
        envelope: Envelope,
    ) -> AppResult<DeliveryOutcome> {
        let started = Instant::now();
        self.metrics.record_received();

        if envelope.redelivered {
            warn!("Processing a redelivered message");
        }

        let outcome = self.process(channel, &envelope).await;
        self.metrics.record_processing(started.elapsed());
        outcome
    }

    async fn process(
        &self,
        channel: &dyn BrokerChannel,
        envelope: &Envelope,
    ) -> AppResult<DeliveryOutcome> {
        let reading = match codec::decode(&envelope.payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    class = e.class(),
                    error = %e,
                    payload = %codec::payload_preview(&envelope.payload),
                    "Rejecting undecodable message"
                );
                self.metrics.record_validation_failure(e.class());
                channel.reject(envelope.delivery_tag).await?;
                return Ok(DeliveryOutcome::Rejected(RejectReason::Invalid));
            }
        };

        match self.persist(&reading).await {
            Ok(()) => {
                self.metrics.record_persisted();
                channel.ack(envelope.delivery_tag).await?;
                debug!(station_id = reading.station_id(), "Reading persisted and acked");
                Ok(DeliveryOutcome::Acked)
            }
            Err(e) => {
                warn!(
                    class = e.class(),
                    error = %e,
                    payload = %codec::payload_preview(&envelope.payload),
                    "Rejecting message after persist failure"
                );
                self.metrics.record_persist_failure(e.class());
                channel.reject(envelope.delivery_tag).await?;
                self.sink.repair(&e).await;
                Ok(DeliveryOutcome::Rejected(RejectReason::PersistFailed))
            }
        }
    }

    async fn persist(&self, reading: &Reading) -> Result<(), PersistError> {
        match timeout(self.persist_timeout, self.sink.persist(reading)).await {
            Ok(result) => result,
            Err(_) => Err(PersistError::Timeout(self.persist_timeout)),
        }
    }
}
