//! AMQP 0-9-1 implementation of the broker traits, backed by `lapin`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::{BrokerChannel, Connector, DeliveryStream, Envelope, ExchangeKind};
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// AMQP delivery mode for messages that survive a broker restart.
const PERSISTENT_DELIVERY_MODE: u8 = 2;

const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

impl From<Delivery> for Envelope {
    fn from(delivery: Delivery) -> Self {
        Self {
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.as_str().to_string(),
            payload: delivery.data,
            redelivered: delivery.redelivered,
        }
    }
}

/// A `lapin` channel together with the connection that owns it.
///
/// The connection is kept alive for as long as the channel is in use.
pub struct AmqpChannel {
    _connection: Connection,
    channel: Channel,
}

impl AmqpChannel {
    pub fn new(connection: Connection, channel: Channel) -> Self {
        Self {
            _connection: connection,
            channel,
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> AppResult<()> {
        self.channel
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::TopologyError(format!("exchange '{name}': {e}")))
    }

    async fn declare_queue(
        &self,
        name: &str,
        dead_letter_exchange: Option<&str>,
    ) -> AppResult<()> {
        let mut arguments = FieldTable::default();
        if let Some(dlx) = dead_letter_exchange {
            arguments.insert(
                DEAD_LETTER_EXCHANGE_ARG.into(),
                AMQPValue::LongString(dlx.into()),
            );
        }

        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await
            .map(|_| ())
            .map_err(|e| AppError::TopologyError(format!("queue '{name}': {e}")))
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> AppResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                AppError::TopologyError(format!("binding '{queue}' -> '{exchange}': {e}"))
            })
    }

    async fn set_prefetch(&self, count: u16) -> AppResult<()> {
        self.channel
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| AppError::Disconnected(format!("basic.qos failed: {e}")))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> AppResult<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::Disconnected(format!("basic.consume on '{queue}': {e}")))?;

        let deliveries = consumer.map(|delivery| {
            delivery
                .map(Envelope::from)
                .map_err(|e| AppError::Disconnected(e.to_string()))
        });
        Ok(deliveries.boxed())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> AppResult<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type("application/json".into());

        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| AppError::PublishError(e.to_string()))
    }

    async fn ack(&self, delivery_tag: u64) -> AppResult<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| AppError::AckError {
                delivery_tag,
                reason: e.to_string(),
            })
    }

    async fn reject(&self, delivery_tag: u64) -> AppResult<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue: false,
                },
            )
            .await
            .map_err(|e| AppError::AckError {
                delivery_tag,
                reason: e.to_string(),
            })
    }
}

/// Dials RabbitMQ with a short, fixed retry budget for socket-level flakiness.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    url: String,
    redacted_url: String,
    attempts: u32,
    retry_delay: Duration,
}

impl AmqpConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.amqp_url.clone(),
            redacted_url: config.redacted_amqp_url(),
            attempts: config.dial_attempts.max(1),
            retry_delay: config.dial_retry_delay,
        }
    }

    async fn open(&self) -> Result<AmqpChannel, lapin::Error> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        Ok(AmqpChannel::new(connection, channel))
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    #[instrument(skip(self), fields(url = %self.redacted_url))]
    async fn dial(&self) -> AppResult<Arc<dyn BrokerChannel>> {
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.open().await {
                Ok(channel) => {
                    info!(attempt, "Connected to broker");
                    return Ok(Arc::new(channel));
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.attempts, error = %e, "Broker dial attempt failed");
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        debug!(delay = ?self.retry_delay, "Waiting before next dial attempt");
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(AppError::ConnectionFailed(format!(
            "{} after {} attempts: {last_error}",
            self.redacted_url, self.attempts
        )))
    }
}
