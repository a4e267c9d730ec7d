//! Exchange and queue layout shared by producer and consumer.
//!
//! ```text
//! weather.data (topic) ──station.*──► logs_queue ──nack──► weather.dlx (fanout) ──► logs_dlx
//! ```

use tracing::{debug, info};

use super::{BrokerChannel, ExchangeKind};
use crate::config::Config;
use crate::error::AppResult;

/// Binding pattern matching every station routing key.
pub const BINDING_PATTERN: &str = "station.*";

/// Names of the durable entities the relay depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub queue: String,
    pub dead_letter_queue: String,
}

impl Topology {
    pub fn from_config(config: &Config) -> Self {
        Self {
            exchange: config.exchange.clone(),
            dead_letter_exchange: config.dead_letter_exchange.clone(),
            queue: config.queue.clone(),
            dead_letter_queue: config.dead_letter_queue.clone(),
        }
    }

    /// Declare every exchange, queue and binding.
    ///
    /// Idempotent: safe to call on each new session, including when another
    /// process already declared the same topology. The dead-letter exchange
    /// is declared before the queue that references it.
    pub async fn ensure(&self, channel: &dyn BrokerChannel) -> AppResult<()> {
        channel
            .declare_exchange(&self.exchange, ExchangeKind::Topic)
            .await?;
        channel
            .declare_exchange(&self.dead_letter_exchange, ExchangeKind::Fanout)
            .await?;
        debug!(
            exchange = %self.exchange,
            dead_letter_exchange = %self.dead_letter_exchange,
            "Exchanges declared"
        );

        channel
            .declare_queue(&self.queue, Some(&self.dead_letter_exchange))
            .await?;
        channel
            .bind_queue(&self.queue, &self.exchange, BINDING_PATTERN)
            .await?;

        channel.declare_queue(&self.dead_letter_queue, None).await?;
        // Fanout ignores the key.
        channel
            .bind_queue(&self.dead_letter_queue, &self.dead_letter_exchange, "")
            .await?;

        info!(
            queue = %self.queue,
            dead_letter_queue = %self.dead_letter_queue,
            "Topology ready"
        );
        Ok(())
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
