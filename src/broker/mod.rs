//! Message broker plumbing.
//!
//! This module isolates everything the relay needs from the broker behind
//! the [`BrokerChannel`] and [`Connector`] traits:
//!
//! - **AMQP implementation**: `lapin` channel and dialer (`amqp`)
//! - **Topology**: idempotent exchange/queue declarations (`topology`)
//! - **Connection supervision**: bounded-retry reconnect loop (`supervisor`)
//! - **State tracking**: atomic supervisor state and retry counter (`connection`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ConnectionSupervisor                      │
//! │  ┌─────────────────┐  ┌──────────────────────────────────┐  │
//! │  │ Connector       │  │ Session (per Ready transition)   │  │
//! │  │ - dial()        │  │ - Topology::ensure()             │  │
//! │  │   (short retry) │  │ - Publisher / ConsumerService    │  │
//! │  └─────────────────┘  └──────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The traits exist so the consumer loop and the supervisor can be driven
//! against in-memory fakes in tests.

mod amqp;
mod connection;
mod supervisor;
mod topology;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::AppResult;

pub use amqp::{AmqpChannel, AmqpConnector};
pub use connection::{ConnectionState, SupervisorState};
pub use supervisor::ConnectionSupervisor;
pub use topology::{BINDING_PATTERN, Topology};

/// Prefetch window of a consumer: one unacknowledged message at a time.
pub const PREFETCH_COUNT: u16 = 1;

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes on routing-key pattern match.
    Topic,
    /// Copies every message to all bound queues.
    Fanout,
}

/// A message delivered to this consumer, owned for one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Broker-assigned identifier, unique per channel session.
    pub delivery_tag: u64,
    pub routing_key: String,
    pub payload: Vec<u8>,
    /// Set by the broker when this message was delivered before and not settled.
    pub redelivered: bool,
}

/// Stream of deliveries for one consumer registration.
///
/// Ends (or yields an error) when the channel or connection goes away.
pub type DeliveryStream = BoxStream<'static, AppResult<Envelope>>;

/// The broker operations the relay relies on.
///
/// All declarations are durable and idempotent by name. Every error returned
/// here is a connection-class [`crate::error::AppError`].
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> AppResult<()>;

    /// Declare a durable queue, optionally dead-lettering into `dead_letter_exchange`.
    async fn declare_queue(&self, name: &str, dead_letter_exchange: Option<&str>)
    -> AppResult<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> AppResult<()>;

    async fn set_prefetch(&self, count: u16) -> AppResult<()>;

    /// Register a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> AppResult<DeliveryStream>;

    /// Publish a persistent message.
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> AppResult<()>;

    async fn ack(&self, delivery_tag: u64) -> AppResult<()>;

    /// Negative-acknowledge without requeue, handing the message to the dead-letter exchange.
    async fn reject(&self, delivery_tag: u64) -> AppResult<()>;
}

/// Opens broker channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial the broker and open a channel.
    ///
    /// Implementations may retry transient socket errors internally; an error
    /// returned here means the dial as a whole failed.
    async fn dial(&self) -> AppResult<Arc<dyn BrokerChannel>>;
}
