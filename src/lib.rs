//! # Weather Relay
//!
//! Moves weather-station readings from a producer to PostgreSQL through
//! RabbitMQ without silently losing any of them:
//!
//! - **Routing**: readings are published to a topic exchange under
//!   `station.<id>` and consumed from a queue bound with `station.*`
//! - **Acknowledgment**: a delivery is acked only after the reading is
//!   committed; anything else is rejected without requeue
//! - **Dead-lettering**: rejected deliveries land in a dead-letter queue via
//!   the queue's dead-letter exchange
//! - **Recovery**: a bounded-retry connection supervisor that exits the
//!   process once its budget is spent
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  station.N  ┌──────────────┐  station.*  ┌─────────────┐
//! │ weather-     │────────────►│ weather.data │────────────►│ logs_queue  │
//! │ producer     │             │ (topic)      │             └──────┬──────┘
//! └──────────────┘             └──────────────┘                    │ prefetch 1
//!                                                                  ▼
//! ┌──────────────┐   nack      ┌──────────────┐             ┌─────────────┐
//! │ logs_dlx     │◄────────────│ weather.dlx  │◄────────────│ weather-    │──► PostgreSQL
//! └──────────────┘             │ (fanout)     │  requeue=0  │ consumer    │    weather_logs
//!                              └──────────────┘             └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use weather_relay::{Config, app};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), weather_relay::AppError> {
//!     let config = Config::from_env()?;
//!     app::run_consumer(config, CancellationToken::new()).await
//! }
//! ```

pub mod app;
pub mod broker;
pub mod codec;
pub mod config;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod models;
pub mod services;
pub mod sink;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult, CodecError, PersistError, ValidationError};
pub use models::{Field, Reading};
