//! Durable storage for validated readings.
//!
//! The consumer only talks to the [`Sink`] trait; [`PostgresSink`] is the
//! production implementation.

mod postgres;

use async_trait::async_trait;

use crate::error::PersistError;
use crate::models::Reading;

pub use postgres::{INSERT_READING, PgHandle, PostgresSink};

/// A durable store for readings.
///
/// Implementations must tolerate concurrent writers from other processes;
/// within one consumer `persist` is never called concurrently.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Durably store one reading.
    ///
    /// Returning `Ok(())` means the write is committed; the consumer acks the
    /// message only after that.
    async fn persist(&self, reading: &Reading) -> Result<(), PersistError>;

    /// Restore the underlying connection after `cause` made a persist fail.
    ///
    /// Called before the next delivery is pulled. The default does nothing.
    async fn repair(&self, _cause: &PersistError) {}
}
