use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::Field;

/// Application-wide error types.
///
/// # Connection Errors
///
/// Connection-related errors are split into specific variants to enable
/// proper pattern matching for the supervisor's reconnection logic:
///
/// - `ConnectionFailed` - Dial or redial of the broker failed
/// - `Disconnected` - Channel or connection lost during operation
/// - `TopologyError` - Exchange/queue declaration refused by the broker
/// - `PublishError` - Publishing on the channel failed
/// - `AckError` - Acknowledging or rejecting a delivery failed
///
/// All of them end the current broker session. Message-level failures
/// (`Codec`, `Persist`) never do.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to connect to broker: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from broker: {0}")]
    Disconnected(String),

    #[error("Topology declaration failed: {0}")]
    TopologyError(String),

    #[error("Failed to publish message: {0}")]
    PublishError(String),

    #[error("Failed to settle delivery {delivery_tag}: {reason}")]
    AckError { delivery_tag: u64, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Giving up after {0} consecutive broker failures")]
    RetriesExhausted(u32),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Check if an error ends the current broker session.
    ///
    /// Uses explicit pattern matching on error variants rather than string matching.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionFailed(_)
                | AppError::Disconnected(_)
                | AppError::TopologyError(_)
                | AppError::PublishError(_)
                | AppError::AckError { .. }
        )
    }

    /// Process exit code for an error that ends a binary.
    pub fn exit_code(&self) -> exitcode::ExitCode {
        match self {
            AppError::ConfigError(_) => exitcode::CONFIG,
            AppError::RetriesExhausted(_) => exitcode::UNAVAILABLE,
            e if e.is_connection_error() => exitcode::UNAVAILABLE,
            _ => exitcode::SOFTWARE,
        }
    }
}

/// Failure to turn a wire payload into a [`crate::models::Reading`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The payload is not well-formed JSON, or not a JSON object.
    #[error("Malformed payload: {0}")]
    Decode(String),

    /// The payload is well-formed but semantically rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl CodecError {
    /// Short, stable name of the error class for logs and metric labels.
    pub fn class(&self) -> &'static str {
        match self {
            CodecError::Decode(_) => "decode_error",
            CodecError::Validation(_) => "validation_error",
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Decode(e.to_string())
    }
}

/// A structurally valid reading that violates the data model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required fields: {}", FieldList(.0))]
    MissingFields(Vec<Field>),

    #[error("Field {field} has the wrong type")]
    InvalidType { field: Field },

    #[error("Field {field} out of range: {value}")]
    OutOfRange { field: Field, value: f64 },

    #[error("Field timestamp is not an ISO-8601 date-time: {0}")]
    InvalidTimestamp(String),
}

impl ValidationError {
    /// The single field this error is about, if there is exactly one.
    pub fn field(&self) -> Option<Field> {
        match self {
            ValidationError::MissingFields(fields) if fields.len() == 1 => fields.first().copied(),
            ValidationError::MissingFields(_) => None,
            ValidationError::InvalidType { field } | ValidationError::OutOfRange { field, .. } => {
                Some(*field)
            }
            ValidationError::InvalidTimestamp(_) => Some(Field::Timestamp),
        }
    }
}

struct FieldList<'a>(&'a [Field]);

impl fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(field.as_str())?;
        }
        Ok(())
    }
}

/// The sink could not durably store a reading.
///
/// Always terminal for the message being processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistError {
    /// The store is unreachable or the connection broke mid-write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write (constraint, type or permission error).
    #[error("Write rejected by store: {0}")]
    Rejected(String),

    #[error("Persist did not complete within {0:?}")]
    Timeout(Duration),
}

impl PersistError {
    /// Short, stable name of the error class for logs and metric labels.
    pub fn class(&self) -> &'static str {
        match self {
            PersistError::Unavailable(_) => "store_unavailable",
            PersistError::Rejected(_) => "write_rejected",
            PersistError::Timeout(_) => "persist_timeout",
        }
    }

    /// Whether the call was dropped mid-flight, leaving the connection in an
    /// unknown state (possibly inside an open transaction).
    pub fn abandons_connection(&self) -> bool {
        matches!(self, PersistError::Timeout(_))
    }
}

impl From<tokio_postgres::Error> for PersistError {
    fn from(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db_err) => PersistError::Rejected(format!(
                "{} (SQLSTATE {})",
                db_err.message(),
                db_err.code().code()
            )),
            None => PersistError::Unavailable(e.to_string()),
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
